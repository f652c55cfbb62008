use super::{ArtifactName, NormalizedPackageName, PypiVersion};
use crate::environment::Environment;
use pep440_rs::VersionSpecifiers;
use rattler_digest::serde::SerializableHash;
use rattler_digest::{Sha256, Sha256Hash};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use url::Url;

/// A single downloadable distribution file discovered in a package index: the
/// parsed filename, where to fetch it, and the link-level metadata the index
/// exposes about it.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DistributionInfo {
    /// The parsed filename of the artifact.
    pub filename: ArtifactName,

    /// The fully resolved download url.
    pub url: Url,

    /// The sha256 checksum hint carried in the `#sha256=` url fragment.
    #[serde_as(as = "Option<SerializableHash<Sha256>>")]
    pub sha256: Option<Sha256Hash>,

    /// The Python versions this file supports (`data-requires-python`).
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub requires_python: Option<VersionSpecifiers>,
}

impl DistributionInfo {
    /// True if the given dotted python version ("3.10") is admitted by this
    /// file's `requires_python`. A file without the attribute admits all.
    pub fn admits_python(&self, python_dot_version: &PypiVersion) -> bool {
        match &self.requires_python {
            None => true,
            Some(specifiers) => python_dot_version.satisfies(specifiers),
        }
    }
}

/// All distributions of one `(name, version)` release: at most one sdist and
/// any number of wheels.
#[derive(Debug, Clone)]
pub struct PypiPackage {
    /// The normalized package name shared by all contained distributions.
    pub name: NormalizedPackageName,

    /// The version shared by all contained distributions.
    pub version: PypiVersion,

    /// The source distribution of this release, if one was published.
    pub sdist: Option<DistributionInfo>,

    /// The binary distributions of this release.
    pub wheels: Vec<DistributionInfo>,
}

impl PypiPackage {
    /// Yields the wheels of this package whose tag set intersects the tags
    /// supported by `environment`.
    pub fn supported_wheels<'a>(
        &'a self,
        environment: &'a Environment,
    ) -> impl Iterator<Item = &'a DistributionInfo> + 'a {
        let tags = environment.tags();
        self.wheels.iter().filter(move |wheel| {
            wheel
                .filename
                .as_wheel()
                .is_some_and(|name| name.all_tags_iter().any(|tag| tags.is_compatible(&tag)))
        })
    }

    /// A version is usable under an environment when at least one supported
    /// wheel, or the sdist, admits the environment's python version.
    pub fn is_usable_for(&self, environment: &Environment) -> bool {
        let python = environment.python_dot_version();
        if self
            .supported_wheels(environment)
            .any(|wheel| wheel.admits_python(&python))
        {
            return true;
        }
        self.sdist
            .as_ref()
            .is_some_and(|sdist| sdist.admits_python(&python))
    }

    /// Yields every distribution of this package, sdist first.
    pub fn distributions(&self) -> impl Iterator<Item = &DistributionInfo> {
        self.sdist.iter().chain(self.wheels.iter())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::environment::Environment;

    fn dist(filename: &str, requires_python: Option<&str>) -> DistributionInfo {
        DistributionInfo {
            filename: ArtifactName::from_filename(filename).unwrap(),
            url: Url::parse(&format!("https://files.example.com/{filename}")).unwrap(),
            sha256: None,
            requires_python: requires_python.map(|s| s.parse().unwrap()),
        }
    }

    #[test]
    fn test_supported_wheels_and_usability() {
        let env = Environment::from_python_version_and_os("310", "linux").unwrap();
        let package = PypiPackage {
            name: "frob".parse().unwrap(),
            version: "1.0".parse().unwrap(),
            sdist: Some(dist("frob-1.0.tar.gz", Some(">=3.7"))),
            wheels: vec![
                dist("frob-1.0-py3-none-any.whl", Some(">=3.7")),
                dist("frob-1.0-cp310-cp310-win_amd64.whl", None),
            ],
        };

        let supported: Vec<_> = package.supported_wheels(&env).collect();
        assert_eq!(supported.len(), 1);
        assert!(supported[0].filename.to_string().ends_with("any.whl"));
        assert!(package.is_usable_for(&env));
        assert_eq!(package.distributions().count(), 3);
    }

    #[test]
    fn test_requires_python_filters_out_versions() {
        let env = Environment::from_python_version_and_os("36", "linux").unwrap();
        let package = PypiPackage {
            name: "frob".parse().unwrap(),
            version: "2.0".parse().unwrap(),
            sdist: None,
            wheels: vec![dist("frob-2.0-py3-none-any.whl", Some(">=3.8"))],
        };
        assert!(!package.is_usable_for(&env));
    }
}
