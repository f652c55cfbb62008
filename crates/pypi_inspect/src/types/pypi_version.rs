use pep440_rs::{Version, VersionSpecifiers};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::cmp::Ordering;
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A version of a package release as encountered in an index.
///
/// PEP 440 deprecated non-conforming version strings but plenty of older
/// sdists in the wild still carry them (`1.0-beta`, `2004d`, ...). Rather than
/// dropping those releases on the floor we keep them as a [`PypiVersion::Legacy`]
/// variant that orders below every PEP 440 version so it is only ever selected
/// when nothing conforming exists.
#[derive(Debug, Clone, Eq, PartialEq, Hash, SerializeDisplay, DeserializeFromStr)]
pub enum PypiVersion {
    /// A version that parses under PEP 440.
    Pep440(Version),

    /// Anything else, compared lexicographically among its own kind.
    Legacy(String),
}

impl PypiVersion {
    /// Returns the contained PEP 440 version, if this is one.
    pub fn as_pep440(&self) -> Option<&Version> {
        match self {
            PypiVersion::Pep440(version) => Some(version),
            PypiVersion::Legacy(_) => None,
        }
    }

    /// True if this is a pre-release or developmental release. Legacy versions
    /// are never considered pre-releases.
    pub fn is_prerelease(&self) -> bool {
        match self {
            PypiVersion::Pep440(version) => version.pre.is_some() || version.dev.is_some(),
            PypiVersion::Legacy(_) => false,
        }
    }

    /// True if the version carries a local segment (`2.0.0+cpu`).
    pub fn is_local(&self) -> bool {
        match self {
            PypiVersion::Pep440(version) => version.local.is_some(),
            PypiVersion::Legacy(_) => false,
        }
    }

    /// Returns true if this version is admitted by the given specifier set. An
    /// empty set admits every version; a non-empty set never admits a legacy
    /// version.
    pub fn satisfies(&self, specifiers: &VersionSpecifiers) -> bool {
        match self {
            PypiVersion::Pep440(version) => specifiers.contains(version),
            PypiVersion::Legacy(_) => specifiers.iter().next().is_none(),
        }
    }
}

impl From<Version> for PypiVersion {
    fn from(version: Version) -> Self {
        PypiVersion::Pep440(version)
    }
}

impl FromStr for PypiVersion {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Version::from_str(s) {
            Ok(version) => Ok(PypiVersion::Pep440(version)),
            Err(_) => Ok(PypiVersion::Legacy(s.to_owned())),
        }
    }
}

impl Display for PypiVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PypiVersion::Pep440(version) => write!(f, "{version}"),
            PypiVersion::Legacy(version) => write!(f, "{version}"),
        }
    }
}

impl Ord for PypiVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PypiVersion::Pep440(a), PypiVersion::Pep440(b)) => a.cmp(b),
            (PypiVersion::Legacy(a), PypiVersion::Legacy(b)) => a.cmp(b),
            (PypiVersion::Legacy(_), PypiVersion::Pep440(_)) => Ordering::Less,
            (PypiVersion::Pep440(_), PypiVersion::Legacy(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for PypiVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn version(s: &str) -> PypiVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_pep440_ordering() {
        assert!(version("1.0") < version("1.0.1"));
        assert!(version("1.0a1") < version("1.0"));
        assert!(version("1.0.dev1") < version("1.0a1"));
        assert!(version("1.0") < version("1.0.post1"));
    }

    #[test]
    fn test_local_versions_sort_above_public() {
        assert!(version("2.0.0") < version("2.0.0+cpu"));
        assert!(version("2.0.0+cpu").is_local());
        // numeric local components sort above alphabetic ones
        assert!(version("1.0+abc") < version("1.0+2"));
    }

    #[test]
    fn test_legacy_sorts_below_everything() {
        let legacy = version("1.0-beta-2004");
        assert!(matches!(legacy, PypiVersion::Legacy(_)));
        assert!(legacy < version("0.0.1"));
        assert!(version("2004d") < version("0.1"));
    }

    #[test]
    fn test_prerelease_detection() {
        assert!(version("1.0a1").is_prerelease());
        assert!(version("1.0.dev2").is_prerelease());
        assert!(!version("1.0.post1").is_prerelease());
        assert!(!version("1.0").is_prerelease());
    }

    #[test]
    fn test_specifier_matching() {
        use pep440_rs::VersionSpecifiers;
        let specs: VersionSpecifiers = "~=3.8.0".parse().unwrap();
        assert!(version("3.8.2").satisfies(&specs));
        assert!(!version("3.9.0").satisfies(&specs));

        let empty: VersionSpecifiers = "".parse().unwrap();
        assert!(version("3.9.0").satisfies(&empty));
        assert!(version("2004d").satisfies(&empty));
        assert!(!version("2004d").satisfies(&specs));
    }
}
