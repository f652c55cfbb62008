use super::metadata_fields::{MetadataFields, MetadataFieldsError};
use super::{PackageName, ParsePackageNameError, PypiVersion};
use once_cell::sync::Lazy;
use pep440_rs::{Pep440Error, Version, VersionSpecifiers};
use pep508_rs::Requirement;
use std::str::FromStr;
use thiserror::Error;

/// The core metadata of a distribution, read from a wheel `METADATA` file or
/// an sdist `PKG-INFO` file.
///
/// Beyond the fields the resolver itself consumes (`Requires-Dist`,
/// `Requires-Python`) this carries the descriptive fields that end up in the
/// emitted package records.
#[derive(Debug, Clone)]
pub struct DistributionMetadata {
    /// The distribution name from the `Name` field.
    pub name: PackageName,

    /// The release version.
    pub version: PypiVersion,

    /// The version of the metadata format itself.
    pub metadata_version: Version,

    /// Requirements of this distribution (`Requires-Dist`).
    pub requires_dist: Vec<Requirement>,

    /// The Python versions this distribution supports (`Requires-Python`).
    pub requires_python: Option<VersionSpecifiers>,

    /// One-line summary.
    pub summary: Option<String>,

    /// Home page URL.
    pub home_page: Option<String>,

    /// Author name and contact.
    pub author: Option<String>,
    /// Author email address.
    pub author_email: Option<String>,

    /// The declared license text or identifier.
    pub license: Option<String>,

    /// Trove classifiers.
    pub classifiers: Vec<String>,

    /// Comma or space separated keywords.
    pub keywords: Option<String>,
}

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum DistributionMetadataError {
    #[error(transparent)]
    FailedToParse(#[from] MetadataFieldsError),

    #[error("invalid Metadata-Version: {0}")]
    InvalidMetadataVersion(String),

    #[error("unsupported METADATA version {0}")]
    UnsupportedMetadataVersion(Version),

    #[error("invalid Requires-Python: {0}")]
    InvalidRequiresPython(#[source] Pep440Error),

    #[error(transparent)]
    InvalidPackageName(#[from] ParsePackageNameError),
}

impl TryFrom<&[u8]> for DistributionMetadata {
    type Error = DistributionMetadataError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let input = String::from_utf8_lossy(value);
        let mut parsed = MetadataFields::parse(&input)?;

        // Core-metadata says tools MUST fail on a greater major version than
        // they support; minor revisions are defined to be compatible.
        static NEXT_MAJOR_METADATA_VERSION: Lazy<Version> =
            Lazy::new(|| Version::from_str("3").unwrap());
        let metadata_version: Version = parsed
            .take("Metadata-Version")?
            .parse()
            .map_err(DistributionMetadataError::InvalidMetadataVersion)?;
        if metadata_version >= *NEXT_MAJOR_METADATA_VERSION {
            return Err(DistributionMetadataError::UnsupportedMetadataVersion(
                metadata_version,
            ));
        }

        let name: PackageName = parsed.take("Name")?.parse()?;
        let version: PypiVersion = parsed
            .take("Version")?
            .parse()
            .expect("version parsing is infallible");

        let mut requires_dist = Vec::new();
        for requirement in parsed.take_all("Requires-Dist") {
            match requirement.parse() {
                Ok(parsed) => requires_dist.push(parsed),
                Err(e) => {
                    tracing::warn!("ignoring Requires-Dist: {requirement}, failed to parse: {e}")
                }
            }
        }

        let requires_python = parsed
            .take_optional("Requires-Python")?
            .as_deref()
            .map(VersionSpecifiers::from_str)
            .transpose()
            .map_err(DistributionMetadataError::InvalidRequiresPython)?;

        let take_nonempty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        Ok(DistributionMetadata {
            name,
            version,
            metadata_version,
            requires_dist,
            requires_python,
            summary: take_nonempty(parsed.take_optional("Summary")?),
            home_page: take_nonempty(parsed.take_optional("Home-page")?),
            author: take_nonempty(parsed.take_optional("Author")?),
            author_email: take_nonempty(parsed.take_optional("Author-email")?),
            license: take_nonempty(parsed.take_optional("License")?),
            classifiers: parsed.take_all("Classifier"),
            keywords: take_nonempty(parsed.take_optional("Keywords")?),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const FLASK_METADATA: &str = "\
Metadata-Version: 2.1
Name: Flask
Version: 2.1.2
Summary: A simple framework for building complex web applications.
Home-page: https://palletsprojects.com/p/flask
Author: Armin Ronacher
Author-email: armin.ronacher@active-4.com
License: BSD-3-Clause
Classifier: Development Status :: 5 - Production/Stable
Classifier: Framework :: Flask
Requires-Python: >=3.7
Requires-Dist: Werkzeug (>=2.0)
Requires-Dist: Jinja2 (>=3.0)
Requires-Dist: itsdangerous (>=2.0)
Requires-Dist: click (>=8.0)
Requires-Dist: colorama ; platform_system == \"Windows\"
Requires-Dist: asgiref (>=3.2) ; extra == 'async'
Provides-Extra: async
";

    #[test]
    fn test_parse_wheel_metadata() {
        let metadata = DistributionMetadata::try_from(FLASK_METADATA.as_bytes()).unwrap();
        assert_eq!(metadata.name.as_str(), "flask");
        assert_eq!(metadata.version.to_string(), "2.1.2");
        assert_eq!(metadata.requires_dist.len(), 6);
        assert_eq!(metadata.requires_python.unwrap().to_string(), ">=3.7");
        assert_eq!(metadata.license.as_deref(), Some("BSD-3-Clause"));
        assert_eq!(metadata.classifiers.len(), 2);
    }

    #[test]
    fn test_unsupported_major_version() {
        let input = "Metadata-Version: 3.0\nName: foo\nVersion: 1.0\n";
        assert!(matches!(
            DistributionMetadata::try_from(input.as_bytes()),
            Err(DistributionMetadataError::UnsupportedMetadataVersion(_))
        ));
    }

    #[test]
    fn test_bad_requires_dist_is_skipped() {
        let input =
            "Metadata-Version: 2.1\nName: foo\nVersion: 1.0\nRequires-Dist: not a requirement !!\n";
        let metadata = DistributionMetadata::try_from(input.as_bytes()).unwrap();
        assert!(metadata.requires_dist.is_empty());
    }
}
