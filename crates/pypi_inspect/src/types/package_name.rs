use miette::Diagnostic;
use regex::Regex;
use serde::{Serialize, Serializer};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// A python package name. Both the original string and the normalized form are
/// retained: distribution filenames and display output use the source string,
/// while all comparisons go through the normalized name so that `Foo_Bar` and
/// `foo-bar` identify the same package.
#[derive(Debug, Clone, Eq, DeserializeFromStr)]
pub struct PackageName {
    /// The string this instance was created from.
    source: Box<str>,

    /// The PEP 503 normalized form of `source`.
    normalized: Box<str>,
}

impl PackageName {
    /// Returns the string from which this instance was created.
    pub fn as_source_str(&self) -> &str {
        self.source.as_ref()
    }

    /// Returns the normalized form of the package name.
    pub fn as_str(&self) -> &str {
        self.normalized.as_ref()
    }
}

/// Error when parsing a package name
#[derive(Debug, Clone, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum ParsePackageNameError {
    #[error("invalid package name '{0}'")]
    InvalidPackageName(String),
}

impl FromStr for PackageName {
    type Err = ParsePackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static NAME_VALIDATE: OnceLock<Regex> = OnceLock::new();
        let name_validate = NAME_VALIDATE.get_or_init(|| {
            // https://packaging.python.org/specifications/core-metadata/#name
            Regex::new(r"(?i-u)^([A-Z0-9]|[A-Z0-9][A-Z0-9._-]*[A-Z0-9])$").unwrap()
        });

        if !name_validate.is_match(s) {
            return Err(ParsePackageNameError::InvalidPackageName(s.into()));
        }

        // https://www.python.org/dev/peps/pep-0503/#normalized-names
        let mut normalized = s.replace(['-', '_', '.'], "-");
        normalized.make_ascii_lowercase();

        Ok(PackageName {
            source: s.to_owned().into_boxed_str(),
            normalized: normalized.into_boxed_str(),
        })
    }
}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state)
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.normalized.eq(&other.normalized)
    }
}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl Serialize for PackageName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.source.as_ref().serialize(serializer)
    }
}

/// A package name that is guaranteed to be normalized as described in
/// [PEP 503](https://www.python.org/dev/peps/pep-0503/#normalized-names).
#[repr(transparent)]
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub struct NormalizedPackageName(Box<str>);

impl From<PackageName> for NormalizedPackageName {
    fn from(value: PackageName) -> Self {
        Self(value.normalized)
    }
}

impl From<NormalizedPackageName> for PackageName {
    fn from(value: NormalizedPackageName) -> Self {
        Self {
            source: value.0.clone(),
            normalized: value.0,
        }
    }
}

impl Display for NormalizedPackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl NormalizedPackageName {
    /// Returns a string reference
    pub fn as_str(&self) -> &str {
        self.0.as_ref()
    }
}

impl FromStr for NormalizedPackageName {
    type Err = ParsePackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PackageName::from_str(s)?.into())
    }
}

impl Borrow<str> for NormalizedPackageName {
    fn borrow(&self) -> &str {
        self.0.as_ref()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_packagename_normalization() {
        let name1: PackageName = "Sphinx-RTD-Theme".parse().unwrap();
        assert_eq!(name1.as_source_str(), "Sphinx-RTD-Theme");
        assert_eq!(name1.as_str(), "sphinx-rtd-theme");

        let name2: PackageName = "sphinx_rtd.theme".parse().unwrap();
        assert_eq!(name2.as_str(), "sphinx-rtd-theme");

        assert_eq!(name1, name2);

        let name3: PackageName = "sphinx-rtdtheme".parse().unwrap();
        assert_ne!(name1, name3);
    }

    #[test]
    fn test_invalid_names() {
        assert!(PackageName::from_str("-flask").is_err());
        assert!(PackageName::from_str("flask-").is_err());
        assert!(PackageName::from_str("fla sk").is_err());
        assert!(PackageName::from_str("").is_err());
    }
}
