use pep508_rs::{Requirement, VersionOrUrl};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// A dependency declared by one of the input surfaces (a requirements file, a
/// raw specifier string or a `setup.py`), before resolution.
///
/// This is the boundary type produced by the manifest parsers. Only records
/// with the `install` scope and without any of the [`RequirementFlags`] are
/// handed to the resolver; the rest are carried through to the output
/// unresolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependentPackage {
    /// A `pkg:pypi/...` package url for the dependency. Carries a version only
    /// when the requirement is pinned.
    pub purl: String,

    /// The requirement string as found in the input, e.g. `flask>=2.0`.
    pub extracted_requirement: String,

    /// The dependency scope, `install` for runtime requirements.
    pub scope: String,

    /// True if this is a runtime dependency.
    pub is_runtime: bool,

    /// True if this dependency is optional.
    pub is_optional: bool,

    /// True if the requirement pins an exact version.
    pub is_pinned: bool,

    /// Requirement forms we recognize but do not resolve.
    #[serde(default)]
    pub flags: RequirementFlags,

    /// Extra data found next to the requirement, such as index options.
    #[serde(default)]
    pub extra_data: RequirementExtraData,
}

/// Requirement forms that are recognized in the input and skipped during
/// resolution.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct RequirementFlags {
    pub is_editable: bool,
    pub is_constraint: bool,
    pub is_vcs_url: bool,
    pub is_url_requirement: bool,
    pub is_local_path: bool,
    pub is_archive: bool,
    pub is_wheel: bool,
    pub has_hash_options: bool,
}

impl RequirementFlags {
    /// True if any flag is set, i.e. the requirement cannot be resolved
    /// through an index.
    pub fn any(&self) -> bool {
        self.is_editable
            || self.is_constraint
            || self.is_vcs_url
            || self.is_url_requirement
            || self.is_local_path
            || self.is_archive
            || self.is_wheel
            || self.has_hash_options
    }
}

/// Per-requirement options that affect the surrounding resolution rather than
/// the requirement itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequirementExtraData {
    /// `-i` / `--index-url` options found in the requirements file.
    pub index_url: Option<Url>,

    /// `--extra-index-url` options found in the requirements file.
    pub extra_index_urls: Vec<Url>,

    /// The `python_requires` declared by a `setup.py` or `setup.cfg`.
    pub python_requires: Option<String>,
}

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum DependentPackageError {
    #[error("empty requirement specifier")]
    EmptySpecifier,

    #[error("malformed requirement specifier '{specifier}': {message}")]
    MalformedSpecifier { specifier: String, message: String },
}

impl DependentPackage {
    /// Build a `DependentPackage` from a raw requirement specifier string such
    /// as `flask==2.1.2` or `zipp~=3.8.0`.
    pub fn from_specifier(specifier: &str) -> Result<Self, DependentPackageError> {
        let specifier: String = specifier.to_lowercase().split_whitespace().collect();
        if specifier.is_empty() {
            return Err(DependentPackageError::EmptySpecifier);
        }

        let requirement = Requirement::from_str(&specifier).map_err(|e| {
            DependentPackageError::MalformedSpecifier {
                specifier: specifier.clone(),
                message: e.to_string(),
            }
        })?;

        let pinned_version = pinned_version_of(&requirement);
        let purl = match &pinned_version {
            Some(version) => format!("pkg:pypi/{}@{}", requirement.name, version),
            None => format!("pkg:pypi/{}", requirement.name),
        };

        Ok(DependentPackage {
            purl,
            extracted_requirement: specifier,
            scope: "install".to_owned(),
            is_runtime: true,
            is_optional: false,
            is_pinned: pinned_version.is_some(),
            flags: RequirementFlags::default(),
            extra_data: RequirementExtraData::default(),
        })
    }

    /// Build a `DependentPackage` from an already parsed requirement, e.g. one
    /// collected out of a `setup.py`.
    pub fn from_requirement(requirement: &Requirement) -> Self {
        DependentPackage {
            purl: format!("pkg:pypi/{}", requirement.name),
            extracted_requirement: requirement.to_string(),
            scope: "install".to_owned(),
            is_runtime: false,
            is_optional: false,
            is_pinned: pinned_version_of(requirement).is_some(),
            flags: RequirementFlags::default(),
            extra_data: RequirementExtraData::default(),
        }
    }

    /// True if this record should be handed to the resolver.
    pub fn is_resolvable(&self) -> bool {
        self.scope == "install" && !self.flags.any()
    }

    /// Parse the extracted requirement into a PEP 508 requirement.
    pub fn requirement(&self) -> Result<Requirement, DependentPackageError> {
        Requirement::from_str(&self.extracted_requirement).map_err(|e| {
            DependentPackageError::MalformedSpecifier {
                specifier: self.extracted_requirement.clone(),
                message: e.to_string(),
            }
        })
    }
}

/// Returns the version a requirement pins, if it consists of exactly one
/// `==` or `===` specifier.
fn pinned_version_of(requirement: &Requirement) -> Option<String> {
    let Some(VersionOrUrl::VersionSpecifier(specifiers)) = &requirement.version_or_url else {
        return None;
    };
    let mut iter = specifiers.iter();
    let specifier = iter.next()?;
    if iter.next().is_some() {
        return None;
    }
    let repr = specifier.to_string();
    repr.strip_prefix("===")
        .or_else(|| repr.strip_prefix("=="))
        .map(|version| version.trim().to_owned())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_pinned_specifier() {
        let dep = DependentPackage::from_specifier("Flask==2.1.2").unwrap();
        assert_eq!(dep.purl, "pkg:pypi/flask@2.1.2");
        assert_eq!(dep.extracted_requirement, "flask==2.1.2");
        assert!(dep.is_pinned);
        assert!(dep.is_resolvable());
    }

    #[test]
    fn test_unpinned_specifier() {
        let dep = DependentPackage::from_specifier("zipp ~= 3.8.0").unwrap();
        assert_eq!(dep.purl, "pkg:pypi/zipp");
        assert!(!dep.is_pinned);
    }

    #[test]
    fn test_flags_make_record_unresolvable() {
        let mut dep = DependentPackage::from_specifier("flask").unwrap();
        dep.flags.is_editable = true;
        assert!(!dep.is_resolvable());
    }

    #[test]
    fn test_empty_specifier() {
        assert!(matches!(
            DependentPackage::from_specifier("  "),
            Err(DependentPackageError::EmptySpecifier)
        ));
    }
}
