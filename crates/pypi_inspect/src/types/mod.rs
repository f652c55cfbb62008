//! The types that describe the PyPI packaging universe: names, versions,
//! distribution filenames, core metadata and the boundary records produced by
//! the manifest parsers.

mod artifact_name;

mod package_name;

mod core_metadata;

mod dependent_package;

mod distribution;

mod metadata_fields;

mod pypi_version;

pub use artifact_name::{
    ArtifactName, InvalidDistributionFilename, SDistFilename, SDistFormat, WheelFilename,
};

pub use package_name::{NormalizedPackageName, PackageName, ParsePackageNameError};

pub use core_metadata::{DistributionMetadata, DistributionMetadataError};

pub use dependent_package::{
    DependentPackage, DependentPackageError, RequirementExtraData, RequirementFlags,
};

pub use distribution::{DistributionInfo, PypiPackage};

pub use pypi_version::PypiVersion;

pub use pep440_rs::{Version, VersionSpecifier, VersionSpecifiers};
pub use pep508_rs::{MarkerEnvironment, Requirement};
