//! Parsers for the manifest formats that declare Python dependencies:
//! requirements files, `setup.cfg`, a static scan of `setup.py`, and the
//! metadata files inside built distributions.

mod requirements_txt;
mod setup_cfg;
mod setup_py;

pub use requirements_txt::{parse_requirements_txt, RequirementsFile, RequirementsTxtError};
pub use setup_cfg::{parse_setup_cfg, SetupCfgData, SetupCfgError};
pub use setup_py::{
    mentions_requirements_txt, parse_setup_py, scan_setup_py, SetupPyData, SetupPyError,
};

use crate::types::{DependentPackage, DistributionMetadata};
use fs_err as fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The manifest formats dependency records can be read from. Used to select
/// a parser for a file found inside an extracted sdist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdistManifest {
    /// A wheel `METADATA` file.
    WheelMetadata,
    /// A `setup.py` script, scanned statically.
    SetupPy,
    /// A `setup.cfg` file.
    SetupCfg,
    /// A pip requirements file.
    PipRequirements,
    /// An sdist `PKG-INFO` file.
    SdistPkgInfo,
}

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ManifestError {
    #[error(transparent)]
    Requirements(#[from] RequirementsTxtError),

    #[error(transparent)]
    SetupCfg(#[from] SetupCfgError),

    #[error(transparent)]
    SetupPy(#[from] SetupPyError),

    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse metadata in {path}: {message}")]
    Metadata { path: PathBuf, message: String },
}

/// Parse the dependency records out of a manifest file of the given kind.
pub fn parse_manifest(
    kind: SdistManifest,
    path: &Path,
) -> Result<Vec<DependentPackage>, ManifestError> {
    match kind {
        SdistManifest::PipRequirements => Ok(parse_requirements_txt(path)?.packages),
        SdistManifest::SetupCfg => Ok(parse_setup_cfg(path)?
            .install_requires
            .iter()
            .filter_map(|requirement| DependentPackage::from_specifier(requirement).ok())
            .collect()),
        SdistManifest::SetupPy => Ok(parse_setup_py(path)?
            .install_requires
            .unwrap_or_default()
            .iter()
            .filter_map(|requirement| DependentPackage::from_specifier(requirement).ok())
            .collect()),
        SdistManifest::WheelMetadata | SdistManifest::SdistPkgInfo => {
            let blob = fs::read(path).map_err(|source| ManifestError::Io {
                path: path.to_owned(),
                source,
            })?;
            let metadata = DistributionMetadata::try_from(blob.as_slice()).map_err(|e| {
                ManifestError::Metadata {
                    path: path.to_owned(),
                    message: e.to_string(),
                }
            })?;
            Ok(metadata
                .requires_dist
                .iter()
                .map(DependentPackage::from_requirement)
                .collect())
        }
    }
}
