use crate::types::{DistributionMetadata, DistributionMetadataError, WheelFilename};
use crate::utils::ReadAndSeek;
use parking_lot::Mutex;
use std::io::{Cursor, Read};
use thiserror::Error;
use zip::result::ZipError;
use zip::ZipArchive;

/// A wheel archive. Wheels are zip files carrying the built package next to a
/// `{name}-{version}.dist-info/` directory with the package metadata.
pub struct Wheel {
    name: WheelFilename,
    archive: Mutex<ZipArchive<Box<dyn ReadAndSeek + Send>>>,
}

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum WheelError {
    #[error("failed to open wheel as a zip archive: {0}")]
    Zip(#[from] ZipError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("no .dist-info/METADATA found in wheel")]
    MetadataMissing,

    #[error("failed to parse wheel METADATA: {0}")]
    Metadata(#[from] DistributionMetadataError),

    #[error("name mismatch between METADATA and filename ({metadata} != {filename})")]
    NameMismatch { metadata: String, filename: String },
}

impl Wheel {
    /// Open a wheel from a seekable reader.
    pub fn new(
        name: WheelFilename,
        bytes: Box<dyn ReadAndSeek + Send>,
    ) -> Result<Self, WheelError> {
        Ok(Self {
            name,
            archive: Mutex::new(ZipArchive::new(bytes)?),
        })
    }

    /// Open a wheel from an in-memory archive body.
    pub fn from_bytes(name: WheelFilename, bytes: Vec<u8>) -> Result<Self, WheelError> {
        Self::new(name, Box::new(Cursor::new(bytes)))
    }

    /// The parsed filename of this wheel.
    pub fn name(&self) -> &WheelFilename {
        &self.name
    }

    /// Read and parse the `METADATA` file of this wheel. Returns the raw
    /// bytes alongside the parsed form so callers can cache the blob.
    pub fn metadata(&self) -> Result<(Vec<u8>, DistributionMetadata), WheelError> {
        let mut archive = self.archive.lock();

        let metadata_path = find_metadata_entry(archive.file_names(), &self.name)
            .ok_or(WheelError::MetadataMissing)?;

        let mut blob = Vec::new();
        archive.by_name(&metadata_path)?.read_to_end(&mut blob)?;

        let metadata = DistributionMetadata::try_from(blob.as_slice())?;
        if metadata.name != self.name.distribution {
            return Err(WheelError::NameMismatch {
                metadata: metadata.name.as_source_str().to_owned(),
                filename: self.name.distribution.as_source_str().to_owned(),
            });
        }
        Ok((blob, metadata))
    }
}

/// Locate the `*.dist-info/METADATA` entry. A well-formed wheel has exactly
/// one dist-info directory matching its own name and version; if that is not
/// found the first dist-info directory in the archive is used.
fn find_metadata_entry<'a>(
    file_names: impl Iterator<Item = &'a str>,
    name: &WheelFilename,
) -> Option<String> {
    let mut candidates: Vec<&str> = file_names
        .filter(|path| {
            let Some((dir, file)) = path.split_once('/') else {
                return false;
            };
            file == "METADATA" && dir.ends_with(".dist-info")
        })
        .collect();
    candidates.sort_unstable();

    let expected = format!(
        "{}-{}.dist-info/METADATA",
        name.distribution.as_source_str().replace('-', "_"),
        name.version
    );
    candidates
        .iter()
        .find(|&&path| path == expected)
        .or_else(|| candidates.first())
        .map(|&path| path.to_owned())
}
