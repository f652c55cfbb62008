use crate::types::{
    DistributionMetadata, DistributionMetadataError, SDistFilename, SDistFormat,
};
use crate::utils::ReadAndSeek;
use flate2::read::GzDecoder;
use parking_lot::Mutex;
use std::io::{Cursor, Read, Seek};
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use thiserror::Error;
use zip::ZipArchive;

/// A source distribution archive.
///
/// An sdist only promises to contain the project's source tree under a single
/// top-level directory. Its metadata, when present at all, lives in a
/// `PKG-INFO` file at the root of that tree; dependency information usually
/// has to be dug out of the build manifests after unpacking.
pub struct SDist {
    name: SDistFilename,
    file: Mutex<Box<dyn ReadAndSeek + Send>>,
}

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum SDistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open sdist as a zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive format {0} is not extractable (only .tar.gz and .zip are)")]
    UnsupportedFormat(SDistFormat),

    #[error("no PKG-INFO found in archive")]
    NoPkgInfoFound,

    #[error("failed to parse PKG-INFO: {0}")]
    Metadata(#[from] DistributionMetadataError),
}

impl SDist {
    /// Open an sdist from a seekable reader.
    pub fn new(name: SDistFilename, file: Box<dyn ReadAndSeek + Send>) -> Self {
        Self {
            name,
            file: Mutex::new(file),
        }
    }

    /// Open an sdist from an in-memory archive body.
    pub fn from_bytes(name: SDistFilename, bytes: Vec<u8>) -> Self {
        Self::new(name, Box::new(Cursor::new(bytes)))
    }

    /// The parsed filename of this sdist.
    pub fn name(&self) -> &SDistFilename {
        &self.name
    }

    /// Read and parse the `PKG-INFO` of this sdist.
    pub fn read_package_info(&self) -> Result<(Vec<u8>, DistributionMetadata), SDistError> {
        let Some(blob) = self.find_entry("PKG-INFO")? else {
            return Err(SDistError::NoPkgInfoFound);
        };
        let metadata = DistributionMetadata::try_from(blob.as_slice())?;
        Ok((blob, metadata))
    }

    /// Unpack the whole archive into `target`. Only `.tar.gz` and `.zip`
    /// archives can be unpacked.
    pub fn extract_to(&self, target: &Path) -> Result<(), SDistError> {
        let mut file = self.file.lock();
        match archive_reader(&mut file, self.name.format)? {
            ArchiveReader::Tar(mut archive) => Ok(archive.unpack(target)?),
            ArchiveReader::Zip(mut archive) => Ok(archive.extract(target)?),
        }
    }

    /// Find the entry with the given path relative to the archive's single
    /// top-level directory and return its contents.
    fn find_entry(&self, wanted: impl AsRef<Path>) -> Result<Option<Vec<u8>>, SDistError> {
        let mut file = self.file.lock();

        fn skip_first_component(path: &Path) -> PathBuf {
            path.components()
                .skip_while(|c| matches!(c, Component::CurDir))
                .skip(1)
                .collect()
        }

        match archive_reader(&mut file, self.name.format)? {
            ArchiveReader::Tar(mut archive) => {
                for entry in archive.entries()? {
                    let mut entry = entry?;
                    if skip_first_component(entry.path()?.as_ref()) == wanted.as_ref() {
                        let mut bytes = Vec::new();
                        entry.read_to_end(&mut bytes)?;
                        return Ok(Some(bytes));
                    }
                }
                Ok(None)
            }
            ArchiveReader::Zip(mut archive) => {
                for index in 0..archive.len() {
                    let mut entry = archive.by_index(index)?;
                    let Some(path) = entry.enclosed_name().map(Path::to_path_buf) else {
                        tracing::warn!(
                            "ignoring {} as it cannot be converted to a valid path",
                            entry.name()
                        );
                        continue;
                    };
                    if skip_first_component(&path) == wanted.as_ref() {
                        let mut bytes = Vec::new();
                        entry.read_to_end(&mut bytes)?;
                        return Ok(Some(bytes));
                    }
                }
                Ok(None)
            }
        }
    }
}

enum MaybeGzReader<'a> {
    Plain(&'a mut Box<dyn ReadAndSeek + Send>),
    Gz(GzDecoder<&'a mut Box<dyn ReadAndSeek + Send>>),
}

impl<'a> Read for MaybeGzReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(reader) => reader.read(buf),
            Self::Gz(reader) => reader.read(buf),
        }
    }
}

enum ArchiveReader<'a> {
    Tar(Box<Archive<MaybeGzReader<'a>>>),
    Zip(Box<ZipArchive<&'a mut Box<dyn ReadAndSeek + Send>>>),
}

fn archive_reader<'a>(
    file: &'a mut Box<dyn ReadAndSeek + Send>,
    format: SDistFormat,
) -> Result<ArchiveReader<'a>, SDistError> {
    file.rewind()?;
    match format {
        SDistFormat::TarGz => Ok(ArchiveReader::Tar(Box::new(Archive::new(
            MaybeGzReader::Gz(GzDecoder::new(file)),
        )))),
        SDistFormat::Zip => Ok(ArchiveReader::Zip(Box::new(ZipArchive::new(file)?))),
        unsupported => Err(SDistError::UnsupportedFormat(unsupported)),
    }
}
