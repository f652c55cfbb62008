use fs_err as fs;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::io::Write;
use std::path::PathBuf;

/// The characters kept verbatim in cache keys, everything else is
/// percent-encoded. This matches Python's `urllib.parse.quote_plus` which the
/// cache layout has historically used, so existing cache directories remain
/// valid.
const CACHE_KEY_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// A persistent, content-keyed cache of fetched URLs.
///
/// Entries are whole response bodies stored as flat files named by the
/// percent-encoded URL. There is no expiry; callers force a refresh when they
/// need one. Writes go through a temporary file in the same directory and are
/// renamed into place, so concurrent processes sharing the directory never
/// observe a partial entry.
#[derive(Debug)]
pub struct Cache {
    directory: PathBuf,
}

impl Cache {
    /// Open (creating if necessary) a cache rooted at the given directory.
    pub fn new(directory: PathBuf) -> std::io::Result<Self> {
        fs::create_dir_all(&directory)?;
        Ok(Cache { directory })
    }

    /// The directory under which sdist archives are unpacked.
    pub fn extracted_sdists_dir(&self) -> PathBuf {
        self.directory.join("extracted_sdists")
    }

    /// The path of the entry for a url, whether or not it exists.
    pub fn entry_path(&self, url: &str) -> PathBuf {
        let key = utf8_percent_encode(url.trim_matches('/'), CACHE_KEY_SET).to_string();
        self.directory.join(key)
    }

    /// Returns the cached body for a url, or `None` when it was never
    /// fetched.
    pub fn lookup(&self, url: &str) -> Option<Vec<u8>> {
        fs::read(self.entry_path(url)).ok()
    }

    /// Atomically store the body for a url, replacing any previous entry.
    pub fn store(&self, url: &str, body: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.entry_path(url);
        let mut writer = tempfile::NamedTempFile::new_in(&self.directory)?;
        writer.write_all(body)?;
        writer.as_file().sync_data()?;
        writer.persist(&path).map_err(|e| e.error)?;
        Ok(path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_store_then_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().to_path_buf()).unwrap();

        let url = "https://pypi.org/simple/flask/";
        assert!(cache.lookup(url).is_none());

        cache.store(url, b"<html></html>").unwrap();
        assert_eq!(cache.lookup(url).unwrap(), b"<html></html>");
    }

    #[test]
    fn test_keys_are_filesystem_safe() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().to_path_buf()).unwrap();

        let path = cache.entry_path("https://pypi.org/simple/flask/");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(!name.contains('/'));
        assert_eq!(name, "https%3A%2F%2Fpypi.org%2Fsimple%2Fflask");
    }

    #[test]
    fn test_store_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().to_path_buf()).unwrap();

        cache.store("https://example.com/a", b"one").unwrap();
        cache.store("https://example.com/a", b"two").unwrap();
        assert_eq!(cache.lookup("https://example.com/a").unwrap(), b"two");
    }
}
