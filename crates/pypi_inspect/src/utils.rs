use url::Url;

/// Helper trait for the archive readers which need both [`std::io::Read`] and
/// [`std::io::Seek`] on the same object.
pub trait ReadAndSeek: std::io::Read + std::io::Seek {}

impl<T> ReadAndSeek for T where T: std::io::Read + std::io::Seek {}

/// Normalize an index url according to pip standards: the base must end in a
/// slash so that joining a package name yields `{index}/{name}/`.
pub fn normalize_index_url(mut url: Url) -> Url {
    let path = url.path();
    if !path.ends_with('/') {
        url.set_path(&format!("{path}/"));
    }
    url
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_normalize_index_url() {
        let url = Url::parse("https://pypi.org/simple").unwrap();
        assert_eq!(normalize_index_url(url).as_str(), "https://pypi.org/simple/");

        let url = Url::parse("https://pypi.org/simple/").unwrap();
        assert_eq!(normalize_index_url(url).as_str(), "https://pypi.org/simple/");
    }
}
