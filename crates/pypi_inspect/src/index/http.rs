use super::cache::Cache;
use miette::Diagnostic;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use url::Url;

/// The per-request timeout applied to every index and archive fetch.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// The initial delay after an HTTP 429 response. Doubles on every retry.
const BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Retrying stops once the next delay would exceed this.
const BACKOFF_MAX: Duration = Duration::from_secs(20);

/// HTTP basic credentials for an authenticated index.
#[derive(Debug, Clone)]
pub struct IndexCredentials {
    /// The login name.
    pub login: String,
    /// The password.
    pub password: String,
}

#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum FetchError {
    #[error("failed HTTP request from {url} with status {status}")]
    RemoteNotFetched { url: Url, status: StatusCode },

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
}

/// An HTTP client that persists every successful response body in a
/// [`Cache`].
///
/// `fetch` serves `https://` URLs over the network, and `file://` URLs and
/// absolute paths straight from the filesystem. A cached entry short-circuits
/// the network unless the caller forces a refresh.
#[derive(Debug)]
pub struct CachedClient {
    client: reqwest::Client,
    cache: Cache,
}

impl CachedClient {
    /// Create a client around the given cache with the default timeout.
    pub fn new(cache: Cache) -> Result<Self, reqwest::Error> {
        Self::with_timeout(cache, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a custom per-request timeout.
    pub fn with_timeout(cache: Cache, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(CachedClient {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            cache,
        })
    }

    /// The cache this client writes through.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Fetch the body at `location` through the cache. `location` is a URL or
    /// an absolute filesystem path. When `force` is set (or no entry exists)
    /// the body is re-fetched and the entry atomically replaced; otherwise
    /// the cached bytes are returned without touching the network.
    pub async fn fetch(
        &self,
        location: &str,
        credentials: Option<&IndexCredentials>,
        force: bool,
    ) -> Result<Vec<u8>, FetchError> {
        if !force {
            if let Some(body) = self.cache.lookup(location) {
                tracing::debug!(location, "cache hit");
                return Ok(body);
            }
        }

        tracing::debug!(location, "cache miss");
        let body = if let Some(path) = location.strip_prefix("file://") {
            fs_err::read(path)?
        } else if location.starts_with('/') {
            fs_err::read(location)?
        } else if location.starts_with("https://") {
            let url = Url::parse(location).map_err(|_| {
                FetchError::UnsupportedScheme(location.to_owned())
            })?;
            self.fetch_remote(url, credentials).await?
        } else {
            return Err(FetchError::UnsupportedScheme(location.to_owned()));
        };

        self.cache.store(location, &body)?;
        Ok(body)
    }

    /// Fetch a JSON document without going through the cache. Returns `None`
    /// for any non-200 response, mirroring how the PyPI JSON API signals an
    /// unknown release.
    pub async fn get_json(&self, url: &str) -> Result<Option<serde_json::Value>, FetchError> {
        let url = Url::parse(url).map_err(|_| FetchError::UnsupportedScheme(url.to_owned()))?;
        tracing::info!(url=%url, "executing json request");
        let response = self.client.get(url).send().await?;
        if response.status() != StatusCode::OK {
            return Ok(None);
        }
        Ok(Some(response.json().await?))
    }

    /// Perform a GET request, waiting out HTTP 429 throttling with an
    /// exponentially increasing delay.
    async fn fetch_remote(
        &self,
        url: Url,
        credentials: Option<&IndexCredentials>,
    ) -> Result<Vec<u8>, FetchError> {
        let mut delay = BACKOFF_INITIAL;
        loop {
            tracing::info!(url=%url, "executing request");
            let mut request = self.client.get(url.clone());
            if let Some(credentials) = credentials {
                request = request.basic_auth(&credentials.login, Some(&credentials.password));
            }

            let response = request.send().await?;
            let status = response.status();
            if status == StatusCode::OK {
                return Ok(response.bytes().await?.to_vec());
            }

            if status == StatusCode::TOO_MANY_REQUESTS && delay <= BACKOFF_MAX {
                tracing::warn!(url=%url, ?delay, "throttled by remote, backing off");
                sleep(delay).await;
                delay *= 2;
                continue;
            }

            return Err(FetchError::RemoteNotFetched { url, status });
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_fetch_local_file_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("cache")).unwrap();
        let client = CachedClient::new(cache).unwrap();

        let source = dir.path().join("page.html");
        fs_err::write(&source, b"<html/>").unwrap();

        let location = format!("file://{}", source.display());
        let body = client.fetch(&location, None, false).await.unwrap();
        assert_eq!(body, b"<html/>");

        // a second fetch is served from the cache even after the source is gone
        fs_err::remove_file(&source).unwrap();
        let body = client.fetch(&location, None, false).await.unwrap();
        assert_eq!(body, b"<html/>");
    }

    #[tokio::test]
    async fn test_force_refetches() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("cache")).unwrap();
        let client = CachedClient::new(cache).unwrap();

        let source = dir.path().join("page.html");
        fs_err::write(&source, b"one").unwrap();
        let location = format!("file://{}", source.display());

        assert_eq!(client.fetch(&location, None, false).await.unwrap(), b"one");
        fs_err::write(&source, b"two").unwrap();
        assert_eq!(client.fetch(&location, None, false).await.unwrap(), b"one");
        assert_eq!(client.fetch(&location, None, true).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("cache")).unwrap();
        let client = CachedClient::new(cache).unwrap();

        assert!(matches!(
            client.fetch("ftp://example.com/x", None, false).await,
            Err(FetchError::UnsupportedScheme(_))
        ));
    }
}
