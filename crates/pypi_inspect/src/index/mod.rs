//! Fetching and caching of package information from PEP 503 "simple"
//! repositories.

mod auth;
mod cache;
pub mod html;
mod http;
mod repository;

pub use auth::{credentials_for_url, find_netrc_file, parse_netrc, NetrcError};
pub use cache::Cache;
pub use html::{parse_hash, Link};
pub use http::{CachedClient, FetchError, IndexCredentials, DEFAULT_REQUEST_TIMEOUT};
pub use repository::{PypiSimpleRepository, PYPI_SIMPLE_URL};
