//! Settings loaded from the environment, threaded explicitly into the
//! orchestrator rather than read from globals.

use crate::index::PYPI_SIMPLE_URL;
use std::path::PathBuf;
use url::Url;

/// The environment variable prefixes recognized for every setting; the long
/// form wins when both are set.
const ENV_PREFIXES: &[&str] = &["PYTHON_INSPECTOR_", "PYINSP_"];

/// Baseline settings for a resolution run.
#[derive(Debug, Clone)]
pub struct Config {
    /// The python version used when the caller does not pick one.
    pub default_python_version: String,

    /// The operating system used when the caller does not pick one.
    pub default_operating_system: String,

    /// The configured index urls, in priority order.
    pub index_urls: Vec<Url>,

    /// Restrict resolution to the configured index urls: ignore index
    /// options found inside requirement files and do not inject the default
    /// index.
    pub use_only_configured_index_urls: bool,

    /// The directory for the persistent url cache and extracted sdists.
    pub cache_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_python_version: "38".to_owned(),
            default_operating_system: "linux".to_owned(),
            index_urls: vec![Url::parse(PYPI_SIMPLE_URL).expect("the default index url is valid")],
            use_only_configured_index_urls: false,
            cache_dir: default_cache_dir(),
        }
    }
}

impl Config {
    /// Load settings from `PYTHON_INSPECTOR_*` / `PYINSP_*` environment
    /// variables, falling back to the defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Some(value) = env_var("DEFAULT_PYTHON_VERSION") {
            config.default_python_version = value;
        }
        if let Some(value) = env_var("DEFAULT_OS") {
            config.default_operating_system = value;
        }
        if let Some(value) = env_var("INDEX_URL") {
            let urls = parse_index_urls(&value);
            if !urls.is_empty() {
                config.index_urls = urls;
            }
        }
        if let Some(value) = env_var("USE_ONLY_CONFIGURED_INDEX_URLS") {
            config.use_only_configured_index_urls =
                matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(value) = env_var("CACHE_THIRDPARTY_DIR") {
            config.cache_dir = PathBuf::from(value);
        }

        config
    }
}

fn env_var(name: &str) -> Option<String> {
    ENV_PREFIXES
        .iter()
        .find_map(|prefix| std::env::var(format!("{prefix}{name}")).ok())
        .filter(|value| !value.is_empty())
}

/// Index urls can be given as a whitespace-separated list or as a JSON
/// array.
fn parse_index_urls(value: &str) -> Vec<Url> {
    let entries: Vec<String> = match serde_json::from_str(value) {
        Ok(entries) => entries,
        Err(_) => value.split_whitespace().map(ToOwned::to_owned).collect(),
    };
    entries
        .iter()
        .filter_map(|entry| match Url::parse(entry) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!("ignoring malformed index url {entry}: {e}");
                None
            }
        })
        .collect()
}

/// `~/.cache/python_inspector`, or a cache directory under the working
/// directory when no home directory can be determined.
fn default_cache_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(".cache/python_inspector"))
        .unwrap_or_else(|| PathBuf::from(".cache/python_inspector"))
}
