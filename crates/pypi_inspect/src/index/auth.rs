//! netrc credential lookup for authenticated indexes.

use super::http::IndexCredentials;
use netrc::Netrc;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum NetrcError {
    #[error("missing netrc file {0}")]
    Missing(PathBuf),

    #[error("failed to parse netrc file: {0}")]
    Parse(String),
}

/// Locate the netrc file to use: the explicit path when given (it must
/// exist), otherwise `~/.netrc` then `~/_netrc`, otherwise none.
pub fn find_netrc_file(explicit: Option<&Path>) -> Result<Option<PathBuf>, NetrcError> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(NetrcError::Missing(path.to_owned()));
        }
        return Ok(Some(path.to_owned()));
    }

    let Some(home) = home_dir() else {
        return Ok(None);
    };
    for candidate in [home.join(".netrc"), home.join("_netrc")] {
        if candidate.exists() {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Parse a netrc file.
pub fn parse_netrc(path: &Path) -> Result<Netrc, NetrcError> {
    Netrc::from_file(path).map_err(|e| NetrcError::Parse(e.to_string()))
}

/// Look up basic credentials for an index url. Machines are matched by
/// hostname only; schemes and ports are ignored. A `default` entry applies
/// when no machine matches.
pub fn credentials_for_url(netrc: &Netrc, url: &Url) -> Option<IndexCredentials> {
    let host = url.host_str()?;
    let authenticator = netrc
        .hosts
        .get(host)
        .or_else(|| netrc.hosts.get("default"))?;
    if authenticator.login.is_empty() || authenticator.password.is_empty() {
        return None;
    }
    Some(IndexCredentials {
        login: authenticator.login.clone(),
        password: authenticator.password.clone(),
    })
}
