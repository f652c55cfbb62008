use configparser::ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The subset of a `setup.cfg` the resolver cares about.
#[derive(Debug, Default)]
pub struct SetupCfgData {
    /// The `[metadata] name` value.
    pub name: Option<String>,

    /// The `[options] install_requires` entries, one requirement per line.
    pub install_requires: Vec<String>,

    /// The `[options] python_requires` specifier.
    pub python_requires: Option<String>,
}

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum SetupCfgError {
    #[error("failed to parse setup.cfg {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Parse the declared dependencies out of a `setup.cfg`.
pub fn parse_setup_cfg(path: &Path) -> Result<SetupCfgData, SetupCfgError> {
    let mut ini = Ini::new();
    ini.set_multiline(true);
    ini.load(path).map_err(|message| SetupCfgError::Parse {
        path: path.to_owned(),
        message,
    })?;

    let install_requires = ini
        .get("options", "install_requires")
        .map(|value| {
            value
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();

    Ok(SetupCfgData {
        name: ini.get("metadata", "name"),
        install_requires,
        python_requires: ini.get("options", "python_requires"),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_setup_cfg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup.cfg");
        let mut file = fs_err::File::create(&path).unwrap();
        file.write_all(
            b"[metadata]\n\
              name = frob\n\
              \n\
              [options]\n\
              python_requires = >=3.7\n\
              install_requires =\n\
                  click>=8.0\n\
                  itsdangerous>=2.0\n",
        )
        .unwrap();

        let parsed = parse_setup_cfg(&path).unwrap();
        assert_eq!(parsed.name.as_deref(), Some("frob"));
        assert_eq!(parsed.python_requires.as_deref(), Some(">=3.7"));
        assert_eq!(parsed.install_requires, vec!["click>=8.0", "itsdangerous>=2.0"]);
    }

    #[test]
    fn test_setup_cfg_without_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup.cfg");
        fs_err::write(&path, "[metadata]\nname = frob\n").unwrap();

        let parsed = parse_setup_cfg(&path).unwrap();
        assert!(parsed.install_requires.is_empty());
        assert!(parsed.python_requires.is_none());
    }
}
