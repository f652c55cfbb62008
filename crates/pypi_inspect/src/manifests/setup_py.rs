use fs_err as fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What a static scan of a `setup.py` can tell us without executing it:
/// literal keyword arguments of the `setup(...)` call.
#[derive(Debug, Default)]
pub struct SetupPyData {
    /// The literal `name=...` argument.
    pub name: Option<String>,

    /// The `install_requires=[...]` argument. `None` when the argument is
    /// absent or is not a list of string literals; `Some(vec![])` when it is
    /// literally empty.
    pub install_requires: Option<Vec<String>>,

    /// True when an `install_requires` argument is present but its value is
    /// computed at runtime (a name, a call, a comprehension) rather than
    /// written as a list of string literals. Only evaluating the file can
    /// reveal such dependencies.
    pub computed_install_requires: bool,

    /// The literal `python_requires=...` argument.
    pub python_requires: Option<String>,

    /// Whether the source mentions a `*_requires` keyword at all. When it
    /// does but nothing could be extracted statically, the dependencies are
    /// only collectable by evaluating the file.
    pub mentions_requires: bool,
}

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum SetupPyError {
    #[error("failed to read setup.py {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Statically scan a `setup.py` file.
pub fn parse_setup_py(path: &Path) -> Result<SetupPyData, SetupPyError> {
    let source = fs::read_to_string(path).map_err(|source| SetupPyError::Io {
        path: path.to_owned(),
        source,
    })?;
    Ok(scan_setup_py(&source))
}

/// Statically scan `setup.py` source text.
///
/// This is a token-level scan, not a Python parser: it finds the `setup(...)`
/// call and extracts keyword arguments whose values are string literals or
/// lists of string literals. Anything computed at runtime comes back as
/// `None`.
pub fn scan_setup_py(source: &str) -> SetupPyData {
    let setup_calls = count_setup_calls(source);
    if setup_calls > 1 {
        tracing::warn!("found {setup_calls} setup() calls, keyword scan may be ambiguous");
    }

    let install_requires = find_string_list_argument(source, "install_requires");
    let computed_install_requires =
        install_requires.is_none() && find_keyword_value(source, "install_requires").is_some();

    SetupPyData {
        name: find_string_argument(source, "name"),
        install_requires,
        computed_install_requires,
        python_requires: find_string_argument(source, "python_requires"),
        mentions_requires: source.contains("_require"),
    }
}

/// True if the manifest source references a requirements file, the heuristic
/// for "the requirements.txt next to this manifest is authoritative".
pub fn mentions_requirements_txt(source: &str) -> bool {
    source.contains("requirements.txt")
}

fn count_setup_calls(source: &str) -> usize {
    let bytes = source.as_bytes();
    let mut count = 0;
    let mut search_from = 0;
    while let Some(position) = source[search_from..].find("setup") {
        let start = search_from + position;
        let end = start + "setup".len();
        search_from = end;

        // reject identifiers that merely contain "setup"
        if start > 0 {
            let before = bytes[start - 1];
            if before.is_ascii_alphanumeric() || before == b'_' {
                continue;
            }
        }
        let rest = source[end..].trim_start();
        if rest.starts_with('(') {
            count += 1;
        }
    }
    count
}

/// Find `key = <string literal>` in the source and return the literal.
fn find_string_argument(source: &str, key: &str) -> Option<String> {
    let rest = find_keyword_value(source, key)?;
    let (literal, _) = scan_string_literal(rest)?;
    Some(literal)
}

/// Find `key = [ <string literals> ]` in the source. Returns `None` when the
/// keyword is absent or the value is not a literal list.
fn find_string_list_argument(source: &str, key: &str) -> Option<Vec<String>> {
    let rest = find_keyword_value(source, key)?;
    let rest = rest.strip_prefix('[')?;

    let mut items = Vec::new();
    let mut rest = rest.trim_start();
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.starts_with(']') {
            return Some(items);
        }
        let (literal, after) = scan_string_literal(rest)?;
        items.push(literal);
        rest = after;
    }
}

/// Position the scan right after `key` and its `=` sign, skipping whitespace.
fn find_keyword_value<'a>(source: &'a str, key: &str) -> Option<&'a str> {
    let bytes = source.as_bytes();
    let mut search_from = 0;
    while let Some(position) = source[search_from..].find(key) {
        let start = search_from + position;
        let end = start + key.len();
        search_from = end;

        if start > 0 {
            let before = bytes[start - 1];
            if before.is_ascii_alphanumeric() || before == b'_' {
                continue;
            }
        }
        let rest = source[end..].trim_start();
        if let Some(rest) = rest.strip_prefix('=') {
            // reject comparisons like `==`
            if rest.starts_with('=') {
                continue;
            }
            return Some(rest.trim_start());
        }
    }
    None
}

/// Scan a python string literal at the start of the input. Returns the
/// unescaped value and the remaining input.
fn scan_string_literal(input: &str) -> Option<(String, &str)> {
    let mut chars = input.char_indices();
    let (_, quote) = chars.next()?;
    if quote != '\'' && quote != '"' {
        return None;
    }

    let mut value = String::new();
    let mut escaped = false;
    for (position, c) in chars {
        if escaped {
            value.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Some((value, &input[position + c.len_utf8()..]));
        } else {
            value.push(c);
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    const SIMPLE_SETUP: &str = r#"
from setuptools import setup

setup(
    name="frob",
    version="1.0",
    python_requires=">=3.7",
    install_requires=[
        "click>=8.0",
        'itsdangerous>=2.0',
    ],
)
"#;

    #[test]
    fn test_literal_arguments() {
        let data = scan_setup_py(SIMPLE_SETUP);
        assert_eq!(data.name.as_deref(), Some("frob"));
        assert_eq!(data.python_requires.as_deref(), Some(">=3.7"));
        assert_eq!(
            data.install_requires.as_deref(),
            Some(&["click>=8.0".to_owned(), "itsdangerous>=2.0".to_owned()][..])
        );
        assert!(!data.computed_install_requires);
        assert!(data.mentions_requires);
    }

    #[test]
    fn test_computed_list_is_not_extracted() {
        let data = scan_setup_py(
            "from setuptools import setup\nsetup(name='frob', install_requires=reqs)\n",
        );
        assert_eq!(data.install_requires, None);
        assert!(data.computed_install_requires);
        assert!(data.mentions_requires);

        let data = scan_setup_py(
            "from setuptools import setup\nsetup(install_requires=collect_requirements())\n",
        );
        assert_eq!(data.install_requires, None);
        assert!(data.computed_install_requires);
    }

    #[test]
    fn test_empty_literal_list() {
        let data =
            scan_setup_py("from distutils.core import setup\nsetup(install_requires=[])\n");
        assert_eq!(data.install_requires.as_deref(), Some(&[][..]));
        assert!(!data.computed_install_requires);
    }

    #[test]
    fn test_no_requires_mentions() {
        let data = scan_setup_py("from distutils.core import setup\nsetup(name='frob')\n");
        assert!(!data.mentions_requires);
        assert!(!data.computed_install_requires);
        assert_eq!(data.install_requires, None);
    }

    #[test]
    fn test_requirements_txt_heuristic() {
        assert!(mentions_requirements_txt(
            "setup(install_requires=open('requirements.txt').readlines())"
        ));
        assert!(!mentions_requirements_txt(SIMPLE_SETUP));
    }
}
