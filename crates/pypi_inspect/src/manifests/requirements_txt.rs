use crate::types::{DependentPackage, RequirementExtraData};
use fs_err as fs;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// The result of parsing a pip requirements file: the dependency records plus
/// the file-level options that affect resolution.
#[derive(Debug, Default)]
pub struct RequirementsFile {
    /// One record per requirement line, including recognized-but-skipped
    /// forms such as editables and URLs.
    pub packages: Vec<DependentPackage>,

    /// Index options collected from `-i`/`--index-url`/`--extra-index-url`
    /// lines.
    pub extra_data: RequirementExtraData,
}

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum RequirementsTxtError {
    #[error("failed to read requirements file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Parse a pip-style requirements file. Nested `-r`/`--requirement` includes
/// are followed relative to the including file; include cycles are broken
/// silently.
pub fn parse_requirements_txt(path: &Path) -> Result<RequirementsFile, RequirementsTxtError> {
    let mut result = RequirementsFile::default();
    let mut seen = HashSet::new();
    parse_into(path, &mut result, &mut seen)?;
    Ok(result)
}

fn parse_into(
    path: &Path,
    result: &mut RequirementsFile,
    seen: &mut HashSet<PathBuf>,
) -> Result<(), RequirementsTxtError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_owned());
    if !seen.insert(canonical) {
        return Ok(());
    }

    let content = fs::read_to_string(path).map_err(|source| RequirementsTxtError::Io {
        path: path.to_owned(),
        source,
    })?;

    for line in logical_lines(&content) {
        let line = strip_comment(&line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(nested) = option_value(line, &["-r", "--requirement"]) {
            let nested_path = path
                .parent()
                .map_or_else(|| PathBuf::from(&nested), |dir| dir.join(&nested));
            parse_into(&nested_path, result, seen)?;
            continue;
        }

        if let Some(url) = option_value(line, &["-i", "--index-url"]) {
            match Url::parse(&url) {
                Ok(url) => result.extra_data.index_url = Some(url),
                Err(e) => tracing::warn!("ignoring malformed index url {url}: {e}"),
            }
            continue;
        }

        if let Some(url) = option_value(line, &["--extra-index-url"]) {
            match Url::parse(&url) {
                Ok(url) => result.extra_data.extra_index_urls.push(url),
                Err(e) => tracing::warn!("ignoring malformed extra index url {url}: {e}"),
            }
            continue;
        }

        if let Some(target) = option_value(line, &["-c", "--constraint"]) {
            let mut package = skipped_record(&target);
            package.flags.is_constraint = true;
            result.packages.push(package);
            continue;
        }

        if let Some(target) = option_value(line, &["-e", "--editable"]) {
            let mut package = skipped_record(&target);
            package.flags.is_editable = true;
            result.packages.push(package);
            continue;
        }

        // unsupported pip options such as --no-binary
        if line.starts_with('-') {
            tracing::debug!("ignoring requirements option: {line}");
            continue;
        }

        result.packages.push(requirement_record(line));
    }

    Ok(())
}

/// Join backslash-continued lines.
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for line in content.lines() {
        if let Some(stripped) = line.strip_suffix('\\') {
            current.push_str(stripped);
            continue;
        }
        current.push_str(line);
        lines.push(std::mem::take(&mut current));
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Drop a `#` comment. A `#` only starts a comment at the beginning of the
/// line or after whitespace, so checksum fragments inside URLs survive.
fn strip_comment(line: &str) -> String {
    if line.trim_start().starts_with('#') {
        return String::new();
    }
    match line.find(" #") {
        Some(position) => line[..position].to_owned(),
        None => line.to_owned(),
    }
}

/// If the line starts with one of the given options, return the option value.
fn option_value(line: &str, options: &[&str]) -> Option<String> {
    for option in options {
        if let Some(rest) = line.strip_prefix(option) {
            if let Some(value) = rest.strip_prefix('=') {
                return Some(value.trim().to_owned());
            }
            if rest.starts_with(char::is_whitespace) {
                return Some(rest.trim().to_owned());
            }
        }
    }
    None
}

/// Build the record for a plain requirement line, flagging the forms that are
/// recognized but not resolvable through an index.
fn requirement_record(line: &str) -> DependentPackage {
    let (specifier, has_hash) = match line.find("--hash") {
        Some(position) => (line[..position].trim(), true),
        None => (line, false),
    };

    let mut package = match DependentPackage::from_specifier(specifier) {
        Ok(package) => package,
        Err(_) => skipped_record(specifier),
    };
    package.flags.has_hash_options = has_hash;
    flag_requirement_shape(specifier, &mut package);
    package
}

/// A record for a requirement we carry through to the output but never hand
/// to the resolver.
fn skipped_record(target: &str) -> DependentPackage {
    let mut package = DependentPackage {
        purl: String::new(),
        extracted_requirement: target.to_owned(),
        scope: "install".to_owned(),
        is_runtime: true,
        is_optional: false,
        is_pinned: false,
        flags: Default::default(),
        extra_data: Default::default(),
    };
    flag_requirement_shape(target, &mut package);
    package
}

fn flag_requirement_shape(specifier: &str, package: &mut DependentPackage) {
    let flags = &mut package.flags;
    if ["git+", "hg+", "svn+", "bzr+"]
        .iter()
        .any(|vcs| specifier.starts_with(vcs))
    {
        flags.is_vcs_url = true;
    } else if specifier.contains("://") {
        flags.is_url_requirement = true;
        if specifier.ends_with(".whl") {
            flags.is_wheel = true;
        } else if [".zip", ".tar.gz", ".tar.bz2", ".tar.xz"]
            .iter()
            .any(|ext| specifier.ends_with(ext))
        {
            flags.is_archive = true;
        }
    } else if specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/')
        || specifier == "."
    {
        flags.is_local_path = true;
    } else if specifier.ends_with(".whl") {
        flags.is_wheel = true;
    } else if [".zip", ".tar.gz", ".tar.bz2", ".tar.xz"]
        .iter()
        .any(|ext| specifier.ends_with(ext))
    {
        flags.is_archive = true;
    }
}
