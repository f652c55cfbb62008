//! Live evaluation of a `setup.py` with the `setup()` entry point mocked out.
//!
//! Running a `setup.py` executes arbitrary code, so this is an explicit
//! opt-in. The evaluation itself happens in a Python subprocess running a
//! small stdlib-only shim: the shim intercepts `setuptools.setup` /
//! `distutils.core.setup`, runs the file as `__main__` with the file's
//! directory as working directory, and reports the captured keyword arguments
//! as JSON on stdout. Folding extras, evaluating markers and normalizing
//! specifiers then happens on this side of the process boundary.

use crate::types::Requirement;
use pep508_rs::{MarkerEnvironment, VersionOrUrl};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;

/// The shim that runs inside the Python subprocess. It deliberately uses
/// only the standard library so it works with any interpreter new enough to
/// run the `setup.py` itself.
const SETUP_EVAL_SHIM: &str = r#"
import ast
import json
import os
import sys
from unittest import mock


def find_setup_provider(source, setup_file):
    asnames = {}
    providers = []
    tree = ast.parse(source)
    for node in ast.walk(tree):
        if isinstance(node, ast.Import):
            for name in node.names:
                asnames[name.asname or name.name] = name.name
    for node in ast.walk(tree):
        if isinstance(node, ast.ImportFrom) and "setup" in [n.name for n in node.names]:
            providers.append(node.module)
        elif (
            isinstance(node, ast.Expr)
            and isinstance(node.value, ast.Call)
            and isinstance(node.value.func, ast.Attribute)
            and node.value.func.attr == "setup"
        ):
            value = node.value.func.value
            if isinstance(value, ast.Name):
                name = value.id
            elif isinstance(value, ast.Attribute) and isinstance(value.value, ast.Name):
                name = "{}.{}".format(value.value.id, value.attr)
            else:
                continue
            providers.append(asnames.get(name, name))

    candidates = [p for p in providers if p in ("setuptools", "distutils.core")]
    if not candidates:
        print(
            "warning: unable to recognize setup provider in {}: defaulting to "
            "'distutils.core'.".format(setup_file),
            file=sys.stderr,
        )
        return "distutils.core"
    if len(set(candidates)) > 1:
        print(
            "warning: ambiguous setup provider in {}: candidates are {}, defaulting "
            "to 'distutils.core'.".format(setup_file, sorted(set(candidates))),
            file=sys.stderr,
        )
        return "distutils.core"
    return candidates[0]


def main():
    setup_file = os.path.abspath(sys.argv[1])
    with open(setup_file) as handle:
        source = handle.read()

    os.chdir(os.path.dirname(setup_file))
    sys.path.insert(0, os.path.dirname(setup_file))

    provider = find_setup_provider(source, setup_file)
    if provider == "setuptools":
        import setuptools as target
    else:
        import distutils.core as target

    with mock.patch.object(target, "setup") as mocked:
        exec(
            compile(source, setup_file, "exec"),
            {"__file__": setup_file, "__name__": "__main__"},
        )

    if mocked.call_args is None:
        json.dump({}, sys.stdout)
        return

    kwargs = mocked.call_args[1]
    json.dump(
        {
            "install_requires": list(kwargs.get("install_requires") or []),
            "extras_require": {
                key: list(value)
                for key, value in (kwargs.get("extras_require") or {}).items()
            },
            "test_requires": list(kwargs.get("test_requires") or []),
            "setup_requires": list(kwargs.get("setup_requires") or []),
        },
        sys.stdout,
    )


main()
"#;

/// The requirement keyword arguments a `setup()` call was given.
#[derive(Debug, Default, Deserialize)]
struct CapturedSetupArgs {
    #[serde(default)]
    install_requires: Vec<String>,
    #[serde(default)]
    extras_require: HashMap<String, Vec<String>>,
    #[serde(default)]
    test_requires: Vec<String>,
    #[serde(default)]
    setup_requires: Vec<String>,
}

/// How far to normalize the captured specifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpecifierLevel {
    /// Keep ranges, but pin compatible-release specifiers to their range
    /// form.
    #[default]
    Range,

    /// Rewrite every floor to an exact pin, for reproducing the minimal
    /// supported set. Requires every requirement to carry a floor.
    Min,
}

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum SetupPyEvalError {
    #[error("failed to run {python}: {source}")]
    Spawn {
        python: String,
        source: std::io::Error,
    },

    #[error("setup.py evaluation failed: {stderr}")]
    EvaluationFailed { stderr: String },

    #[error("setup.py evaluation produced invalid output: {0}")]
    InvalidOutput(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("inconsistent comparators in requirement '{0}'")]
    InconsistentComparators(String),

    #[error("specify a minimal version of '{0}' using comparators such as \">=\" or \"==\"")]
    MissingFloor(String),
}

/// Evaluate a `setup.py` and return the applicable install requirements.
///
/// `extras` selects which `extras_require` groups fold into the install set;
/// the pseudo extras `test` and `setup` fold the matching legacy keyword
/// arguments. Requirements whose marker does not apply to `markers` are
/// dropped, and markers are removed from the surviving requirements.
pub async fn evaluate_setup_py(
    python: &str,
    setup_py: &Path,
    extras: &BTreeSet<String>,
    level: SpecifierLevel,
    markers: &MarkerEnvironment,
) -> Result<Vec<Requirement>, SetupPyEvalError> {
    let mut shim = tempfile::NamedTempFile::new()?;
    shim.write_all(SETUP_EVAL_SHIM.as_bytes())?;
    shim.flush()?;

    let working_dir = setup_py.parent().unwrap_or_else(|| Path::new("."));
    let output = tokio::process::Command::new(python)
        .arg(shim.path())
        .arg(setup_py)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| SetupPyEvalError::Spawn {
            python: python.to_owned(),
            source,
        })?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stderr.lines().filter(|line| line.starts_with("warning:")) {
        tracing::warn!("{line}");
    }
    if !output.status.success() {
        return Err(SetupPyEvalError::EvaluationFailed {
            stderr: stderr.into_owned(),
        });
    }

    let captured: CapturedSetupArgs = serde_json::from_slice(&output.stdout)?;
    normalize_captured_requirements(captured, extras, level, markers)
}

/// Fold the captured keyword arguments into a single requirement list and
/// apply the level rewrites.
fn normalize_captured_requirements(
    captured: CapturedSetupArgs,
    extras: &BTreeSet<String>,
    level: SpecifierLevel,
    markers: &MarkerEnvironment,
) -> Result<Vec<Requirement>, SetupPyEvalError> {
    let mut install_requires = captured.install_requires;

    // extras_require keys can carry a legacy `name:condition` marker suffix
    for (key, requirements) in &captured.extras_require {
        let (name, condition) = match key.split_once(':') {
            Some((name, condition)) => (name, Some(condition)),
            None => (key.as_str(), None),
        };
        if !name.is_empty() && !extras.contains(name) {
            continue;
        }
        for requirement in requirements {
            match condition {
                Some(condition) => install_requires.push(format!("{requirement}; {condition}")),
                None => install_requires.push(requirement.clone()),
            }
        }
    }

    if extras.contains("test") {
        install_requires.extend(captured.test_requires);
    }
    if extras.contains("setup") {
        install_requires.extend(captured.setup_requires);
    }

    let mut by_name: BTreeMap<String, Requirement> = BTreeMap::new();
    for requirement_str in install_requires {
        let requirement: Requirement = match requirement_str.parse() {
            Ok(requirement) => requirement,
            Err(e) => {
                tracing::warn!("ignoring unparsable requirement '{requirement_str}': {e}");
                continue;
            }
        };

        if let Some(marker) = &requirement.marker {
            if !marker.evaluate(markers, &[]) {
                continue;
            }
        }
        if by_name.contains_key(&requirement.name) {
            continue;
        }

        let normalized = normalize_specifier(&requirement, level)?;
        by_name.insert(requirement.name.clone(), normalized);
    }

    Ok(by_name.into_values().collect())
}

/// Apply the level rewrites to one requirement, dropping its marker.
fn normalize_specifier(
    requirement: &Requirement,
    level: SpecifierLevel,
) -> Result<Requirement, SetupPyEvalError> {
    let name = match &requirement.extras {
        Some(extras) if !extras.is_empty() => {
            format!("{}[{}]", requirement.name, extras.join(","))
        }
        _ => requirement.name.clone(),
    };

    let mut comparators: BTreeMap<String, String> = BTreeMap::new();
    if let Some(VersionOrUrl::VersionSpecifier(specifiers)) = &requirement.version_or_url {
        for specifier in specifiers.iter() {
            let repr = specifier.to_string();
            let operator_len = repr
                .find(|c: char| c.is_ascii_digit() || c == '*')
                .unwrap_or(repr.len());
            let (operator, version) = repr.split_at(operator_len);
            comparators.insert(operator.trim().to_owned(), version.trim().to_owned());
        }
    }

    if (comparators.contains_key(">=") && comparators.contains_key(">"))
        || (comparators.contains_key("<=") && comparators.contains_key("<"))
    {
        return Err(SetupPyEvalError::InconsistentComparators(
            requirement.to_string(),
        ));
    }

    let rewritten = if let Some(version) = comparators.get("==") {
        format!("{name}=={version}")
    } else if let Some(version) = comparators.get(">=") {
        match level {
            SpecifierLevel::Min => format!("{name}=={version}"),
            SpecifierLevel::Range => requirement.to_string(),
        }
    } else if let Some(version) = comparators.get("~=") {
        match level {
            SpecifierLevel::Min => format!("{name}=={version}"),
            SpecifierLevel::Range => {
                let release = version.rsplit_once('.').map_or("", |(release, _)| release);
                format!("{name}>={version},=={release}.*")
            }
        }
    } else if comparators.contains_key(">") {
        match level {
            SpecifierLevel::Min => return Err(SetupPyEvalError::MissingFloor(name)),
            SpecifierLevel::Range => requirement.to_string(),
        }
    } else {
        match level {
            SpecifierLevel::Min => return Err(SetupPyEvalError::MissingFloor(name)),
            SpecifierLevel::Range => name,
        }
    };

    // markers have already been applied, strip them from the output
    let rewritten = match rewritten.split_once(';') {
        Some((requirement, _marker)) => requirement.trim().to_owned(),
        None => rewritten,
    };
    Ok(rewritten.parse().expect("rewritten requirements are valid"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::environment::Environment;

    fn normalize(
        captured: CapturedSetupArgs,
        extras: &[&str],
        level: SpecifierLevel,
    ) -> Result<Vec<String>, SetupPyEvalError> {
        let environment = Environment::from_python_version_and_os("310", "linux").unwrap();
        let extras = extras.iter().map(|s| s.to_string()).collect();
        normalize_captured_requirements(captured, &extras, level, environment.markers())
            .map(|requirements| requirements.iter().map(ToString::to_string).collect())
    }

    #[test]
    fn test_markers_are_applied_and_stripped() {
        let captured = CapturedSetupArgs {
            install_requires: vec![
                "click>=8.0".into(),
                "colorama==0.4.5; platform_system == \"Windows\"".into(),
            ],
            ..Default::default()
        };
        let requirements = normalize(captured, &[], SpecifierLevel::Range).unwrap();
        assert_eq!(requirements.len(), 1);
        assert!(requirements[0].starts_with("click"));
    }

    #[test]
    fn test_extras_folding() {
        let captured = CapturedSetupArgs {
            install_requires: vec!["click>=8.0".into()],
            extras_require: HashMap::from([
                ("async".to_owned(), vec!["asgiref>=3.2".to_owned()]),
                ("docs".to_owned(), vec!["sphinx".to_owned()]),
            ]),
            ..Default::default()
        };
        let requirements = normalize(captured, &["async"], SpecifierLevel::Range).unwrap();
        assert_eq!(requirements.len(), 2);
        assert!(requirements.iter().any(|r| r.starts_with("asgiref")));
        assert!(!requirements.iter().any(|r| r.starts_with("sphinx")));
    }

    #[test]
    fn test_min_level_pins_floors() {
        let captured = CapturedSetupArgs {
            install_requires: vec!["click>=8.0".into(), "jinja2~=3.1.2".into()],
            ..Default::default()
        };
        let requirements = normalize(captured, &[], SpecifierLevel::Min).unwrap();
        assert!(requirements.contains(&"click ==8.0".to_owned())
            || requirements.contains(&"click==8.0".to_owned()));
        assert!(requirements.iter().any(|r| r.contains("==3.1.2")));
    }

    #[test]
    fn test_compatible_release_expands_to_range() {
        let captured = CapturedSetupArgs {
            install_requires: vec!["zipp~=3.8.0".into()],
            ..Default::default()
        };
        let requirements = normalize(captured, &[], SpecifierLevel::Range).unwrap();
        assert_eq!(requirements.len(), 1);
        assert!(requirements[0].contains(">=3.8.0"));
        assert!(requirements[0].contains("==3.8.*"));
    }

    #[test]
    fn test_min_level_requires_a_floor() {
        let captured = CapturedSetupArgs {
            install_requires: vec!["click>8.0".into()],
            ..Default::default()
        };
        assert!(matches!(
            normalize(captured, &[], SpecifierLevel::Min),
            Err(SetupPyEvalError::MissingFloor(_))
        ));
    }
}
