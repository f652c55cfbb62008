use super::insecure::{evaluate_setup_py, SetupPyEvalError, SpecifierLevel};
use crate::artifacts::{SDist, SDistError, Wheel, WheelError};
use crate::environment::Environment;
use crate::index::{CachedClient, FetchError, PypiSimpleRepository};
use crate::manifests;
use crate::types::{NormalizedPackageName, PypiVersion, Requirement};
use elsa::sync::FrozenMap;
use fs_err as fs;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Options controlling how dependencies are extracted from sdists.
#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    /// Evaluate `setup.py` files by running them with `setup()` mocked.
    /// Executes arbitrary code from the sdist; off unless explicitly enabled.
    pub analyze_setup_py_insecurely: bool,

    /// The python executable used for the insecure evaluation.
    pub python_executable: String,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        ExtractorOptions {
            analyze_setup_py_insecurely: false,
            python_executable: "python3".to_owned(),
        }
    }
}

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ExtractError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Wheel(#[from] WheelError),

    #[error("failed to extract sdist: {0}")]
    SDist(#[from] SDistError),

    #[error(transparent)]
    Manifest(#[from] manifests::ManifestError),

    #[error(transparent)]
    SetupPyEval(#[from] SetupPyEvalError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(
        "unable to collect dependencies of {setup_py} securely, \
         pass --analyze-setup-py-insecurely to evaluate it"
    )]
    InsecureSetupRefused { setup_py: PathBuf },
}

/// Extracts the nested requirement list of resolved candidates.
///
/// Results are memoized per candidate purl: a release's dependencies are
/// read once per run no matter how often the resolver asks for them.
pub struct DependencyExtractor {
    repos: Vec<Arc<PypiSimpleRepository>>,
    client: Arc<CachedClient>,
    environment: Environment,
    options: ExtractorOptions,

    dependencies_by_purl: FrozenMap<String, Box<Vec<Requirement>>>,
}

impl DependencyExtractor {
    /// Create an extractor. With an empty `repos` list the extractor falls
    /// back to the PyPI JSON API for everything.
    pub fn new(
        repos: Vec<Arc<PypiSimpleRepository>>,
        client: Arc<CachedClient>,
        environment: Environment,
        options: ExtractorOptions,
    ) -> Self {
        DependencyExtractor {
            repos,
            client,
            environment,
            options,
            dependencies_by_purl: FrozenMap::default(),
        }
    }

    /// The requirements of `name==version`, markers intact. The caller is
    /// expected to filter by marker applicability.
    pub async fn requirements_for(
        &self,
        name: &NormalizedPackageName,
        version: &PypiVersion,
        extras: &BTreeSet<String>,
    ) -> Result<Vec<Requirement>, ExtractError> {
        let purl = format!("pkg:pypi/{name}@{version}");
        if let Some(cached) = self.dependencies_by_purl.get(&purl) {
            return Ok(cached.clone());
        }

        let requirements = if self.repos.is_empty() {
            self.requirements_from_json_api(name, version).await?
        } else {
            self.requirements_from_repos(name, version, extras).await?
        };

        Ok(self
            .dependencies_by_purl
            .insert(purl, Box::new(requirements))
            .clone())
    }

    /// Extract from the configured simple indexes: a compatible wheel's
    /// METADATA when one exists, otherwise the sdist manifests.
    async fn requirements_from_repos(
        &self,
        name: &NormalizedPackageName,
        version: &PypiVersion,
        extras: &BTreeSet<String>,
    ) -> Result<Vec<Requirement>, ExtractError> {
        for repo in &self.repos {
            let wheels = repo
                .supported_and_valid_wheels(name, version, &self.environment)
                .await;
            for info in &wheels {
                let body = repo.fetch_distribution(info).await?;
                let wheel_name = info
                    .filename
                    .as_wheel()
                    .expect("supported wheels have wheel filenames")
                    .clone();
                match Wheel::from_bytes(wheel_name, body).and_then(|wheel| wheel.metadata()) {
                    Ok((_blob, metadata)) => return Ok(metadata.requires_dist),
                    Err(e) => {
                        tracing::warn!(
                            "error reading metadata from wheel '{}', skipping ({e})",
                            info.filename
                        );
                        continue;
                    }
                }
            }
        }

        for repo in &self.repos {
            let Some(info) = repo.valid_sdist(name, version, &self.environment).await else {
                continue;
            };
            let body = repo.fetch_distribution(&info).await?;
            let sdist_name = info
                .filename
                .as_sdist()
                .expect("valid sdists have sdist filenames")
                .clone();
            let sdist = SDist::from_bytes(sdist_name, body);
            return self.requirements_from_sdist(&sdist, extras).await;
        }

        tracing::warn!("no usable wheel or sdist found for {name}=={version}");
        Ok(Vec::new())
    }

    /// Unpack an sdist into the cache and read its manifests.
    async fn requirements_from_sdist(
        &self,
        sdist: &SDist,
        extras: &BTreeSet<String>,
    ) -> Result<Vec<Requirement>, ExtractError> {
        let stem = sdist.name().stem();
        let target = self.client.cache().extracted_sdists_dir().join(&stem);
        if !target.join(&stem).exists() {
            fs::create_dir_all(&target)?;
            sdist.extract_to(&target)?;
        }

        // archives are expected to unpack into a single directory named
        // after the stem; tolerate archives that picked another name
        let mut source_root = target.join(&stem);
        if !source_root.exists() {
            let mut entries = fs::read_dir(&target)?
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().is_dir());
            if let Some(entry) = entries.next() {
                source_root = entry.path();
            }
        }

        self.requirements_from_source_tree(&source_root, extras).await
    }

    /// The manifest pipeline over an unpacked source tree. Also used by the
    /// orchestrator to collect dependencies next to a `setup.py` input.
    pub async fn requirements_from_source_tree(
        &self,
        source_root: &Path,
        extras: &BTreeSet<String>,
    ) -> Result<Vec<Requirement>, ExtractError> {
        let setup_py = source_root.join("setup.py");
        let setup_cfg = source_root.join("setup.cfg");
        let requirements_txt = source_root.join("requirements.txt");

        if self.options.analyze_setup_py_insecurely && setup_py.exists() {
            return Ok(evaluate_setup_py(
                &self.options.python_executable,
                &setup_py,
                extras,
                SpecifierLevel::Range,
                self.environment.markers(),
            )
            .await?);
        }

        // declared literal requirements from setup.py and setup.cfg
        let setup_py_data = setup_py
            .exists()
            .then(|| manifests::parse_setup_py(&setup_py))
            .transpose()
            .map_err(manifests::ManifestError::from)?;
        let setup_cfg_data = setup_cfg
            .exists()
            .then(|| manifests::parse_setup_cfg(&setup_cfg))
            .transpose()
            .map_err(manifests::ManifestError::from)?;

        let mut declared: Vec<String> = Vec::new();
        if let Some(data) = &setup_py_data {
            declared.extend(data.install_requires.clone().unwrap_or_default());
        }
        if let Some(data) = &setup_cfg_data {
            declared.extend(data.install_requires.clone());
        }
        if !declared.is_empty() {
            return Ok(parse_requirement_strings(&declared));
        }

        // a requirements.txt is only authoritative when a manifest sources it
        if requirements_txt.exists() {
            let manifests_mention_it = [&setup_py, &setup_cfg].iter().any(|path| {
                path.exists()
                    && fs::read_to_string(path)
                        .map(|source| manifests::mentions_requirements_txt(&source))
                        .unwrap_or(false)
            });
            if manifests_mention_it {
                let parsed = manifests::parse_requirements_txt(&requirements_txt)
                    .map_err(manifests::ManifestError::from)?;
                let requirements: Vec<String> = parsed
                    .packages
                    .iter()
                    .filter(|package| package.is_resolvable())
                    .map(|package| package.extracted_requirement.clone())
                    .collect();
                return Ok(parse_requirement_strings(&requirements));
            }
        }

        // the file computes its install_requires at runtime; without the
        // insecure evaluator those dependencies cannot be collected
        if let Some(data) = &setup_py_data {
            if data.computed_install_requires {
                return Err(ExtractError::InsecureSetupRefused { setup_py });
            }
            if data.install_requires.is_none() && data.mentions_requires {
                tracing::warn!(
                    "could not determine dependencies of {} statically",
                    setup_py.display()
                );
            }
        }

        Ok(Vec::new())
    }

    /// Ask the PyPI JSON API for the `requires_dist` of a release.
    async fn requirements_from_json_api(
        &self,
        name: &NormalizedPackageName,
        version: &PypiVersion,
    ) -> Result<Vec<Requirement>, ExtractError> {
        let url = format!("https://pypi.org/pypi/{name}/{version}/json");
        let Some(response) = self.client.get_json(&url).await? else {
            return Ok(Vec::new());
        };
        let requires_dist: Vec<String> = response
            .get("info")
            .and_then(|info| info.get("requires_dist"))
            .and_then(|requires| serde_json::from_value(requires.clone()).ok())
            .unwrap_or_default();
        Ok(parse_requirement_strings(&requires_dist))
    }
}

fn parse_requirement_strings(requirements: &[String]) -> Vec<Requirement> {
    requirements
        .iter()
        .filter_map(|requirement| match Requirement::from_str(requirement) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("ignoring unparsable requirement '{requirement}': {e}");
                None
            }
        })
        .collect()
}
