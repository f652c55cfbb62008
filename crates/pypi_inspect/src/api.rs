//! The orchestrator: takes the user's requirement inputs, builds the
//! environment and repository set, drives the resolver and assembles the
//! final report.
//!
//! Network-bound work happens in three bounded-parallel phases: the versions
//! of every direct requirement are prefetched before resolution starts, the
//! dependencies of pinned direct requirements are prefetched next, and the
//! per-package metadata is collected after resolution. The resolution itself
//! runs synchronously on a blocking thread against the prefetched caches,
//! fetching on demand for whatever the prefetch did not cover.

use crate::config::Config;
use crate::dependencies::{
    evaluate_setup_py, DependencyExtractor, ExtractorOptions, SetupPyEvalError, SpecifierLevel,
};
use crate::environment::{Environment, InvalidEnvironment};
use crate::index::{
    credentials_for_url, find_netrc_file, parse_netrc, Cache, CachedClient, FetchError, NetrcError,
    PypiSimpleRepository, PYPI_SIMPLE_URL,
};
use crate::manifests::{self, ManifestError};
use crate::package_data::{pypi_data_for_package, PackageData};
use crate::resolve::{
    format_parent_children, format_pdt_tree, PackageWithDeps, PdtNode, ProviderError,
    PypiInputProvider, Resolution, ResolutionError, Resolver,
};
use crate::types::{
    DependentPackage, DependentPackageError, NormalizedPackageName, PypiVersion, Requirement,
    VersionSpecifiers,
};
use futures::{stream, StreamExt};
use miette::Diagnostic;
use pep508_rs::VersionOrUrl;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use url::Url;

/// The default backtracking round budget.
pub const DEFAULT_MAX_ROUNDS: usize = 200_000;

/// How many fetches each prefetch phase keeps in flight.
const PREFETCH_CONCURRENCY: usize = 10;

/// The requirement inputs of a resolution run.
#[derive(Debug, Clone, Default)]
pub struct ResolveInputs {
    /// Paths of pip requirements files.
    pub requirement_files: Vec<PathBuf>,

    /// The path of a `setup.py` to collect requirements from.
    pub setup_py_file: Option<PathBuf>,

    /// Raw requirement specifier strings such as `flask==2.1.2`.
    pub specifiers: Vec<String>,
}

/// The options of a resolution run.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// The targeted python version, e.g. "310" or "3.10".
    pub python_version: String,

    /// The targeted operating system: linux, macos or windows.
    pub operating_system: String,

    /// The index urls to resolve against; empty means the configured ones.
    pub index_urls: Vec<Url>,

    /// An explicit netrc file; `~/.netrc` and `~/_netrc` are probed
    /// otherwise.
    pub netrc_file: Option<PathBuf>,

    /// The backtracking round budget.
    pub max_rounds: usize,

    /// Serve index pages from the on-disk cache without re-fetching.
    pub use_cached_index: bool,

    /// Skip the simple indexes entirely and use the PyPI JSON API.
    pub use_pypi_json_api: bool,

    /// Evaluate `setup.py` files by running them. Executes arbitrary code.
    pub analyze_setup_py_insecurely: bool,

    /// Prefer the sdist over wheels in the emitted package data.
    pub prefer_source: bool,

    /// Emit the pipdeptree-style nested tree instead of the flat
    /// parent/children list.
    pub pdt_output: bool,

    /// Emit placeholder pins instead of failing when a package has no
    /// versions at all.
    pub ignore_errors: bool,

    /// The python executable used for insecure `setup.py` evaluation.
    pub python_executable: String,

    /// Set to true by the caller to abort between phases and resolver
    /// rounds.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl ResolveOptions {
    /// Options seeded from the configured defaults.
    pub fn from_config(config: &Config) -> Self {
        ResolveOptions {
            python_version: config.default_python_version.clone(),
            operating_system: config.default_operating_system.clone(),
            index_urls: Vec::new(),
            netrc_file: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
            use_cached_index: false,
            use_pypi_json_api: false,
            analyze_setup_py_insecurely: false,
            prefer_source: false,
            pdt_output: false,
            ignore_errors: false,
            python_executable: "python3".to_owned(),
            cancel: None,
        }
    }
}

/// The parsed content of one input file, echoed back in the result.
#[derive(Debug, Clone, Serialize)]
pub struct FileData {
    /// Always `file`.
    #[serde(rename = "type")]
    pub file_type: String,

    /// The input path as given.
    pub path: String,

    /// The dependency records parsed out of the file.
    pub package_data: Vec<FilePackageData>,
}

/// The package-level view of one input file.
#[derive(Debug, Clone, Serialize)]
pub struct FilePackageData {
    /// Always `pypi`.
    #[serde(rename = "type")]
    pub package_type: String,

    /// The `python_requires` declared by the file, when any.
    pub python_requires: Option<String>,

    /// The dependency records parsed out of the file.
    pub dependencies: Vec<DependentPackage>,
}

/// The resolved graph in the requested output shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResolutionGraph {
    /// The flat parent/children form.
    ParentChildren(Vec<PackageWithDeps>),

    /// The pipdeptree-style nested form.
    PdtTree(Vec<PdtNode>),
}

/// The complete result of a resolution run.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedDependencies {
    /// The parsed input files.
    pub files: Vec<FileData>,

    /// Metadata for every pinned package.
    pub packages: Vec<PackageData>,

    /// The resolved dependency graph.
    pub resolution: ResolutionGraph,
}

#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum ResolveError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    InvalidEnvironment(#[from] InvalidEnvironment),

    #[error(transparent)]
    Netrc(#[from] NetrcError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Specifier(#[from] DependentPackageError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SetupPyEval(#[from] SetupPyEvalError),

    #[error(
        "python version {python_version} is not compatible with setup.py {path} \
         python_requires {python_requires}"
    )]
    SetupPyPythonMismatch {
        python_version: String,
        path: String,
        python_requires: String,
    },

    #[error(transparent)]
    Resolution(#[from] ResolutionError<ProviderError>),

    #[error(transparent)]
    Extract(#[from] crate::dependencies::ExtractError),

    #[error("the resolution was cancelled")]
    Cancelled,
}

/// Resolve the dependencies of the given inputs for the requested
/// environment and return the full report.
pub async fn resolve_dependencies(
    inputs: &ResolveInputs,
    options: &ResolveOptions,
    config: &Config,
) -> Result<ResolvedDependencies, ResolveError> {
    // input validation happens before any network traffic
    let environment = Environment::from_python_version_and_os(
        &options.python_version,
        &options.operating_system,
    )?;
    tracing::debug!("resolving for {environment}");

    let netrc = find_netrc_file(options.netrc_file.as_deref())?
        .map(|path| parse_netrc(&path))
        .transpose()?;

    let mut index_urls: Vec<Url> = if options.index_urls.is_empty() {
        config.index_urls.clone()
    } else {
        options.index_urls.clone()
    };
    let default_index = Url::parse(PYPI_SIMPLE_URL).expect("the default index url is valid");
    if !config.use_only_configured_index_urls
        && !index_urls.iter().any(|url| same_index(url, &default_index))
    {
        index_urls.insert(0, default_index);
    }

    let mut files = Vec::new();
    let mut direct_dependencies: Vec<DependentPackage> = Vec::new();

    for requirement_file in &inputs.requirement_files {
        let parsed = manifests::parse_requirements_txt(requirement_file)
            .map_err(ManifestError::from)?;

        // requirement files may carry their own index options
        if !config.use_only_configured_index_urls {
            for url in parsed
                .extra_data
                .extra_index_urls
                .iter()
                .chain(parsed.extra_data.index_url.iter())
            {
                if !index_urls.iter().any(|existing| same_index(existing, url)) {
                    index_urls.push(url.clone());
                }
            }
        }

        files.push(FileData {
            file_type: "file".to_owned(),
            path: requirement_file.display().to_string(),
            package_data: vec![FilePackageData {
                package_type: "pypi".to_owned(),
                python_requires: None,
                dependencies: parsed.packages.clone(),
            }],
        });
        direct_dependencies.extend(parsed.packages);
    }

    for specifier in &inputs.specifiers {
        direct_dependencies.push(DependentPackage::from_specifier(specifier)?);
    }

    // the fetch layer is shared by the repositories, the extractor and the
    // metadata assembly
    let cache = Cache::new(config.cache_dir.clone())?;
    let client = Arc::new(CachedClient::new(cache).map_err(FetchError::Request)?);

    let repos: Vec<Arc<PypiSimpleRepository>> = if options.use_pypi_json_api {
        Vec::new()
    } else {
        index_urls
            .iter()
            .map(|url| {
                let credentials = netrc
                    .as_ref()
                    .and_then(|netrc| credentials_for_url(netrc, url));
                Arc::new(PypiSimpleRepository::new(
                    url.clone(),
                    client.clone(),
                    credentials,
                    options.use_cached_index,
                ))
            })
            .collect()
    };

    let extractor = Arc::new(DependencyExtractor::new(
        repos.clone(),
        client.clone(),
        environment.clone(),
        ExtractorOptions {
            analyze_setup_py_insecurely: options.analyze_setup_py_insecurely,
            python_executable: options.python_executable.clone(),
        },
    ));

    if let Some(setup_py) = &inputs.setup_py_file {
        let (file_data, dependencies) =
            setup_py_dependencies(setup_py, options, &environment, &extractor).await?;
        files.push(file_data);
        direct_dependencies.extend(dependencies);
    }

    // direct requirements that survive the skip flags and markers
    let mut requirements: Vec<Requirement> = Vec::new();
    for dependency in &direct_dependencies {
        if !dependency.is_resolvable() {
            continue;
        }
        let requirement = match dependency.requirement() {
            Ok(requirement) => requirement,
            Err(e) => {
                tracing::warn!("skipping malformed requirement: {e}");
                continue;
            }
        };
        if let Some(marker) = &requirement.marker {
            if !marker.evaluate(environment.markers(), &[]) {
                continue;
            }
        }
        requirements.push(requirement);
    }

    if requirements.is_empty() {
        return Ok(ResolvedDependencies {
            files,
            packages: Vec::new(),
            resolution: empty_resolution(options),
        });
    }

    // phase A: warm the version caches for every direct requirement
    check_cancelled(options)?;
    let direct_names: Vec<NormalizedPackageName> = requirements
        .iter()
        .filter_map(|requirement| NormalizedPackageName::from_str(&requirement.name).ok())
        .collect();
    stream::iter(
        repos
            .iter()
            .flat_map(|repo| direct_names.iter().map(move |name| (repo, name))),
    )
    .map(|(repo, name)| async move {
        repo.package_versions(name).await;
    })
    .buffer_unordered(PREFETCH_CONCURRENCY)
    .collect::<Vec<()>>()
    .await;

    // phase B: warm the dependency caches for the pinned direct requirements
    check_cancelled(options)?;
    stream::iter(requirements.iter().filter_map(pinned_name_version))
        .map(|(name, version)| {
            let extractor = extractor.clone();
            async move {
                if let Err(e) = extractor
                    .requirements_for(&name, &version, &BTreeSet::new())
                    .await
                {
                    tracing::debug!("prefetching dependencies of {name}=={version} failed: {e}");
                }
            }
        })
        .buffer_unordered(PREFETCH_CONCURRENCY)
        .collect::<Vec<()>>()
        .await;

    // the engine is synchronous, run it on a blocking thread against the
    // prefetched caches
    check_cancelled(options)?;
    let provider = PypiInputProvider::new(
        environment.clone(),
        repos.clone(),
        client.clone(),
        extractor.clone(),
        options.ignore_errors,
        Handle::current(),
        options.cancel.clone(),
    );
    let max_rounds = options.max_rounds;
    let resolver_requirements = requirements.clone();
    let resolution = tokio::task::spawn_blocking(move || {
        Resolver::new(&provider).resolve(resolver_requirements, max_rounds)
    })
    .await
    .unwrap_or_else(|e| match e.try_into_panic() {
        Ok(panic) => std::panic::resume_unwind(panic),
        Err(_) => Err(ResolutionError::Provider(ProviderError::Cancelled)),
    })?;

    // phase C: per-package metadata for every pinned purl
    check_cancelled(options)?;
    let packages = collect_package_data(&resolution, &repos, &client, &environment, options).await?;

    let resolution = if options.pdt_output {
        ResolutionGraph::PdtTree(format_pdt_tree(&resolution))
    } else {
        ResolutionGraph::ParentChildren(format_parent_children(&resolution))
    };

    Ok(ResolvedDependencies {
        files,
        packages,
        resolution,
    })
}

fn empty_resolution(options: &ResolveOptions) -> ResolutionGraph {
    if options.pdt_output {
        ResolutionGraph::PdtTree(Vec::new())
    } else {
        ResolutionGraph::ParentChildren(Vec::new())
    }
}

fn check_cancelled(options: &ResolveOptions) -> Result<(), ResolveError> {
    match &options.cancel {
        Some(cancel) if cancel.load(Ordering::Relaxed) => Err(ResolveError::Cancelled),
        _ => Ok(()),
    }
}

/// Two index urls are the same modulo a trailing slash.
fn same_index(a: &Url, b: &Url) -> bool {
    a.as_str().trim_end_matches('/') == b.as_str().trim_end_matches('/')
}

/// The `(name, version)` of a requirement pinned with a single `==`/`===`.
fn pinned_name_version(
    requirement: &Requirement,
) -> Option<(NormalizedPackageName, PypiVersion)> {
    let Some(VersionOrUrl::VersionSpecifier(specifiers)) = &requirement.version_or_url else {
        return None;
    };
    let mut iter = specifiers.iter();
    let specifier = iter.next()?;
    if iter.next().is_some() {
        return None;
    }
    let repr = specifier.to_string();
    let version = repr
        .strip_prefix("===")
        .or_else(|| repr.strip_prefix("=="))?;
    // a trailing wildcard is a range, not a pin
    if version.ends_with('*') {
        return None;
    }
    let name = NormalizedPackageName::from_str(&requirement.name).ok()?;
    Some((
        name,
        version.trim().parse().expect("version parsing is infallible"),
    ))
}

/// Collect the direct dependencies declared by a `setup.py` input, either
/// from its literal arguments, by live evaluation, or through the manifest
/// pipeline of its directory.
async fn setup_py_dependencies(
    setup_py: &std::path::Path,
    options: &ResolveOptions,
    environment: &Environment,
    extractor: &DependencyExtractor,
) -> Result<(FileData, Vec<DependentPackage>), ResolveError> {
    let data = manifests::parse_setup_py(setup_py).map_err(ManifestError::from)?;

    // the manifest must admit the selected interpreter
    if let Some(python_requires) = &data.python_requires {
        if let Ok(specifiers) = VersionSpecifiers::from_str(python_requires) {
            if !environment.python_dot_version().satisfies(&specifiers) {
                return Err(ResolveError::SetupPyPythonMismatch {
                    python_version: environment.python_dot_version().to_string(),
                    path: setup_py.display().to_string(),
                    python_requires: python_requires.clone(),
                });
            }
        }
    }

    let dependencies: Vec<DependentPackage> = if options.analyze_setup_py_insecurely {
        evaluate_setup_py(
            &options.python_executable,
            setup_py,
            &BTreeSet::new(),
            SpecifierLevel::Range,
            environment.markers(),
        )
        .await?
        .iter()
        .map(DependentPackage::from_requirement)
        .collect()
    } else if data
        .install_requires
        .as_ref()
        .is_some_and(|requirements| !requirements.is_empty())
    {
        data.install_requires
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|requirement| DependentPackage::from_specifier(requirement).ok())
            .collect()
    } else {
        // nothing declared literally, fall back to the manifests next to it
        let manifest_dir = setup_py
            .parent()
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| PathBuf::from("."));
        extractor
            .requirements_from_source_tree(&manifest_dir, &BTreeSet::new())
            .await?
            .iter()
            .map(DependentPackage::from_requirement)
            .collect()
    };

    let file_data = FileData {
        file_type: "file".to_owned(),
        path: setup_py.display().to_string(),
        package_data: vec![FilePackageData {
            package_type: "pypi".to_owned(),
            python_requires: data.python_requires.clone(),
            dependencies: dependencies.clone(),
        }],
    };
    Ok((file_data, dependencies))
}

/// Fetch the metadata block of every pinned package, bounded-parallel, and
/// return them sorted by purl.
async fn collect_package_data(
    resolution: &Resolution,
    repos: &[Arc<PypiSimpleRepository>],
    client: &CachedClient,
    environment: &Environment,
    options: &ResolveOptions,
) -> Result<Vec<PackageData>, ResolveError> {
    let mut seen = HashSet::new();
    let pins: Vec<(NormalizedPackageName, PypiVersion)> = resolution
        .mapping
        .values()
        .filter(|candidate| seen.insert(candidate.purl()))
        .map(|candidate| (candidate.name.clone(), candidate.version.clone()))
        .collect();

    let mut packages: Vec<PackageData> = stream::iter(pins)
        .map(|(name, version)| async move {
            pypi_data_for_package(client, repos, environment, &name, &version, options.prefer_source)
                .await
        })
        .buffer_unordered(PREFETCH_CONCURRENCY)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .flatten()
        .collect();

    packages.sort_by(|a, b| a.purl.cmp(&b.purl));
    Ok(packages)
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_config(cache_dir: &std::path::Path) -> Config {
        Config {
            cache_dir: cache_dir.to_owned(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_invalid_operating_system_is_rejected_before_any_io() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut options = ResolveOptions::from_config(&config);
        options.python_version = "310".to_owned();
        options.operating_system = "foo-bar".to_owned();

        let inputs = ResolveInputs {
            specifiers: vec!["flask==2.1.2".to_owned()],
            ..Default::default()
        };
        let result = resolve_dependencies(&inputs, &options, &config).await;
        assert!(matches!(
            result,
            Err(ResolveError::InvalidEnvironment(
                InvalidEnvironment::OperatingSystem { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_invalid_python_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut options = ResolveOptions::from_config(&config);
        options.python_version = "299".to_owned();
        options.operating_system = "linux".to_owned();

        let result = resolve_dependencies(&ResolveInputs::default(), &options, &config).await;
        assert!(matches!(
            result,
            Err(ResolveError::InvalidEnvironment(
                InvalidEnvironment::PythonVersion { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_no_inputs_give_an_empty_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut options = ResolveOptions::from_config(&config);
        options.python_version = "310".to_owned();
        options.operating_system = "linux".to_owned();

        let result = resolve_dependencies(&ResolveInputs::default(), &options, &config)
            .await
            .unwrap();
        assert!(result.files.is_empty());
        assert!(result.packages.is_empty());
        assert!(matches!(
            result.resolution,
            ResolutionGraph::ParentChildren(ref packages) if packages.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_requirement_markers_filter_direct_inputs() {
        // a direct requirement whose marker excludes the target platform
        // short-circuits to an empty resolution without touching the network
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut options = ResolveOptions::from_config(&config);
        options.python_version = "310".to_owned();
        options.operating_system = "linux".to_owned();

        let inputs = ResolveInputs {
            specifiers: vec!["colorama;platform_system=='Windows'".to_owned()],
            ..Default::default()
        };
        let result = resolve_dependencies(&inputs, &options, &config).await.unwrap();
        assert!(result.packages.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_flag_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut options = ResolveOptions::from_config(&config);
        options.python_version = "310".to_owned();
        options.operating_system = "linux".to_owned();
        let cancel = Arc::new(AtomicBool::new(true));
        options.cancel = Some(cancel);

        let inputs = ResolveInputs {
            specifiers: vec!["flask==2.1.2".to_owned()],
            ..Default::default()
        };
        let result = resolve_dependencies(&inputs, &options, &config).await;
        assert!(matches!(result, Err(ResolveError::Cancelled)));
    }
}
