use super::resolver::{
    Candidate, DependencyProvider, Identifier, RequirementInformation,
};
use crate::dependencies::{DependencyExtractor, ExtractError};
use crate::environment::Environment;
use crate::index::{CachedClient, PypiSimpleRepository};
use crate::types::{NormalizedPackageName, PypiVersion, Requirement};
use elsa::sync::FrozenMap;
use miette::Diagnostic;
use parking_lot::Mutex;
use pep508_rs::VersionOrUrl;
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;

#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum ProviderError {
    #[error("No versions found for the requirement '{identifier}'")]
    NoVersionsFound { identifier: Identifier },

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("the resolution was cancelled")]
    Cancelled,
}

/// The provider the resolution engine runs against: it maps identifiers to
/// the versions published in the configured repositories (or the PyPI JSON
/// API when none are configured) and candidates to their extracted
/// dependencies.
///
/// The engine is synchronous; the provider bridges to the async fetch layer
/// by blocking on the supplied runtime handle. The caller is expected to run
/// the whole resolution on a blocking thread.
pub struct PypiInputProvider {
    environment: Environment,
    repos: Vec<Arc<PypiSimpleRepository>>,
    client: Arc<CachedClient>,
    extractor: Arc<DependencyExtractor>,
    ignore_errors: bool,
    runtime: Handle,

    /// Checked once per candidate query so a caller can abort a long
    /// resolution between rounds.
    cancel: Option<Arc<AtomicBool>>,

    /// Version lists fetched through the JSON API, by package name.
    versions_by_package: FrozenMap<NormalizedPackageName, Box<Vec<PypiVersion>>>,

    /// Identifiers for which a synthetic placeholder candidate was emitted
    /// because no versions exist anywhere.
    missing: Mutex<HashSet<Identifier>>,
}

impl PypiInputProvider {
    /// Create a provider. An empty `repos` list switches version discovery
    /// to the PyPI JSON API.
    pub fn new(
        environment: Environment,
        repos: Vec<Arc<PypiSimpleRepository>>,
        client: Arc<CachedClient>,
        extractor: Arc<DependencyExtractor>,
        ignore_errors: bool,
        runtime: Handle,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Self {
        PypiInputProvider {
            environment,
            repos,
            client,
            extractor,
            ignore_errors,
            runtime,
            cancel,
            versions_by_package: FrozenMap::default(),
            missing: Mutex::new(HashSet::new()),
        }
    }

    /// All published versions of a package, unioned over the configured
    /// repositories and filtered to those usable under the environment.
    fn versions_for_package(&self, name: &NormalizedPackageName) -> Vec<PypiVersion> {
        if self.repos.is_empty() {
            return self.versions_from_json_api(name);
        }

        let mut versions = Vec::new();
        for repo in &self.repos {
            let packages = self.runtime.block_on(repo.package_versions(name));
            for (version, package) in packages {
                if !package.is_usable_for(&self.environment) {
                    continue;
                }
                if !versions.contains(version) {
                    versions.push(version.clone());
                }
            }
        }
        versions
    }

    fn versions_from_json_api(&self, name: &NormalizedPackageName) -> Vec<PypiVersion> {
        if let Some(cached) = self.versions_by_package.get(name) {
            return cached.clone();
        }

        let url = format!("https://pypi.org/pypi/{name}/json");
        let releases = self
            .runtime
            .block_on(self.client.get_json(&url))
            .unwrap_or_else(|e| {
                tracing::warn!("failed to query the JSON API for {name}: {e}");
                None
            })
            .and_then(|response| response.get("releases").cloned())
            .and_then(|releases| releases.as_object().cloned())
            .map(|releases| {
                releases
                    .keys()
                    .map(|version| {
                        version.parse().expect("version parsing is infallible")
                    })
                    .collect()
            })
            .unwrap_or_default();

        self.versions_by_package
            .insert(name.clone(), Box::new(releases))
            .clone()
    }
}

/// Split an identifier like `flask[async,dotenv]` into its name and extras.
fn split_identifier(identifier: &str) -> (&str, BTreeSet<String>) {
    match identifier.split_once('[') {
        Some((name, extras)) => {
            let extras = extras
                .trim_end_matches(']')
                .split(',')
                .filter(|extra| !extra.is_empty())
                .map(ToOwned::to_owned)
                .collect();
            (name, extras)
        }
        None => (identifier, BTreeSet::new()),
    }
}

/// The PEP 503 form of a requirement name. Names that do not even parse are
/// lower-cased as-is so the failure surfaces as "no versions found" rather
/// than a panic.
fn canonicalize(name: &str) -> String {
    match NormalizedPackageName::from_str(name) {
        Ok(normalized) => normalized.to_string(),
        Err(_) => name.to_ascii_lowercase(),
    }
}

fn identifier_of(name: &str, extras: impl Iterator<Item = String>) -> Identifier {
    let mut extras: Vec<String> = extras.collect();
    extras.sort();
    if extras.is_empty() {
        canonicalize(name)
    } else {
        format!("{}[{}]", canonicalize(name), extras.join(","))
    }
}

/// True if the version is admitted by every requirement collected for the
/// identifier and is not a known incompatibility.
fn is_valid_version(
    version: &PypiVersion,
    requirements: &[Requirement],
    bad_versions: &HashSet<PypiVersion>,
) -> bool {
    if bad_versions.contains(version) {
        return false;
    }
    requirements.iter().all(|requirement| {
        match &requirement.version_or_url {
            None => true,
            Some(VersionOrUrl::Url(_)) => false,
            Some(VersionOrUrl::VersionSpecifier(specifiers)) => version.satisfies(specifiers),
        }
    })
}

impl DependencyProvider for PypiInputProvider {
    type Error = ProviderError;

    fn identify_requirement(&self, requirement: &Requirement) -> Identifier {
        identifier_of(
            &requirement.name,
            requirement.extras.iter().flatten().cloned(),
        )
    }

    fn identify_candidate(&self, candidate: &Candidate) -> Identifier {
        identifier_of(candidate.name.as_str(), candidate.extras.iter().cloned())
    }

    fn preference(
        &self,
        identifier: &Identifier,
        information: &[RequirementInformation],
    ) -> (bool, Identifier) {
        // identifiers only required transitively sort after direct inputs,
        // so user constraints are pinned early
        let transitive = information.iter().all(|info| info.parent.is_some());
        (transitive, identifier.clone())
    }

    fn find_matches(
        &self,
        identifier: &Identifier,
        requirements: &[Requirement],
        incompatibilities: &[Candidate],
    ) -> Result<Vec<Candidate>, Self::Error> {
        if let Some(cancel) = &self.cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(ProviderError::Cancelled);
            }
        }

        let (bare_name, _) = split_identifier(identifier);
        let name = NormalizedPackageName::from_str(bare_name)
            .unwrap_or_else(|_| {
                // unparseable names have no versions anywhere; give them an
                // identity so the lookups below come back empty
                "nonexistent".parse().expect("valid name")
            });

        tracing::debug!("collecting versions for {identifier}");
        let all_versions = self.versions_for_package(&name);

        if all_versions.is_empty() {
            if self.ignore_errors {
                tracing::warn!("no versions found for {identifier}, continuing anyway");
                self.missing.lock().insert(identifier.clone());
                let extras = requirements
                    .iter()
                    .flat_map(|requirement| requirement.extras.iter().flatten().cloned())
                    .collect();
                return Ok(vec![Candidate {
                    name,
                    version: "0.0.0".parse().expect("version parsing is infallible"),
                    extras,
                }]);
            }
            return Err(ProviderError::NoVersionsFound {
                identifier: identifier.clone(),
            });
        }

        let bad_versions: HashSet<PypiVersion> = incompatibilities
            .iter()
            .map(|candidate| candidate.version.clone())
            .collect();

        let mut versions: Vec<PypiVersion> = all_versions
            .into_iter()
            .filter(|version| is_valid_version(version, requirements, &bad_versions))
            .collect();

        // suppress pre-releases unless nothing else is left
        if versions.iter().any(|version| !version.is_prerelease()) {
            versions.retain(|version| !version.is_prerelease());
        }

        // the extras seen across all requirements for this identifier apply
        // to every candidate
        let extras: BTreeSet<String> = requirements
            .iter()
            .flat_map(|requirement| requirement.extras.iter().flatten().cloned())
            .collect();

        versions.sort_by(|a, b| b.cmp(a));
        Ok(versions
            .into_iter()
            .map(|version| Candidate {
                name: name.clone(),
                version,
                extras: extras.clone(),
            })
            .collect())
    }

    fn is_satisfied_by(&self, requirement: &Requirement, candidate: &Candidate) -> bool {
        if self
            .missing
            .lock()
            .contains(&self.identify_candidate(candidate))
        {
            return true;
        }
        match &requirement.version_or_url {
            None => true,
            Some(VersionOrUrl::Url(_)) => false,
            Some(VersionOrUrl::VersionSpecifier(specifiers)) => {
                candidate.version.satisfies(specifiers)
            }
        }
    }

    fn get_dependencies(&self, candidate: &Candidate) -> Result<Vec<Requirement>, Self::Error> {
        if self
            .missing
            .lock()
            .contains(&self.identify_candidate(candidate))
        {
            return Ok(Vec::new());
        }

        tracing::debug!("collecting dependencies of {candidate}");
        let mut dependencies = Vec::new();

        // a candidate with extras depends on its own base package at the
        // exact same version
        if !candidate.extras.is_empty() {
            let self_requirement = format!("{}=={}", candidate.name, candidate.version);
            dependencies.push(
                Requirement::from_str(&self_requirement)
                    .expect("name==version requirements always parse"),
            );
        }

        let nested = self.runtime.block_on(self.extractor.requirements_for(
            &candidate.name,
            &candidate.version,
            &candidate.extras,
        ))?;

        let extras: Vec<&str> = candidate.extras.iter().map(String::as_str).collect();
        for requirement in nested {
            let applies = match &requirement.marker {
                None => true,
                Some(marker) => marker.evaluate(self.environment.markers(), &extras),
            };
            if applies {
                dependencies.push(requirement);
            }
        }

        Ok(dependencies)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_split_identifier() {
        let (name, extras) = split_identifier("flask[async,dotenv]");
        assert_eq!(name, "flask");
        assert_eq!(extras.len(), 2);

        let (name, extras) = split_identifier("flask");
        assert_eq!(name, "flask");
        assert!(extras.is_empty());
    }

    #[test]
    fn test_identifier_of_sorts_extras() {
        assert_eq!(
            identifier_of("Flask", ["dotenv".to_owned(), "async".to_owned()].into_iter()),
            "flask[async,dotenv]"
        );
        assert_eq!(
            identifier_of("Sphinx_RTD.Theme", std::iter::empty()),
            "sphinx-rtd-theme"
        );
    }

    #[test]
    fn test_is_valid_version() {
        let version: PypiVersion = "2.1.2".parse().unwrap();
        let requirements = vec![Requirement::from_str("flask>2.0.0").unwrap()];
        assert!(is_valid_version(&version, &requirements, &HashSet::new()));

        let bad: HashSet<PypiVersion> = [version.clone()].into_iter().collect();
        assert!(!is_valid_version(&version, &requirements, &bad));

        let requirements = vec![Requirement::from_str("flask>2.2").unwrap()];
        assert!(!is_valid_version(&version, &requirements, &HashSet::new()));
    }
}
