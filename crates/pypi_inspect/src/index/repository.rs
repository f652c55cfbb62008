use super::html::{parse_package_page, Link};
use super::http::{CachedClient, FetchError, IndexCredentials};
use crate::environment::Environment;
use crate::types::{
    ArtifactName, DistributionInfo, NormalizedPackageName, PypiPackage, PypiVersion,
};
use elsa::sync::FrozenMap;
use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use url::Url;

/// The public PyPI simple index.
pub const PYPI_SIMPLE_URL: &str = "https://pypi.org/simple/";

/// A PEP 503 "simple" repository: an HTML page per package listing the
/// download links of every released distribution.
///
/// The repository is populated lazily per requested package name. A fetched
/// (or failed) page is never fetched again for the lifetime of this value;
/// the caches are append-only so references into them stay valid.
pub struct PypiSimpleRepository {
    index_url: Url,
    client: Arc<CachedClient>,
    credentials: Option<IndexCredentials>,
    use_cached_index: bool,

    /// Package name to the versions released for it, oldest first.
    packages: FrozenMap<NormalizedPackageName, Box<IndexMap<PypiVersion, PypiPackage>>>,
}

impl PypiSimpleRepository {
    /// Create a repository for the given index base url. When
    /// `use_cached_index` is set, previously cached package pages are served
    /// without re-validating against the remote.
    pub fn new(
        index_url: Url,
        client: Arc<CachedClient>,
        credentials: Option<IndexCredentials>,
        use_cached_index: bool,
    ) -> Self {
        PypiSimpleRepository {
            index_url: crate::utils::normalize_index_url(index_url),
            client,
            credentials,
            use_cached_index,

            packages: FrozenMap::default(),
        }
    }

    /// The base url of this index.
    pub fn index_url(&self) -> &Url {
        &self.index_url
    }

    /// Fetch the download links for a package from this index.
    pub async fn fetch_links(
        &self,
        name: &NormalizedPackageName,
    ) -> Result<Vec<Link>, FetchError> {
        let page_url = self
            .index_url
            .join(&format!("{}/", name.as_str()))
            .expect("package names are valid url path segments");
        let body = self
            .client
            .fetch(
                page_url.as_str(),
                self.credentials.as_ref(),
                !self.use_cached_index,
            )
            .await?;
        let body = String::from_utf8_lossy(&body);
        let links = parse_package_page(&page_url, &body)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(links)
    }

    /// Returns all versions of a package available in this index, oldest
    /// first. A failed or missing page yields an empty map; the failure is
    /// not retried for this repository instance.
    pub async fn package_versions(
        &self,
        name: &NormalizedPackageName,
    ) -> &IndexMap<PypiVersion, PypiPackage> {
        if let Some(cached) = self.packages.get(name) {
            return cached;
        }

        let versions = match self.fetch_links(name).await {
            Ok(links) => packages_from_links(name, links),
            Err(e) => {
                tracing::warn!(
                    "failed to fetch package {} from {}: {}",
                    name,
                    self.index_url,
                    e
                );
                IndexMap::new()
            }
        };

        self.packages.insert(name.clone(), Box::new(versions))
    }

    /// Returns the package with the given version, or the newest one when no
    /// version is given.
    pub async fn package_version(
        &self,
        name: &NormalizedPackageName,
        version: Option<&PypiVersion>,
    ) -> Option<&PypiPackage> {
        let versions = self.package_versions(name).await;
        match version {
            Some(version) => versions.get(version),
            None => versions.values().last(),
        }
    }

    /// The wheels of `name==version` that are supported by the environment's
    /// tags and admit its python version.
    pub async fn supported_and_valid_wheels(
        &self,
        name: &NormalizedPackageName,
        version: &PypiVersion,
        environment: &Environment,
    ) -> Vec<DistributionInfo> {
        let Some(package) = self.package_version(name, Some(version)).await else {
            return Vec::new();
        };
        let python = environment.python_dot_version();
        package
            .supported_wheels(environment)
            .filter(|wheel| wheel.admits_python(&python))
            .cloned()
            .collect()
    }

    /// The sdist of `name==version` if it exists and admits the environment's
    /// python version.
    pub async fn valid_sdist(
        &self,
        name: &NormalizedPackageName,
        version: &PypiVersion,
        environment: &Environment,
    ) -> Option<DistributionInfo> {
        let package = self.package_version(name, Some(version)).await?;
        let sdist = package.sdist.as_ref()?;
        sdist
            .admits_python(&environment.python_dot_version())
            .then(|| sdist.clone())
    }

    /// Download a distribution through the cache, using this repository's
    /// credentials.
    pub async fn fetch_distribution(
        &self,
        distribution: &DistributionInfo,
    ) -> Result<Vec<u8>, FetchError> {
        self.client
            .fetch(distribution.url.as_str(), self.credentials.as_ref(), false)
            .await
    }
}

/// The last path segment of a url, percent-decoded, which for index links is
/// the distribution filename.
pub(crate) fn filename_from_url(url: &Url) -> Option<String> {
    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())?;
    Some(percent_decode_str(segment).decode_utf8_lossy().into_owned())
}

/// Group the links of a package page into per-version [`PypiPackage`]s.
/// Links with unparseable filenames are dropped, as are distributions whose
/// filename disagrees with the requested package name. The result is ordered
/// by version, oldest first.
fn packages_from_links(
    name: &NormalizedPackageName,
    links: Vec<Link>,
) -> IndexMap<PypiVersion, PypiPackage> {
    let mut versions: IndexMap<PypiVersion, PypiPackage> = IndexMap::new();
    for link in links {
        let Some(filename) = filename_from_url(&link.url) else {
            continue;
        };
        let parsed = match ArtifactName::from_filename(&filename) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!("skipping link {}: {}", link.url, e);
                continue;
            }
        };
        if parsed.distribution().as_str() != name.as_str() {
            tracing::debug!(
                "skipping inconsistent distribution name: expected {} got {}",
                name,
                filename
            );
            continue;
        }

        let distribution = DistributionInfo {
            filename: parsed.clone(),
            url: link.url,
            sha256: link.sha256,
            requires_python: link.requires_python,
        };

        let package = versions
            .entry(parsed.version().clone())
            .or_insert_with(|| PypiPackage {
                name: name.clone(),
                version: parsed.version().clone(),
                sdist: None,
                wheels: Vec::new(),
            });
        match parsed {
            ArtifactName::Wheel(_) => package.wheels.push(distribution),
            ArtifactName::SDist(_) => {
                // the first sdist of a version wins
                package.sdist.get_or_insert(distribution);
            }
        }
    }

    // keep a stable order for the wheels of each version
    for package in versions.values_mut() {
        package.wheels.sort_by(|a, b| a.filename.cmp(&b.filename));
    }
    versions.sort_keys();
    versions
}
