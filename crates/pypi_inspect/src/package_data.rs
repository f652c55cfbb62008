//! Assembly of the per-package metadata block emitted next to the resolved
//! graph, from the PyPI JSON API and the configured repositories.

use crate::environment::Environment;
use crate::index::{CachedClient, FetchError, PypiSimpleRepository};
use crate::types::{NormalizedPackageName, PypiVersion};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// A person attached to a package, as declared in its metadata.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Party {
    /// Always `person` for PyPI metadata.
    #[serde(rename = "type")]
    pub party_type: String,

    /// The declared role, `author` or `maintainer`.
    pub role: String,

    /// The person's name.
    pub name: Option<String>,

    /// The person's email address.
    pub email: Option<String>,
}

/// The metadata block for one pinned package.
#[derive(Debug, Clone, Serialize)]
pub struct PackageData {
    /// The package type, always `pypi`.
    #[serde(rename = "type")]
    pub package_type: String,

    /// The package namespace; unused for PyPI.
    pub namespace: Option<String>,

    /// The package name.
    pub name: String,

    /// The pinned version.
    pub version: String,

    /// Always `Python`.
    pub primary_language: String,

    /// The long description from the package metadata.
    pub description: Option<String>,

    /// The declared home page.
    pub homepage_url: Option<String>,

    /// The JSON API url this block was assembled from.
    pub api_data_url: String,

    /// The issue tracker, when one is declared in the project urls.
    pub bug_tracking_url: Option<String>,

    /// The source repository, when one is declared in the project urls.
    pub code_view_url: Option<String>,

    /// The declared license.
    pub declared_license: Option<String>,

    /// The download url of the selected archive.
    pub download_url: String,

    /// The size in bytes of the selected archive.
    pub size: Option<u64>,

    /// The md5 checksum of the selected archive.
    pub md5: Option<String>,

    /// The sha256 checksum of the selected archive.
    pub sha256: Option<String>,

    /// The upload timestamp of the selected archive.
    pub release_date: Option<String>,

    /// The declared keywords.
    pub keywords: Vec<String>,

    /// Author and maintainer entries.
    pub parties: Vec<Party>,

    /// The `pkg:pypi` purl of this package.
    pub purl: String,
}

fn string_field(info: &Value, key: &str) -> Option<String> {
    info.get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn bug_tracking_url(project_urls: &Value) -> Option<String> {
    ["Tracker", "Issue Tracker", "Bug Tracker"]
        .iter()
        .find_map(|key| string_field(project_urls, key))
}

fn code_view_url(project_urls: &Value) -> Option<String> {
    ["Source", "Code", "Source Code"]
        .iter()
        .find_map(|key| string_field(project_urls, key))
}

fn party(info: &Value, role: &str, name_key: &str, email_key: &str) -> Option<Party> {
    let name = string_field(info, name_key);
    let email = string_field(info, email_key);
    if name.is_none() && email.is_none() {
        return None;
    }
    Some(Party {
        party_type: "person".to_owned(),
        role: role.to_owned(),
        name,
        email,
    })
}

/// The download urls of `name==version` that actually exist in the
/// configured repositories, in selection order: the supported wheels, then
/// the sdist, with the sdist first when `prefer_source` is set.
async fn valid_distribution_urls(
    name: &NormalizedPackageName,
    version: &PypiVersion,
    repos: &[Arc<PypiSimpleRepository>],
    environment: &Environment,
    prefer_source: bool,
) -> Vec<Url> {
    let mut wheels = Vec::new();
    let mut sdists = Vec::new();
    for repo in repos {
        for wheel in repo
            .supported_and_valid_wheels(name, version, environment)
            .await
        {
            wheels.push(wheel.url);
        }
        if let Some(sdist) = repo.valid_sdist(name, version, environment).await {
            sdists.push(sdist.url);
        }
    }
    // the highest-sorted wheel first so the best one is matched first
    wheels.sort_by(|a, b| b.cmp(a));

    if prefer_source {
        sdists.extend(wheels);
        sdists
    } else {
        wheels.extend(sdists);
        wheels
    }
}

/// Assemble the [`PackageData`] block for a pinned package. Returns `None`
/// when the JSON API does not know the release or none of its archives match
/// a repository download url.
pub async fn pypi_data_for_package(
    client: &CachedClient,
    repos: &[Arc<PypiSimpleRepository>],
    environment: &Environment,
    name: &NormalizedPackageName,
    version: &PypiVersion,
    prefer_source: bool,
) -> Result<Option<PackageData>, FetchError> {
    let api_data_url = format!("https://pypi.org/pypi/{name}/{version}/json");
    let Some(response) = client.get_json(&api_data_url).await? else {
        tracing::warn!("the JSON API has no release for {name}=={version}");
        return Ok(None);
    };

    let info = response.get("info").cloned().unwrap_or(Value::Null);
    let project_urls = info.get("project_urls").cloned().unwrap_or(Value::Null);
    let urls = response
        .get("urls")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    // pick the JSON record matching the best download url we know of
    let valid_urls =
        valid_distribution_urls(name, version, repos, environment, prefer_source).await;
    let record = valid_urls
        .iter()
        .find_map(|valid| {
            urls.iter()
                .find(|record| record.get("url").and_then(Value::as_str) == Some(valid.as_str()))
        })
        .or_else(|| if repos.is_empty() { urls.first() } else { None });
    let Some(record) = record else {
        tracing::warn!("no matching archive record for {name}=={version}");
        return Ok(None);
    };

    let digests = record.get("digests").cloned().unwrap_or(Value::Null);
    let keywords = string_field(&info, "keywords")
        .map(|keywords| {
            keywords
                .split([',', ' '])
                .map(str::trim)
                .filter(|keyword| !keyword.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();

    let parties = [
        party(&info, "author", "author", "author_email"),
        party(&info, "maintainer", "maintainer", "maintainer_email"),
    ]
    .into_iter()
    .flatten()
    .collect();

    Ok(Some(PackageData {
        package_type: "pypi".to_owned(),
        namespace: None,
        name: name.to_string(),
        version: version.to_string(),
        primary_language: "Python".to_owned(),
        description: string_field(&info, "description"),
        homepage_url: string_field(&info, "home_page"),
        api_data_url,
        bug_tracking_url: bug_tracking_url(&project_urls),
        code_view_url: code_view_url(&project_urls),
        declared_license: string_field(&info, "license"),
        download_url: record
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        size: record.get("size").and_then(Value::as_u64),
        md5: record
            .get("digests")
            .and_then(|digests| digests.get("md5"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .or_else(|| string_field(record, "md5_digest")),
        sha256: digests
            .get("sha256")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        release_date: string_field(record, "upload_time"),
        keywords,
        parties,
        purl: format!("pkg:pypi/{name}@{version}"),
    }))
}
