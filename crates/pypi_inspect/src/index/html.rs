//! Parsing of PEP 503 "simple" index pages.

use pep440_rs::VersionSpecifiers;
use rattler_digest::{parse_digest_from_hex, Sha256, Sha256Hash};
use std::str::FromStr;
use thiserror::Error;
use tl::HTMLTag;
use url::Url;

/// A download link found on a package page: the resolved URL plus the
/// link-level attributes the index exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// The fully resolved download url, fragment stripped.
    pub url: Url,

    /// The `data-requires-python` attribute, if present and non-empty.
    pub requires_python: Option<VersionSpecifiers>,

    /// The checksum hint from a `#sha256=...` fragment.
    pub sha256: Option<Sha256Hash>,
}

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum HtmlError {
    #[error("failed to parse package page html: {0}")]
    Malformed(String),
}

/// Parse a `#sha256=<hex>` url fragment into a digest.
pub fn parse_hash(fragment: &str) -> Option<Sha256Hash> {
    match fragment.split_once('=') {
        Some(("sha256", hex)) => parse_digest_from_hex::<Sha256>(hex),
        _ => None,
    }
}

fn link_from_anchor(base: &Url, tag: &HTMLTag) -> Option<Link> {
    let attributes = tag.attributes();
    let href = attributes.get("href").flatten()?.as_utf8_str();

    // Relative hrefs (including `..` segments) resolve against the package
    // page url, or against an explicit <base> when the page carries one.
    let url = base.join(href.as_ref()).ok()?;

    let sha256 = url.fragment().and_then(parse_hash);
    let mut url = url;
    url.set_fragment(None);

    let requires_python = attributes
        .get("data-requires-python")
        .flatten()
        .map(|a| a.as_utf8_str())
        .filter(|a| !a.is_empty())
        .map(|a| VersionSpecifiers::from_str(html_escape::decode_html_entities(a.as_ref()).as_ref()))
        .transpose()
        .ok()?;

    Some(Link {
        url,
        requires_python,
        sha256,
    })
}

/// Parse all anchor tags of a package page into [`Link`]s. Anchors without an
/// href, or with attributes that fail to parse, are skipped.
pub fn parse_package_page(base: &Url, body: &str) -> Result<Vec<Link>, HtmlError> {
    let dom = tl::parse(body, tl::ParserOptions::default())
        .map_err(|e| HtmlError::Malformed(e.to_string()))?;

    // An explicit <base href> overrides the page url for relative links.
    let base = dom
        .query_selector("base")
        .and_then(|mut nodes| nodes.next())
        .and_then(|handle| handle.get(dom.parser()))
        .and_then(|node| node.as_tag())
        .and_then(|tag| tag.attributes().get("href").flatten())
        .and_then(|href| Url::parse(href.as_utf8_str().as_ref()).ok())
        .unwrap_or_else(|| base.clone());

    let mut links = Vec::new();
    if let Some(anchors) = dom.query_selector("a") {
        for anchor in anchors {
            let Some(tag) = anchor.get(dom.parser()).and_then(|node| node.as_tag()) else {
                continue;
            };
            if let Some(link) = link_from_anchor(&base, tag) {
                links.push(link);
            }
        }
    }
    Ok(links)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_package_page() {
        let base = Url::parse("https://example.com/simple/link/").unwrap();
        let links = parse_package_page(
            &base,
            r#"<html>
                <body>
                  <a href="link-1.0.tar.gz#sha256=0000000000000000000000000000000000000000000000000000000000000000">link1</a>
                  <a href="/elsewhere/link-2.0.zip">link2</a>
                  <a href="../../packages/link-3.0.tar.gz" data-requires-python=">=3.7">link3</a>
                  <a href="link-4.0.tar.gz" data-requires-python="">link4</a>
                  <a>no href</a>
                </body>
              </html>"#,
        )
        .unwrap();

        assert_eq!(links.len(), 4);

        assert_eq!(
            links[0].url.as_str(),
            "https://example.com/simple/link/link-1.0.tar.gz"
        );
        assert!(links[0].sha256.is_some());

        assert_eq!(links[1].url.as_str(), "https://example.com/elsewhere/link-2.0.zip");

        assert_eq!(
            links[2].url.as_str(),
            "https://example.com/packages/link-3.0.tar.gz"
        );
        assert_eq!(links[2].requires_python.as_ref().unwrap().to_string(), ">=3.7");

        // empty data-requires-python is treated as absent
        assert!(links[3].requires_python.is_none());
    }

    #[test]
    fn test_base_tag_overrides_page_url() {
        let base = Url::parse("https://example.com/old-base/link/").unwrap();
        let links = parse_package_page(
            &base,
            r#"<html>
                <head><base href="https://example.com/new-base/"></head>
                <body><a href="link-1.0.tar.gz">link1</a></body>
              </html>"#,
        )
        .unwrap();
        assert_eq!(
            links[0].url.as_str(),
            "https://example.com/new-base/link-1.0.tar.gz"
        );
    }

    #[test]
    fn test_escaped_requires_python() {
        let base = Url::parse("https://example.com/simple/link/").unwrap();
        let links = parse_package_page(
            &base,
            r#"<a href="link-1.0.tar.gz" data-requires-python="&gt;=3.8">link</a>"#,
        )
        .unwrap();
        assert_eq!(links[0].requires_python.as_ref().unwrap().to_string(), ">=3.8");
    }
}
