//! Content acquisition: fetching a page over HTTP and extracting the
//! structured snapshot the checks operate on.
//!
//! Extraction is regex-based and intentionally lenient. It targets the
//! handful of signals the checks need (title, meta tags, headings, links,
//! visible text) rather than a full DOM parse.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;

/// Body text is truncated to this many characters before being handed to
/// the checks, keeping evaluator prompts bounded.
const BODY_TEXT_LIMIT: usize = 8_000;

/// Link lists are capped per category.
const LINK_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    pub level: u8,
    pub text: String,
}

/// Everything the checks know about a fetched page. Captured once by the
/// fetch step and shared read-only across parallel checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSnapshot {
    pub url: String,
    pub raw_html: String,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub canonical_url: Option<String>,
    #[serde(default)]
    pub og_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub json_ld_types: Vec<String>,
    #[serde(default)]
    pub headings: Vec<Heading>,
    pub body_text: String,
    pub last_reviewed: Option<String>,
    #[serde(default)]
    pub internal_links: Vec<String>,
    #[serde(default)]
    pub external_links: Vec<String>,
}

/// Boundary for acquiring content. The HTTP implementation is the only
/// production one; tests substitute a stub.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ContentSnapshot, PipelineError>;
}

/// Fetches pages with reqwest using browser-like headers (some CDNs reject
/// default client user agents) and runs the extraction pass on the body.
pub struct HttpContentSource {
    client: reqwest::Client,
}

impl HttpContentSource {
    pub fn new(timeout: Duration) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            )
            .build()
            .map_err(|e| PipelineError::Other(anyhow::anyhow!(e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn fetch(&self, url: &str) -> Result<ContentSnapshot, PipelineError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml")
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| PipelineError::FetchFailed {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::FetchFailed {
                url: url.to_string(),
                message: format!("HTTP {}", status.as_u16()),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| PipelineError::FetchFailed {
                url: url.to_string(),
                message: format!("Failed to read body: {}", e),
            })?;

        Ok(extract_snapshot(url, &html))
    }
}

// ── Extraction ───────────────────────────────────────────────────────

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

static META_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<meta\s+[^>]*>").unwrap());

static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([a-zA-Z:_-]+)\s*=\s*["']([^"']*)["']"#).unwrap());

static CANONICAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<link\s+[^>]*rel\s*=\s*["']canonical["'][^>]*>"#).unwrap()
});

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h([1-6])[^>]*>(.*?)</h[1-6]>").unwrap());

static ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<a\s+[^>]*href\s*=\s*["']([^"'#]+)["']"#).unwrap());

static JSON_LD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#)
        .unwrap()
});

static SCRIPT_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>").unwrap()
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static LAST_REVIEWED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:last\s+(?:reviewed|updated)|reviewed\s+on)[:\s]+([A-Za-z]+\.?\s+\d{1,2},?\s+\d{4}|\d{4}-\d{2}-\d{2})")
        .unwrap()
});

/// Build a [`ContentSnapshot`] from raw HTML. Pure function; the fetch
/// transport is the only async part of acquisition.
pub fn extract_snapshot(url: &str, html: &str) -> ContentSnapshot {
    let title = TITLE_RE
        .captures(html)
        .map(|c| clean_text(&c[1]))
        .filter(|t| !t.is_empty());

    let mut meta_description = None;
    let mut og_tags = BTreeMap::new();
    for tag in META_RE.find_iter(html) {
        let attrs: BTreeMap<String, String> = ATTR_RE
            .captures_iter(tag.as_str())
            .map(|c| (c[1].to_ascii_lowercase(), c[2].to_string()))
            .collect();
        let name = attrs
            .get("name")
            .or_else(|| attrs.get("property"))
            .cloned()
            .unwrap_or_default();
        let value = attrs.get("content").cloned().unwrap_or_default();
        if name.eq_ignore_ascii_case("description") && meta_description.is_none() {
            meta_description = Some(value.clone()).filter(|v| !v.is_empty());
        }
        if name.to_ascii_lowercase().starts_with("og:") && !value.is_empty() {
            og_tags.insert(name.to_ascii_lowercase(), value);
        }
    }

    let canonical_url = CANONICAL_RE.find(html).and_then(|m| {
        ATTR_RE
            .captures_iter(m.as_str())
            .find(|c| c[1].eq_ignore_ascii_case("href"))
            .map(|c| c[2].to_string())
    });

    let headings = HEADING_RE
        .captures_iter(html)
        .filter_map(|c| {
            let text = clean_text(&c[2]);
            if text.is_empty() {
                return None;
            }
            Some(Heading {
                level: c[1].parse().unwrap_or(6),
                text,
            })
        })
        .collect();

    let json_ld_types = JSON_LD_RE
        .captures_iter(html)
        .filter_map(|c| serde_json::from_str::<serde_json::Value>(c[1].trim()).ok())
        .flat_map(collect_json_ld_types)
        .collect();

    let host = host_of(url);
    let mut internal_links = Vec::new();
    let mut external_links = Vec::new();
    for cap in ANCHOR_RE.captures_iter(html) {
        let href = cap[1].trim().to_string();
        if href.starts_with("javascript:") || href.starts_with("mailto:") {
            continue;
        }
        let is_internal = href.starts_with('/')
            || host
                .as_deref()
                .is_some_and(|h| host_of(&href).as_deref() == Some(h));
        let bucket = if is_internal {
            &mut internal_links
        } else if href.starts_with("http") {
            &mut external_links
        } else {
            continue;
        };
        if bucket.len() < LINK_LIMIT && !bucket.contains(&href) {
            bucket.push(href);
        }
    }

    let stripped = SCRIPT_STYLE_RE.replace_all(html, " ");
    let stripped = TAG_RE.replace_all(&stripped, " ");
    let full_text = WHITESPACE_RE
        .replace_all(&decode_entities(&stripped), " ")
        .trim()
        .to_string();
    let body_text = truncate_at_boundary(&full_text, BODY_TEXT_LIMIT).to_string();

    let last_reviewed = LAST_REVIEWED_RE
        .captures(&body_text)
        .map(|c| c[1].to_string());

    ContentSnapshot {
        url: url.to_string(),
        raw_html: html.to_string(),
        title,
        meta_description,
        canonical_url,
        og_tags,
        json_ld_types,
        headings,
        body_text,
        last_reviewed,
        internal_links,
        external_links,
    }
}

/// Cut `text` to at most `limit` bytes without splitting a UTF-8
/// character.
pub(crate) fn truncate_at_boundary(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

fn collect_json_ld_types(value: serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::Object(map) => match map.get("@type") {
            Some(serde_json::Value::String(t)) => vec![t.clone()],
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => map
                .get("@graph")
                .cloned()
                .map(collect_json_ld_types)
                .unwrap_or_default(),
        },
        serde_json::Value::Array(items) => {
            items.into_iter().flat_map(collect_json_ld_types).collect()
        }
        _ => Vec::new(),
    }
}

fn host_of(url: &str) -> Option<String> {
    let rest = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"))?;
    Some(
        rest.split(['/', '?'])
            .next()
            .unwrap_or(rest)
            .to_ascii_lowercase(),
    )
}

fn clean_text(fragment: &str) -> String {
    let stripped = TAG_RE.replace_all(fragment, " ");
    WHITESPACE_RE
        .replace_all(&decode_entities(&stripped), " ")
        .trim()
        .to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <html><head>
        <title>Heart Health &amp; You</title>
        <meta name="description" content="How to keep your heart healthy.">
        <meta property="og:title" content="Heart Health">
        <meta property="og:type" content="article">
        <link rel="canonical" href="https://example.org/heart-health">
        <script type="application/ld+json">{"@type": "MedicalWebPage"}</script>
        <style>body { color: red; }</style>
        </head><body>
        <h1>Heart Health</h1>
        <h2>Diet</h2>
        <p>Eat well. Last reviewed: January 5, 2024.</p>
        <a href="/conditions/heart-disease">Heart disease</a>
        <a href="https://example.org/about">About</a>
        <a href="https://other.example.com/study">Study</a>
        <a href="mailto:info@example.org">Mail</a>
        <script>console.log("noise");</script>
        </body></html>
    "#;

    #[test]
    fn extracts_title_and_meta() {
        let snap = extract_snapshot("https://example.org/heart-health", SAMPLE);
        assert_eq!(snap.title.as_deref(), Some("Heart Health & You"));
        assert_eq!(
            snap.meta_description.as_deref(),
            Some("How to keep your heart healthy.")
        );
        assert_eq!(
            snap.canonical_url.as_deref(),
            Some("https://example.org/heart-health")
        );
    }

    #[test]
    fn extracts_og_tags_and_json_ld() {
        let snap = extract_snapshot("https://example.org/heart-health", SAMPLE);
        assert_eq!(snap.og_tags.get("og:title").map(String::as_str), Some("Heart Health"));
        assert_eq!(snap.og_tags.get("og:type").map(String::as_str), Some("article"));
        assert_eq!(snap.json_ld_types, vec!["MedicalWebPage".to_string()]);
    }

    #[test]
    fn extracts_headings_in_document_order() {
        let snap = extract_snapshot("https://example.org/heart-health", SAMPLE);
        assert_eq!(snap.headings.len(), 2);
        assert_eq!(snap.headings[0].level, 1);
        assert_eq!(snap.headings[0].text, "Heart Health");
        assert_eq!(snap.headings[1].level, 2);
    }

    #[test]
    fn splits_internal_and_external_links() {
        let snap = extract_snapshot("https://example.org/heart-health", SAMPLE);
        assert!(snap
            .internal_links
            .contains(&"/conditions/heart-disease".to_string()));
        assert!(snap
            .internal_links
            .contains(&"https://example.org/about".to_string()));
        assert_eq!(
            snap.external_links,
            vec!["https://other.example.com/study".to_string()]
        );
    }

    #[test]
    fn body_text_excludes_script_and_style() {
        let snap = extract_snapshot("https://example.org/heart-health", SAMPLE);
        assert!(snap.body_text.contains("Eat well."));
        assert!(!snap.body_text.contains("console.log"));
        assert!(!snap.body_text.contains("color: red"));
    }

    #[test]
    fn finds_last_reviewed_date() {
        let snap = extract_snapshot("https://example.org/heart-health", SAMPLE);
        assert_eq!(snap.last_reviewed.as_deref(), Some("January 5, 2024"));
    }

    #[test]
    fn body_text_is_truncated() {
        let long = format!("<html><body><p>{}</p></body></html>", "word ".repeat(5000));
        let snap = extract_snapshot("https://example.org/x", &long);
        assert!(snap.body_text.len() <= BODY_TEXT_LIMIT);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "héllo wörld";
        assert_eq!(truncate_at_boundary(text, 100), text);
        // Byte 2 falls inside the two-byte 'é'.
        assert_eq!(truncate_at_boundary(text, 2), "h");
        assert_eq!(truncate_at_boundary(text, 3), "hé");
    }

    #[test]
    fn missing_fields_are_none() {
        let snap = extract_snapshot("https://example.org/x", "<html><body>hi</body></html>");
        assert!(snap.title.is_none());
        assert!(snap.meta_description.is_none());
        assert!(snap.canonical_url.is_none());
        assert!(snap.og_tags.is_empty());
        assert!(snap.last_reviewed.is_none());
    }

    #[test]
    fn json_ld_graph_and_arrays_are_flattened() {
        let html = r#"<script type="application/ld+json">
            {"@graph": [{"@type": "Article"}, {"@type": ["WebPage", "FAQPage"]}]}
        </script>"#;
        let snap = extract_snapshot("https://example.org/x", html);
        assert_eq!(snap.json_ld_types, vec!["Article", "WebPage", "FAQPage"]);
    }
}
