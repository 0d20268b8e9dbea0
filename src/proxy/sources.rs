//! Proxy list providers and the per-format candidate extractors
//!
//! Each provider publishes its list in its own format. A [`SourceAdapter`]
//! turns a response body into candidates, so a new provider format is added
//! by implementing the trait rather than by branching on the URL.

use crate::proxy::models::Candidate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Regex pattern to locate the first textarea element of a page
static TEXTAREA_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<textarea[^>]*>(.*?)</textarea\s*>").expect("Invalid textarea regex")
});

/// Extracts candidates from the body of a provider response
pub trait SourceAdapter: Send + Sync {
    /// Short label used in logs
    fn kind(&self) -> &'static str;

    fn extract_candidates(&self, body: &str) -> Vec<Candidate>;
}

/// One `host:port` per line
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextList;

impl SourceAdapter for PlainTextList {
    fn kind(&self) -> &'static str {
        "plain"
    }

    fn extract_candidates(&self, body: &str) -> Vec<Candidate> {
        body.lines().filter_map(Candidate::new).collect()
    }
}

/// HTML page holding the list inside a `<textarea>`
#[derive(Debug, Clone, Copy, Default)]
pub struct TextareaList;

impl SourceAdapter for TextareaList {
    fn kind(&self) -> &'static str {
        "textarea"
    }

    fn extract_candidates(&self, body: &str) -> Vec<Candidate> {
        let Some(inner) = TEXTAREA_REGEX.captures(body).and_then(|cap| cap.get(1)) else {
            return Vec::new();
        };
        PlainTextList.extract_candidates(&decode_entities(inner.as_str()))
    }
}

/// Annotated list where proxy rows start with a digit and the first
/// whitespace-separated column is `host:port`, e.g.
/// `1.2.3.4:8080 US-N-S + `
#[derive(Debug, Clone, Copy, Default)]
pub struct DigitPrefixedList;

impl SourceAdapter for DigitPrefixedList {
    fn kind(&self) -> &'static str {
        "digit-prefixed"
    }

    fn extract_candidates(&self, body: &str) -> Vec<Candidate> {
        body.lines()
            .filter(|line| line.starts_with(|c: char| c.is_ascii_digit()))
            .filter_map(|line| line.split_whitespace().next())
            .filter_map(Candidate::new)
            .collect()
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Proxy source representing a website that provides proxy lists
#[derive(Clone)]
pub struct ProxySource {
    /// Name of the proxy source
    pub name: String,
    /// URL to fetch proxies from
    pub url: String,
    adapter: Arc<dyn SourceAdapter>,
}

impl ProxySource {
    pub fn new(name: &str, url: &str, adapter: impl SourceAdapter + 'static) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            adapter: Arc::new(adapter),
        }
    }

    pub fn plain(name: &str, url: &str) -> Self {
        Self::new(name, url, PlainTextList)
    }

    pub fn adapter(&self) -> &dyn SourceAdapter {
        self.adapter.as_ref()
    }

    pub fn extract_candidates(&self, body: &str) -> Vec<Candidate> {
        self.adapter.extract_candidates(body)
    }
}

impl fmt::Debug for ProxySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySource")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("adapter", &self.adapter.kind())
            .finish()
    }
}

/// The public HTTP proxy lists queried by default
pub fn default_sources() -> Vec<ProxySource> {
    vec![
        ProxySource::new(
            "proxy-list.download",
            "https://www.proxy-list.download/api/v1/get?type=http",
            PlainTextList,
        ),
        ProxySource::new("spys.me", "https://spys.me/proxy.txt", DigitPrefixedList),
        ProxySource::new("free-proxy-list.net", "https://free-proxy-list.net/", TextareaList),
    ]
}
