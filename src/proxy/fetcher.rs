//! Source fetcher for downloading candidate lists from proxy providers
//!
//! This module provides functionality for:
//! - Querying every configured provider with a bounded timeout
//! - Handing each response body to the provider's [`SourceAdapter`](crate::proxy::sources::SourceAdapter)
//! - Tolerating failed providers and merging the rest into one candidate set

use crate::proxy::models::Candidate;
use crate::proxy::sources::ProxySource;
use crate::Result;
use futures::future::join_all;
use reqwest::Client;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{error, info, Span};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Result of fetching a single source
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Name of the source that was fetched
    pub source: String,
    /// Candidates extracted from the source
    pub candidates: Vec<Candidate>,
    /// Error message if fetching failed
    pub error: Option<String>,
}

impl FetchResult {
    pub fn success(source: String, candidates: Vec<Candidate>) -> Self {
        Self {
            source,
            candidates,
            error: None,
        }
    }

    pub fn failure(source: String, error: String) -> Self {
        Self {
            source,
            candidates: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Configuration for the source fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Timeout for each provider request
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Honor `HTTP_PROXY`/`HTTPS_PROXY` from the environment
    pub use_system_proxy: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            use_system_proxy: true,
        }
    }
}

impl FetcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_system_proxy(mut self, enabled: bool) -> Self {
        self.use_system_proxy = enabled;
        self
    }
}

/// Downloads candidate lists from proxy providers
pub struct SourceFetcher {
    client: Client,
    span: Span,
}

impl SourceFetcher {
    /// Create a new fetcher with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(FetcherConfig::default())
    }

    /// Create a new fetcher with custom configuration
    pub fn with_config(config: FetcherConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent);
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }

        Ok(Self {
            client: builder.build()?,
            span: tracing::info_span!("fetcher"),
        })
    }

    /// Log under the given span instead of the default `fetcher` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Fetch one source and extract its candidates
    pub async fn fetch_source(&self, source: &ProxySource) -> Result<Vec<Candidate>> {
        info!(
            parent: &self.span,
            source = %source.name,
            url = %source.url,
            format = source.adapter().kind(),
            "Fetching proxies"
        );
        let response = self.client.get(&source.url).send().await?.error_for_status()?;
        let body = response.text().await?;
        Ok(source.extract_candidates(&body))
    }

    /// Fetch all sources concurrently, returning results for each
    pub async fn fetch_with_results(&self, sources: &[ProxySource]) -> Vec<FetchResult> {
        let fetches = sources.iter().map(|source| async move {
            match self.fetch_source(source).await {
                Ok(candidates) => {
                    info!(
                        parent: &self.span,
                        source = %source.name,
                        count = candidates.len(),
                        "Fetched candidates"
                    );
                    FetchResult::success(source.name.clone(), candidates)
                }
                Err(e) => {
                    error!(parent: &self.span, source = %source.name, "Error fetching from {}: {}", source.url, e);
                    FetchResult::failure(source.name.clone(), e.to_string())
                }
            }
        });

        join_all(fetches).await
    }

    /// Fetch all sources and union the candidates of those that succeeded
    ///
    /// Failed sources are logged and skipped; if every source fails the
    /// result is simply empty.
    pub async fn fetch(&self, sources: &[ProxySource]) -> BTreeSet<Candidate> {
        merge_results(self.fetch_with_results(sources).await)
    }
}

/// Union the candidates of all successful results
pub fn merge_results(results: Vec<FetchResult>) -> BTreeSet<Candidate> {
    results
        .into_iter()
        .filter(FetchResult::is_success)
        .flat_map(|result| result.candidates)
        .collect()
}
