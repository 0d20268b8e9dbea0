//! Wiring of fetcher, store, validator and geolocation into the two user
//! workflows: refreshing the candidate list and finding the fastest proxy

use crate::proxy::fetcher::SourceFetcher;
use crate::proxy::geo::{GeoInfo, GeoLookup};
use crate::proxy::models::{Candidate, ProxyRecord, WorkingSet};
use crate::proxy::sources::ProxySource;
use crate::proxy::store::{ProxyStore, StoreError};
use crate::proxy::validator::{ProxyValidator, ValidationEvent};
use crate::{AppConfig, Result};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn, Span};

/// Original and proxied location of the chosen proxy
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionReport {
    pub proxy: Candidate,
    pub latency_ms: f64,
    pub original: GeoInfo,
    pub via_proxy: GeoInfo,
}

/// Entry point used by the CLI and the menu app
pub struct ProxyManager {
    sources: Vec<ProxySource>,
    fetcher: SourceFetcher,
    store: ProxyStore,
    validator: ProxyValidator,
    geo: GeoLookup,
    span: Span,
}

impl ProxyManager {
    pub fn new(config: AppConfig) -> Result<Self> {
        let span = tracing::info_span!("manager");
        let store = ProxyStore::new(config.proxy_file()).with_span(span.clone());
        store.ensure_parent_dir()?;

        Ok(Self {
            fetcher: SourceFetcher::with_config(config.fetcher)?.with_span(span.clone()),
            validator: ProxyValidator::with_config(config.validator).with_span(span.clone()),
            geo: GeoLookup::with_config(config.geo).with_span(span.clone()),
            sources: config.sources,
            store,
            span,
        })
    }

    pub fn store(&self) -> &ProxyStore {
        &self.store
    }

    pub fn sources(&self) -> &[ProxySource] {
        &self.sources
    }

    /// Download all sources and persist the union
    ///
    /// Returns the number of unique candidates fetched. When nothing could
    /// be fetched the stored list is left as it was.
    pub async fn fetch_proxies(&self) -> Result<usize> {
        let candidates = self.fetcher.fetch(&self.sources).await;
        if candidates.is_empty() {
            error!(parent: &self.span, "No proxies fetched from any source");
            return Ok(0);
        }
        self.store.save(&candidates)?;
        Ok(candidates.len())
    }

    /// Stored candidates, empty when the file is missing or holds nothing
    ///
    /// Lines that are not `host:port` are kept; they simply fail when tested.
    pub fn load_candidates(&self) -> Vec<Candidate> {
        match self.store.load() {
            Ok(candidates) => {
                let malformed = candidates.iter().filter(|c| !c.is_well_formed()).count();
                if malformed > 0 {
                    warn!(
                        parent: &self.span,
                        "{} of {} stored entries are not host:port",
                        malformed,
                        candidates.len()
                    );
                }
                candidates
            }
            Err(e @ (StoreError::NotFound(_) | StoreError::Empty(_))) => {
                error!(parent: &self.span, "{}", e);
                Vec::new()
            }
            Err(e) => {
                error!(parent: &self.span, "Cannot read proxy file: {}", e);
                Vec::new()
            }
        }
    }

    /// Validate the stored candidates, fastest working proxy first
    pub async fn find_working_proxies(
        &self,
        min_working: usize,
        max_tests: Option<usize>,
    ) -> WorkingSet {
        self.find_working_proxies_with_progress(min_working, max_tests, None)
            .await
    }

    pub async fn find_working_proxies_with_progress(
        &self,
        min_working: usize,
        max_tests: Option<usize>,
        progress: Option<UnboundedSender<ValidationEvent>>,
    ) -> WorkingSet {
        let candidates = self.load_candidates();
        if candidates.is_empty() {
            return Vec::new();
        }
        info!(parent: &self.span, "Loaded {} proxies from {}", candidates.len(), self.store.path().display());
        self.validator
            .run_with_progress(candidates, min_working, max_tests, progress)
            .await
    }

    /// Where the direct connection and the given proxy appear to be
    pub async fn connection_report(&self, record: &ProxyRecord) -> ConnectionReport {
        let (original, via_proxy) = tokio::join!(
            self.geo.lookup_direct(),
            self.geo.lookup_via(&record.candidate)
        );

        ConnectionReport {
            proxy: record.candidate.clone(),
            latency_ms: record.latency_ms,
            original,
            via_proxy,
        }
    }
}
