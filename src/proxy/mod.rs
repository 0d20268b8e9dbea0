//! Proxy module for discovering and triaging public proxies
//!
//! This module provides functionality for:
//! - Fetching candidate lists from several providers with per-format adapters
//! - Persisting the candidates to a sorted flat file
//! - Probing candidates with a bounded pool and ranking them by latency
//! - Geolocating the direct connection and a proxy's egress address

pub mod fetcher;
pub mod geo;
pub mod manager;
pub mod models;
pub mod sources;
pub mod store;
pub mod validator;

pub use fetcher::{FetchResult, FetcherConfig, SourceFetcher};
pub use geo::{GeoConfig, GeoInfo, GeoLocator, GeoLookup};
pub use manager::{ConnectionReport, ProxyManager};
pub use models::{Candidate, ProxyRecord, ProxyType, WorkingSet};
pub use sources::{
    default_sources, DigitPrefixedList, PlainTextList, ProxySource, SourceAdapter, TextareaList,
};
pub use store::{ProxyStore, StoreError};
pub use validator::{HttpProbe, Probe, ProxyValidator, StopRule, ValidationEvent, ValidatorConfig};
