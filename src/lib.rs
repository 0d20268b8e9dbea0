//! LegendsVPN - proxy discovery and triage
//!
//! Collects public HTTP proxies from a few lists, keeps them in a flat file
//! and probes them to find a handful of working, low-latency ones.
//! It never routes traffic itself.

pub mod proxy;
pub mod tui;

pub use proxy::*;

use std::path::PathBuf;

/// Application result type
pub type Result<T> = anyhow::Result<T>;

/// Default directory holding the candidate file
const DEFAULT_DATA_DIR: &str = "data";

/// Name of the candidate file inside the data directory
const PROXY_FILE_NAME: &str = "proxies.txt";

/// Default number of working proxies a search aims for
const DEFAULT_MIN_WORKING: usize = 3;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory for the candidate file and the log
    pub data_dir: PathBuf,
    /// Providers queried by a fetch
    pub sources: Vec<ProxySource>,
    pub fetcher: FetcherConfig,
    pub validator: ValidatorConfig,
    pub geo: GeoConfig,
    /// Working proxies a search aims for
    pub min_working: usize,
    /// Upper bound on probes per search, all candidates when `None`
    pub max_tests: Option<usize>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            sources: default_sources(),
            fetcher: FetcherConfig::default(),
            validator: ValidatorConfig::default(),
            geo: GeoConfig::default(),
            min_working: DEFAULT_MIN_WORKING,
            max_tests: None,
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the candidate file
    pub fn proxy_file(&self) -> PathBuf {
        self.data_dir.join(PROXY_FILE_NAME)
    }

    pub fn with_data_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_sources(mut self, sources: Vec<ProxySource>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_fetcher(mut self, fetcher: FetcherConfig) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_validator(mut self, validator: ValidatorConfig) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_geo(mut self, geo: GeoConfig) -> Self {
        self.geo = geo;
        self
    }

    pub fn with_min_working(mut self, min_working: usize) -> Self {
        self.min_working = min_working;
        self
    }

    pub fn with_max_tests(mut self, max_tests: Option<usize>) -> Self {
        self.max_tests = max_tests;
        self
    }
}
