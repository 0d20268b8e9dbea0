//! Geolocation of the direct connection and of a proxy's egress address
//!
//! Lookups are cosmetic: every failure degrades to an empty [`GeoInfo`]
//! which renders as `Unknown`.

use crate::proxy::models::{Candidate, ProxyType};
use crate::proxy::validator::DEFAULT_PROBE_URL;
use crate::Result;
use maxminddb::{geoip2, Reader};
use reqwest::{Client, Proxy as ReqwestProxy, StatusCode};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn, Span};

/// Default timeout for geolocation requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Location as reported by the geolocation endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GeoInfo {
    /// Address the endpoint saw the request coming from
    #[serde(default, rename = "query")]
    pub ip: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    /// ISO 3166-1 alpha-2 country code (e.g., "US", "CN")
    #[serde(default, rename = "countryCode")]
    pub country_code: Option<String>,
    #[serde(default)]
    pub isp: Option<String>,
}

impl GeoInfo {
    /// Check if the location has any meaningful data
    pub fn is_empty(&self) -> bool {
        self.city.is_none() && self.country.is_none() && self.country_code.is_none()
    }

    /// `City, Country`, with `Unknown` for missing parts
    pub fn short_display(&self) -> String {
        format!(
            "{}, {}",
            self.city.as_deref().unwrap_or("Unknown"),
            self.country.as_deref().unwrap_or("Unknown")
        )
    }
}

impl std::fmt::Display for GeoInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.ip {
            Some(ip) => write!(f, "{} ({})", self.short_display(), ip),
            None => write!(f, "{}", self.short_display()),
        }
    }
}

/// Offline geolocation from a MaxMind MMDB database
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Create a new GeoLocator from an MMDB file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Look up the geolocation for an IP address string
    pub fn lookup(&self, ip_str: &str) -> Result<GeoInfo> {
        let ip: IpAddr = ip_str.parse()?;
        let lookup_result = self.reader.lookup(ip)?;

        let city: Option<geoip2::City> = lookup_result.decode()?;
        let Some(city) = city else {
            return Ok(GeoInfo::default());
        };

        Ok(GeoInfo {
            ip: Some(ip.to_string()),
            city: city.city.names.english.map(String::from),
            country: city.country.names.english.map(String::from),
            country_code: city.country.iso_code.map(String::from),
            isp: None,
        })
    }
}

impl Clone for GeoLocator {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}

/// Configuration for geolocation lookups
#[derive(Debug, Clone)]
pub struct GeoConfig {
    /// JSON endpoint reporting the caller's address and location
    pub endpoint: String,
    /// Timeout for each lookup
    pub timeout: Duration,
    /// Scheme used to talk to proxies
    pub proxy_type: ProxyType,
    /// Honor proxy settings from the environment for direct lookups
    pub use_system_proxy: bool,
    /// Path to MMDB file used when a lookup through a proxy fails
    pub mmdb_path: Option<PathBuf>,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_PROBE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            proxy_type: ProxyType::Http,
            use_system_proxy: true,
            mmdb_path: None,
        }
    }
}

impl GeoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_system_proxy(mut self, enabled: bool) -> Self {
        self.use_system_proxy = enabled;
        self
    }

    pub fn with_mmdb_path(mut self, path: PathBuf) -> Self {
        self.mmdb_path = Some(path);
        self
    }
}

/// Resolves where the caller and a proxy appear to be
pub struct GeoLookup {
    config: GeoConfig,
    geo_locator: Option<GeoLocator>,
    span: Span,
}

impl GeoLookup {
    pub fn new() -> Self {
        Self::with_config(GeoConfig::default())
    }

    pub fn with_config(config: GeoConfig) -> Self {
        let span = tracing::info_span!("geo");
        let geo_locator = config.mmdb_path.as_ref().and_then(|path| {
            GeoLocator::from_path(path)
                .map_err(|e| warn!(parent: &span, "Cannot open MMDB {}: {}", path.display(), e))
                .ok()
        });

        Self {
            config,
            geo_locator,
            span,
        }
    }

    /// Log under the given span instead of the default `geo` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Location of the direct connection
    pub async fn lookup_direct(&self) -> GeoInfo {
        let result: Result<GeoInfo> = async {
            let mut builder = Client::builder().timeout(self.config.timeout);
            if !self.config.use_system_proxy {
                builder = builder.no_proxy();
            }
            self.fetch(builder.build()?).await
        }
        .await;

        result.unwrap_or_else(|e| {
            warn!(parent: &self.span, "Error getting current IP info: {}", e);
            GeoInfo::default()
        })
    }

    /// Location of the egress address of `candidate`
    pub async fn lookup_via(&self, candidate: &Candidate) -> GeoInfo {
        let result: Result<GeoInfo> = async {
            let proxy = ReqwestProxy::all(candidate.proxy_url(self.config.proxy_type))?;
            let client = Client::builder()
                .proxy(proxy)
                .timeout(self.config.timeout)
                .danger_accept_invalid_certs(true)
                .build()?;
            self.fetch(client).await
        }
        .await;

        match result {
            Ok(info) => info,
            Err(e) => {
                warn!(parent: &self.span, proxy = %candidate, "Error getting proxy location: {}", e);
                self.lookup_offline(candidate)
            }
        }
    }

    fn lookup_offline(&self, candidate: &Candidate) -> GeoInfo {
        let Some(geo) = &self.geo_locator else {
            return GeoInfo::default();
        };
        geo.lookup(candidate.host()).unwrap_or_else(|e| {
            debug!(parent: &self.span, proxy = %candidate, "MMDB lookup failed: {}", e);
            GeoInfo::default()
        })
    }

    async fn fetch(&self, client: Client) -> Result<GeoInfo> {
        let response = client.get(&self.config.endpoint).send().await?;
        if response.status() != StatusCode::OK {
            anyhow::bail!("HTTP status: {}", response.status());
        }
        Ok(response.json::<GeoInfo>().await?)
    }
}

impl Default for GeoLookup {
    fn default() -> Self {
        Self::new()
    }
}
