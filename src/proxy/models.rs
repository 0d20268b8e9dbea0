//! Proxy data models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Proxy type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Http => write!(f, "http"),
            ProxyType::Https => write!(f, "https"),
            ProxyType::Socks4 => write!(f, "socks4"),
            ProxyType::Socks5 => write!(f, "socks5"),
        }
    }
}

/// An unvalidated `host:port` entry scraped from a proxy list.
///
/// The canonical form is the trimmed string itself; two candidates are the
/// same proxy exactly when their strings are equal. The format is not
/// enforced, a malformed entry simply never passes a probe.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Candidate(String);

impl Candidate {
    /// Create a candidate from raw text, `None` if nothing is left after trimming
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host part, everything before the last `:`
    pub fn host(&self) -> &str {
        self.0.rsplit_once(':').map_or(self.0.as_str(), |(host, _)| host)
    }

    /// Port part, if the entry ends in `:<u16>`
    pub fn port(&self) -> Option<u16> {
        self.0.rsplit_once(':').and_then(|(_, port)| port.parse().ok())
    }

    /// Whether the entry looks like `host:port` with a numeric port
    pub fn is_well_formed(&self) -> bool {
        matches!(self.0.split_once(':'), Some((host, port)) if !host.is_empty() && !port.contains(':'))
            && self.port().is_some_and(|p| p != 0)
    }

    /// Forward-proxy URL for this candidate, e.g. `http://1.2.3.4:8080`
    pub fn proxy_url(&self, proxy_type: ProxyType) -> String {
        format!("{}://{}", proxy_type, self.0)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Candidate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Outcome of probing one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub candidate: Candidate,
    pub is_working: bool,
    /// Round trip in milliseconds, `f64::INFINITY` when not working
    pub latency_ms: f64,
}

impl ProxyRecord {
    pub fn working(candidate: Candidate, latency_ms: f64) -> Self {
        Self {
            candidate,
            is_working: true,
            latency_ms,
        }
    }

    pub fn failed(candidate: Candidate) -> Self {
        Self {
            candidate,
            is_working: false,
            latency_ms: f64::INFINITY,
        }
    }
}

/// Working proxies of one validation run, fastest first
pub type WorkingSet = Vec<ProxyRecord>;

/// Sort records ascending by latency, keeping the relative order of ties
pub fn sort_by_latency(records: &mut [ProxyRecord]) {
    records.sort_by(|a, b| a.latency_ms.total_cmp(&b.latency_ms));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(s: &str) -> Candidate {
        Candidate::new(s).unwrap()
    }

    #[test]
    fn test_candidate_trims_whitespace() {
        let c = candidate("  192.168.1.1:8080\r");
        assert_eq!(c.as_str(), "192.168.1.1:8080");
        assert_eq!(c.host(), "192.168.1.1");
        assert_eq!(c.port(), Some(8080));
        assert!(c.is_well_formed());
    }

    #[test]
    fn test_candidate_rejects_blank() {
        assert!(Candidate::new("").is_none());
        assert!(Candidate::new("   \t").is_none());
    }

    #[test]
    fn test_candidate_malformed_is_kept() {
        let c = candidate("Updated at 2024-01-01 10:00:00 UTC.");
        assert!(!c.is_well_formed());
        assert_eq!(c.port(), None);

        assert!(!candidate("10.0.0.1").is_well_formed());
        assert!(!candidate("10.0.0.1:0").is_well_formed());
        assert!(!candidate(":8080").is_well_formed());
    }

    #[test]
    fn test_proxy_url() {
        let c = candidate("127.0.0.1:8080");
        assert_eq!(c.proxy_url(ProxyType::Http), "http://127.0.0.1:8080");
        assert_eq!(c.proxy_url(ProxyType::Socks5), "socks5://127.0.0.1:8080");
    }

    #[test]
    fn test_proxy_record_constructors() {
        let ok = ProxyRecord::working(candidate("1.1.1.1:80"), 42.5);
        assert!(ok.is_working);
        assert_eq!(ok.latency_ms, 42.5);

        let bad = ProxyRecord::failed(candidate("1.1.1.1:80"));
        assert!(!bad.is_working);
        assert!(bad.latency_ms.is_infinite());
    }

    #[test]
    fn test_sort_by_latency_is_stable() {
        let mut records = vec![
            ProxyRecord::working(candidate("c:1"), 300.0),
            ProxyRecord::working(candidate("a:1"), 100.0),
            ProxyRecord::working(candidate("b:1"), 100.0),
        ];
        sort_by_latency(&mut records);
        let order: Vec<_> = records.iter().map(|r| r.candidate.as_str()).collect();
        assert_eq!(order, vec!["a:1", "b:1", "c:1"]);
    }
}
