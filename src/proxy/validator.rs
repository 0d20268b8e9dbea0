//! Proxy validator for finding working, low-latency proxies

use crate::proxy::models::{sort_by_latency, Candidate, ProxyRecord, ProxyType, WorkingSet};
use crate::Result;
use futures::future;
use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use reqwest::{Client, Proxy as ReqwestProxy, StatusCode};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn, Span};

/// Default timeout for a single probe in seconds
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Default number of concurrent probes
const DEFAULT_CONCURRENCY: usize = 20;

/// Default bound on a whole validation pass in seconds
const DEFAULT_DEADLINE_SECS: u64 = 600;

/// Default URL requested through each candidate
pub const DEFAULT_PROBE_URL: &str = "http://ip-api.com/json";

/// Progress of a validation pass, for observers such as the menu app
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationEvent {
    /// The pass will probe at most `planned` of `total` candidates
    Started { total: usize, planned: usize },
    /// A probe finished, working or not
    Probed(ProxyRecord),
    /// No further probe will finish; `tested` candidates were admitted
    Finished { tested: usize, working: usize },
}

/// When a validation pass stops admitting new probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopRule {
    /// Keep probing until the pool or `max_tests` is exhausted. Reaching
    /// `min_working` on its own does not stop the pass.
    #[default]
    ExhaustPool,
    /// Stop as soon as `min_working` proxies answered, or earlier at `max_tests`
    AtMinWorking,
}

impl StopRule {
    /// Whether another candidate may be probed after `tested` were admitted
    /// and `working` of them succeeded
    pub fn should_continue(
        self,
        tested: usize,
        working: usize,
        min_working: usize,
        max_tests: usize,
        total: usize,
    ) -> bool {
        match self {
            StopRule::ExhaustPool => {
                tested < max_tests && (working < min_working || tested < total)
            }
            StopRule::AtMinWorking => {
                tested < max_tests && tested < total && working < min_working
            }
        }
    }
}

/// Configuration for proxy validator
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Timeout for each probe
    pub probe_timeout: Duration,
    /// Number of concurrent probes
    pub concurrency: usize,
    /// URL to request through each candidate
    pub probe_url: String,
    /// Scheme used to talk to the candidates
    pub proxy_type: ProxyType,
    /// Termination rule of a pass
    pub stop_rule: StopRule,
    /// Upper bound on the wall-clock time of a whole pass
    pub deadline: Option<Duration>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            probe_url: DEFAULT_PROBE_URL.to_string(),
            proxy_type: ProxyType::Http,
            stop_rule: StopRule::ExhaustPool,
            deadline: Some(Duration::from_secs(DEFAULT_DEADLINE_SECS)),
        }
    }
}

impl ValidatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_probe_url(mut self, url: String) -> Self {
        self.probe_url = url;
        self
    }

    pub fn with_proxy_type(mut self, proxy_type: ProxyType) -> Self {
        self.proxy_type = proxy_type;
        self
    }

    pub fn with_stop_rule(mut self, stop_rule: StopRule) -> Self {
        self.stop_rule = stop_rule;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// A single connectivity test of one candidate
pub trait Probe: Send + Sync {
    /// Classify the candidate; failures are reported as a non-working record
    fn probe(&self, candidate: &Candidate) -> impl Future<Output = ProxyRecord> + Send;
}

/// Probes by requesting a URL through the candidate as a forward proxy
#[derive(Debug, Clone)]
pub struct HttpProbe {
    timeout: Duration,
    url: String,
    proxy_type: ProxyType,
}

impl HttpProbe {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            timeout: config.probe_timeout,
            url: config.probe_url.clone(),
            proxy_type: config.proxy_type,
        }
    }

    /// Create a reqwest client routed through the candidate
    fn create_client(&self, candidate: &Candidate) -> Result<Client> {
        let proxy = ReqwestProxy::all(candidate.proxy_url(self.proxy_type))?;

        let client = Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(client)
    }

    async fn round_trip(&self, candidate: &Candidate) -> Result<Duration> {
        let client = self.create_client(candidate)?;
        let start = Instant::now();
        let response = client.get(&self.url).send().await?;
        let elapsed = start.elapsed();

        if response.status() != StatusCode::OK {
            anyhow::bail!("HTTP status: {}", response.status());
        }
        Ok(elapsed)
    }
}

impl Probe for HttpProbe {
    async fn probe(&self, candidate: &Candidate) -> ProxyRecord {
        match tokio::time::timeout(self.timeout, self.round_trip(candidate)).await {
            Ok(Ok(elapsed)) => {
                ProxyRecord::working(candidate.clone(), elapsed.as_secs_f64() * 1000.0)
            }
            Ok(Err(e)) => {
                debug!(proxy = %candidate, "Proxy failed: {}", e);
                ProxyRecord::failed(candidate.clone())
            }
            Err(_) => {
                debug!(proxy = %candidate, "Proxy timed out");
                ProxyRecord::failed(candidate.clone())
            }
        }
    }
}

/// Finds working proxies among candidates with a bounded pool of probes
pub struct ProxyValidator<P = HttpProbe> {
    config: ValidatorConfig,
    probe: P,
    span: Span,
}

impl ProxyValidator<HttpProbe> {
    /// Create a new validator with default configuration
    pub fn new() -> Self {
        Self::with_config(ValidatorConfig::default())
    }

    /// Create a new validator probing over HTTP with custom configuration
    pub fn with_config(config: ValidatorConfig) -> Self {
        let probe = HttpProbe::new(&config);
        Self::with_probe(config, probe)
    }
}

impl Default for ProxyValidator<HttpProbe> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Probe> ProxyValidator<P> {
    pub fn with_probe(config: ValidatorConfig, probe: P) -> Self {
        Self {
            config,
            probe,
            span: tracing::info_span!("validator"),
        }
    }

    /// Log under the given span instead of the default `validator` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Probe candidates and return the working ones, fastest first
    ///
    /// `max_tests` of `None` allows every candidate to be probed.
    pub async fn run(
        &self,
        candidates: Vec<Candidate>,
        min_working: usize,
        max_tests: Option<usize>,
    ) -> WorkingSet {
        self.run_with_progress(candidates, min_working, max_tests, None)
            .await
    }

    /// Same as [`run`](Self::run), additionally reporting the pass to
    /// `progress`: one `Started`, a `Probed` per finished probe (working or
    /// not), then one `Finished`
    pub async fn run_with_progress(
        &self,
        mut candidates: Vec<Candidate>,
        min_working: usize,
        max_tests: Option<usize>,
        progress: Option<UnboundedSender<ValidationEvent>>,
    ) -> WorkingSet {
        let progress = progress.as_ref();
        // The receiver going away only means nobody is watching
        let notify = move |event: ValidationEvent| {
            if let Some(tx) = progress {
                let _ = tx.send(event);
            }
        };

        let total = candidates.len();
        let max_tests = max_tests.unwrap_or(total);
        notify(ValidationEvent::Started {
            total,
            planned: max_tests.min(total),
        });

        if candidates.is_empty() {
            error!(parent: &self.span, "No proxies to test");
            notify(ValidationEvent::Finished { tested: 0, working: 0 });
            return Vec::new();
        }

        candidates.shuffle(&mut rand::thread_rng());

        let stop_rule = self.config.stop_rule;
        let admitted = AtomicUsize::new(0);
        let working = AtomicUsize::new(0);
        let (admitted, working) = (&admitted, &working);
        let span = &self.span;
        let probe = &self.probe;

        let probes = stream::iter(candidates.into_iter().enumerate())
            .take_while(move |_| {
                let tested = admitted.load(Ordering::SeqCst);
                let proceed = stop_rule.should_continue(
                    tested,
                    working.load(Ordering::SeqCst),
                    min_working,
                    max_tests,
                    total,
                );
                if proceed {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
                future::ready(proceed)
            })
            .map(move |(index, candidate)| async move {
                info!(parent: span, "Testing proxy {}/{}: {}", index + 1, total, candidate);
                let record = probe.probe(&candidate).await;

                if record.is_working {
                    working.fetch_add(1, Ordering::SeqCst);
                    info!(
                        parent: span,
                        "Found working proxy: {} (latency: {:.0}ms)", candidate, record.latency_ms
                    );
                } else {
                    debug!(parent: span, "Proxy failed: {}", candidate);
                }

                notify(ValidationEvent::Probed(record.clone()));
                record
            })
            .buffer_unordered(self.config.concurrency.max(1));

        let mut found = Vec::new();
        let collect = probes.for_each(|record| {
            if record.is_working {
                found.push(record);
            }
            future::ready(())
        });

        match self.config.deadline {
            Some(deadline) => {
                if tokio::time::timeout(deadline, collect).await.is_err() {
                    warn!(
                        parent: span,
                        "Validation deadline of {:?} reached after {} probes",
                        deadline,
                        admitted.load(Ordering::SeqCst)
                    );
                }
            }
            None => collect.await,
        }

        sort_by_latency(&mut found);
        info!(
            parent: span,
            "Tested {} of {} proxies, {} working",
            admitted.load(Ordering::SeqCst),
            total,
            found.len()
        );
        notify(ValidationEvent::Finished {
            tested: admitted.load(Ordering::SeqCst),
            working: found.len(),
        });
        found
    }
}
