//! Health probing for pooled proxies
//!
//! Samples proxies (blacklisted ones included, so they can prove recovery),
//! probes them with bounded concurrency and feeds every completed probe
//! back into the blacklist controller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, instrument, warn};

use super::pool::ProxyPool;
use crate::error::{Result, RotaError};
use crate::models::{ErrorKind, HealthProbeResult, Outcome, ProbeReport, ProxyEndpoint};

/// A single probe request performed through a proxy
#[async_trait]
pub trait ProbeCheck: Send + Sync {
    async fn check(&self, endpoint: &ProxyEndpoint) -> std::result::Result<(), ErrorKind>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Health prober for the shared pool
pub struct HealthProber {
    pool: Arc<ProxyPool>,
    probe_timeout: Duration,
}

impl HealthProber {
    pub fn new(pool: Arc<ProxyPool>) -> Self {
        let probe_timeout = pool.config().probe_timeout;
        Self {
            pool,
            probe_timeout,
        }
    }

    pub fn with_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Probe up to `sample_size` distinct proxies with `worker_count`
    /// concurrent workers.
    ///
    /// Probes still running when `deadline` passes are reported back as
    /// cancelled and leave the records untouched.
    #[instrument(skip(self, check, deadline), fields(check = check.name()))]
    pub async fn probe(
        &self,
        sample_size: usize,
        worker_count: usize,
        check: &dyn ProbeCheck,
        deadline: Option<Instant>,
    ) -> Result<ProbeReport> {
        if sample_size == 0 {
            return Err(RotaError::InvalidRequest(
                "sample size must be at least 1".into(),
            ));
        }
        if self.pool.is_empty() {
            return Err(RotaError::NoProxiesAvailable {
                attempted: 0,
                last_error: None,
            });
        }

        let addresses = self
            .pool
            .store()
            .sample_addresses(sample_size, &mut rand::thread_rng());
        let endpoints: Vec<ProxyEndpoint> = addresses
            .iter()
            .filter_map(|address| self.pool.get(address).ok())
            .map(|record| record.endpoint)
            .collect();

        let worker_count = worker_count.max(1);
        info!(
            "Probing {} proxies with {} workers ({}s timeout)",
            endpoints.len(),
            worker_count,
            self.probe_timeout.as_secs()
        );

        let started = Instant::now();
        let results = futures::stream::iter(endpoints)
            .map(|endpoint| async move {
                let result = self.probe_one(&endpoint, check, deadline).await;
                self.record(&result);
                result
            })
            .buffer_unordered(worker_count)
            .collect::<Vec<HealthProbeResult>>()
            .await;

        let report = ProbeReport::from_results(results, started.elapsed().as_millis() as u64);
        info!(
            "Probe complete: {} healthy, {} unhealthy, {} cancelled ({:.1}% success, verdict {:?})",
            report.succeeded, report.failed, report.cancelled, report.success_rate, report.verdict
        );

        Ok(report)
    }

    async fn probe_one(
        &self,
        endpoint: &ProxyEndpoint,
        check: &dyn ProbeCheck,
        deadline: Option<Instant>,
    ) -> HealthProbeResult {
        debug!("Probing proxy {}", endpoint.address);

        let start = Instant::now();
        let attempt = timeout(self.probe_timeout, check.check(endpoint));
        let outcome = match deadline {
            Some(deadline) => tokio::select! {
                result = attempt => Some(result),
                _ = sleep_until(deadline) => None,
            },
            None => Some(attempt.await),
        };
        let latency = start.elapsed().as_millis() as u64;

        match outcome {
            Some(Ok(Ok(()))) => {
                debug!("Proxy {} is healthy ({}ms)", endpoint.address, latency);
                HealthProbeResult::healthy(endpoint.address.clone(), latency)
            }
            Some(Ok(Err(kind))) => {
                debug!("Proxy {} is unhealthy: {}", endpoint.address, kind);
                HealthProbeResult::failed(endpoint.address.clone(), latency, kind)
            }
            Some(Err(_)) => {
                debug!("Proxy {} probe timed out", endpoint.address);
                HealthProbeResult::failed(endpoint.address.clone(), latency, ErrorKind::Timeout)
            }
            None => HealthProbeResult::failed(
                endpoint.address.clone(),
                latency,
                ErrorKind::Cancelled,
            ),
        }
    }

    fn record(&self, result: &HealthProbeResult) {
        let outcome = match result.error_kind {
            None => Outcome::success(result.latency_millis),
            Some(kind) => Outcome::Failure(kind),
        };
        if let Err(e) = self.pool.report_outcome(&result.address, outcome) {
            warn!("Failed to record probe result for {}: {}", result.address, e);
        }
    }
}
