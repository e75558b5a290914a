//! Fetch orchestration
//!
//! Runs one logical request through the pool, retrying with a freshly
//! selected proxy after each failure.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, instrument, warn};

use super::pool::ProxyPool;
use crate::config::PoolConfig;
use crate::error::{Result, RotaError};
use crate::models::{ErrorKind, Outcome, ProxyEndpoint};

/// One request that can be performed through a given proxy
#[async_trait]
pub trait ProxiedRequest: Send + Sync {
    type Output: Send;

    async fn execute(&self, endpoint: &ProxyEndpoint)
        -> std::result::Result<Self::Output, ErrorKind>;
}

/// Per-call retry and deadline settings
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    /// Maximum distinct proxies tried
    pub max_attempts: u32,
    /// Timeout for each attempt; hitting it counts as a failure
    pub attempt_timeout: Duration,
    /// Overall deadline; hitting it cancels without recording anything
    pub deadline: Option<Instant>,
}

impl FetchOptions {
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            attempt_timeout: config.request_timeout,
            deadline: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Successful fetch together with where and how it was obtained
#[derive(Debug, Clone)]
pub struct FetchResult<T> {
    pub value: T,
    /// Address of the proxy that served the request
    pub address: String,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

/// Drives [`ProxiedRequest`]s through the shared pool
#[derive(Clone)]
pub struct FetchOrchestrator {
    pool: Arc<ProxyPool>,
}

impl FetchOrchestrator {
    pub fn new(pool: Arc<ProxyPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// Options derived from the pool configuration
    pub fn default_options(&self) -> FetchOptions {
        FetchOptions::from_config(self.pool.config())
    }

    /// Perform `request` through up to `options.max_attempts` distinct proxies.
    ///
    /// Fails with [`RotaError::NoProxiesAvailable`] as soon as the selector
    /// runs dry, with [`RotaError::AllAttemptsFailed`] once every attempt
    /// has failed, and with [`RotaError::Cancelled`] when the deadline
    /// passes first. Zero `max_attempts` is rejected as
    /// [`RotaError::InvalidRequest`].
    #[instrument(skip(self, request, options), fields(max_attempts = options.max_attempts))]
    pub async fn fetch_with_proxy<R: ProxiedRequest>(
        &self,
        request: &R,
        options: &FetchOptions,
    ) -> Result<FetchResult<R::Output>> {
        if options.max_attempts == 0 {
            return Err(RotaError::InvalidRequest(
                "max_attempts must be at least 1".into(),
            ));
        }

        let mut tried: HashSet<String> = HashSet::new();
        let mut attempts = 0;
        let mut last_error: Option<ErrorKind> = None;

        while attempts < options.max_attempts {
            if matches!(options.deadline, Some(deadline) if deadline <= Instant::now()) {
                return Err(self.cancelled(attempts));
            }

            let record = match self.pool.select_next(&tried) {
                Ok(record) => record,
                Err(RotaError::NoProxiesAvailable { .. }) => {
                    warn!(
                        "No proxies available after {} distinct proxies (last error: {:?})",
                        tried.len(),
                        last_error
                    );
                    return Err(RotaError::NoProxiesAvailable {
                        attempted: tried.len(),
                        last_error,
                    });
                }
                Err(e) => return Err(e),
            };

            attempts += 1;
            let address = record.address().to_string();
            tried.insert(address.clone());

            debug!(
                "Fetching through proxy {} (attempt {}/{})",
                address, attempts, options.max_attempts
            );

            let attempt_start = Instant::now();
            let attempt = timeout(options.attempt_timeout, request.execute(&record.endpoint));
            let result = match options.deadline {
                Some(deadline) => tokio::select! {
                    result = attempt => Some(result),
                    _ = sleep_until(deadline) => None,
                },
                None => Some(attempt.await),
            };

            let kind = match result {
                None => return Err(self.cancelled(attempts)),
                Some(Ok(Ok(value))) => {
                    let latency = attempt_start.elapsed().as_millis() as u64;
                    self.report(&address, Outcome::success(latency));
                    info!(
                        "Fetch succeeded through {} in {}ms (attempt {}/{})",
                        address, latency, attempts, options.max_attempts
                    );
                    return Ok(FetchResult {
                        value,
                        address,
                        attempts,
                    });
                }
                Some(Ok(Err(ErrorKind::Cancelled))) => return Err(self.cancelled(attempts)),
                Some(Ok(Err(kind))) => kind,
                Some(Err(_)) => ErrorKind::Timeout,
            };

            warn!(
                "Fetch through {} failed: {} (attempt {}/{})",
                address, kind, attempts, options.max_attempts
            );
            self.report(&address, Outcome::Failure(kind));
            last_error = Some(kind);
        }

        let last_error = last_error.unwrap_or(ErrorKind::UpstreamOtherError);
        warn!(
            "All {} attempts failed across {} proxies, last error: {}",
            attempts,
            tried.len(),
            last_error
        );
        Err(RotaError::AllAttemptsFailed {
            attempts,
            distinct_proxies: tried.len(),
            last_error,
        })
    }

    fn report(&self, address: &str, outcome: Outcome) {
        // The record can only vanish if the store was replaced underneath us.
        if let Err(e) = self.pool.report_outcome(address, outcome) {
            warn!("Failed to record outcome for {}: {}", address, e);
        }
    }

    fn cancelled(&self, attempts: u32) -> RotaError {
        info!("Fetch cancelled by deadline after {} attempts", attempts);
        RotaError::Cancelled { attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails for the first `fail_first` calls, then succeeds with the address used
    struct FlakyRequest {
        fail_first: u32,
        kind: ErrorKind,
        calls: AtomicU32,
    }

    impl FlakyRequest {
        fn new(fail_first: u32, kind: ErrorKind) -> Self {
            Self {
                fail_first,
                kind,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ProxiedRequest for FlakyRequest {
        type Output = String;

        async fn execute(
            &self,
            endpoint: &ProxyEndpoint,
        ) -> std::result::Result<String, ErrorKind> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(self.kind)
            } else {
                Ok(format!("served by {}", endpoint.address))
            }
        }
    }

    /// Never finishes on its own
    struct HangingRequest;

    #[async_trait]
    impl ProxiedRequest for HangingRequest {
        type Output = ();

        async fn execute(&self, _endpoint: &ProxyEndpoint) -> std::result::Result<(), ErrorKind> {
            std::future::pending().await
        }
    }

    fn pool_with(addresses: &[&str], config: PoolConfig) -> Arc<ProxyPool> {
        Arc::new(
            ProxyPool::with_endpoints(
                config,
                addresses.iter().map(|a| ProxyEndpoint::new(*a, None)),
            )
            .unwrap(),
        )
    }

    fn options() -> FetchOptions {
        FetchOptions {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(5),
            deadline: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_distinct_proxy() {
        let pool = pool_with(&["a:1", "b:1", "c:1", "d:1"], PoolConfig::default());
        let orchestrator = FetchOrchestrator::new(pool.clone());
        let request = FlakyRequest::new(2, ErrorKind::UpstreamRateLimited);

        let result = orchestrator
            .fetch_with_proxy(&request, &options())
            .await
            .unwrap();

        assert_eq!(result.attempts, 3);
        assert_eq!(result.address, "c:1");
        assert_eq!(result.value, "served by c:1");

        for failed in ["a:1", "b:1"] {
            let rec = pool.get(failed).unwrap();
            assert_eq!(rec.total_failures, 1);
            assert_eq!(rec.last_error, Some(ErrorKind::UpstreamRateLimited));
        }
        let winner = pool.get("c:1").unwrap();
        assert_eq!(winner.total_uses, 1);
        assert_eq!(winner.total_failures, 0);
        assert_eq!(pool.get("d:1").unwrap().total_uses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_is_rejected() {
        let pool = pool_with(&["a:1"], PoolConfig::default());
        let orchestrator = FetchOrchestrator::new(pool.clone());
        let request = FlakyRequest::new(0, ErrorKind::Timeout);

        let err = orchestrator
            .fetch_with_proxy(&request, &options().with_max_attempts(0))
            .await
            .unwrap_err();

        assert!(matches!(err, RotaError::InvalidRequest(_)));
        assert_eq!(request.calls.load(Ordering::SeqCst), 0);
        assert!(pool.get("a:1").unwrap().last_used_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_blacklisted_is_exhausted_on_first_attempt() {
        let pool = pool_with(&["a:1", "b:1"], PoolConfig::default());
        let until = Instant::now() + Duration::from_secs(120);
        for address in ["a:1", "b:1"] {
            let mut rec = pool.get(address).unwrap();
            rec.blacklisted_until = Some(until);
            pool.upsert(rec);
        }

        let orchestrator = FetchOrchestrator::new(pool.clone());
        let request = FlakyRequest::new(0, ErrorKind::Timeout);
        let err = orchestrator
            .fetch_with_proxy(&request, &options())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RotaError::NoProxiesAvailable {
                attempted: 0,
                last_error: None
            }
        ));
        assert!(err.is_pool_exhausted());
        assert_eq!(request.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_runs_dry_mid_request() {
        let pool = pool_with(&["a:1", "b:1"], PoolConfig::default());
        let orchestrator = FetchOrchestrator::new(pool);
        let request = FlakyRequest::new(u32::MAX, ErrorKind::ConnectionRefused);

        let err = orchestrator
            .fetch_with_proxy(&request, &options())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RotaError::NoProxiesAvailable {
                attempted: 2,
                last_error: Some(ErrorKind::ConnectionRefused)
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_attempts_failed_reports_last_error() {
        let pool = pool_with(&["a:1", "b:1", "c:1", "d:1"], PoolConfig::default());
        let orchestrator = FetchOrchestrator::new(pool.clone());
        let request = FlakyRequest::new(u32::MAX, ErrorKind::UpstreamOtherError);

        let err = orchestrator
            .fetch_with_proxy(&request, &options())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RotaError::AllAttemptsFailed {
                attempts: 3,
                distinct_proxies: 3,
                last_error: ErrorKind::UpstreamOtherError
            }
        ));
        assert!(err.is_upstream_blocking());
        assert_eq!(pool.status().total_failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_failure() {
        let pool = pool_with(&["a:1", "b:1", "c:1"], PoolConfig::default());
        let orchestrator = FetchOrchestrator::new(pool.clone());

        let err = orchestrator
            .fetch_with_proxy(&HangingRequest, &options().with_max_attempts(2))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RotaError::AllAttemptsFailed {
                attempts: 2,
                last_error: ErrorKind::Timeout,
                ..
            }
        ));
        assert_eq!(
            pool.get("a:1").unwrap().last_error,
            Some(ErrorKind::Timeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_without_recording() {
        let pool = pool_with(&["a:1", "b:1"], PoolConfig::default());
        let orchestrator = FetchOrchestrator::new(pool.clone());
        let opts = options().with_deadline(Instant::now() + Duration::from_secs(2));

        let err = orchestrator
            .fetch_with_proxy(&HangingRequest, &opts)
            .await
            .unwrap_err();

        assert!(matches!(err, RotaError::Cancelled { attempts: 1 }));
        let status = pool.status();
        assert_eq!(status.total_uses, 0);
        assert_eq!(status.total_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_cancels_before_selecting() {
        let pool = pool_with(&["a:1"], PoolConfig::default());
        let orchestrator = FetchOrchestrator::new(pool.clone());
        let opts = options().with_deadline(Instant::now());

        let request = FlakyRequest::new(0, ErrorKind::Timeout);
        let err = orchestrator.fetch_with_proxy(&request, &opts).await.unwrap_err();

        assert!(matches!(err, RotaError::Cancelled { attempts: 0 }));
        assert!(pool.get("a:1").unwrap().last_used_at.is_none());
    }
}
