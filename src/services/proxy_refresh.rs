//! Proxy list refresh service
//!
//! Periodically re-fetches the provider list and merges it into the pool.
//! Known proxies keep their counters and cooldowns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::proxy::{ProxyPool, ProxyProvider};

/// Proxy refresh service
pub struct ProxyRefreshService {
    pool: Arc<ProxyPool>,
    provider: Arc<dyn ProxyProvider>,
    refresh_interval: Duration,
}

impl ProxyRefreshService {
    pub fn new(
        pool: Arc<ProxyPool>,
        provider: Arc<dyn ProxyProvider>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            pool,
            provider,
            refresh_interval,
        }
    }

    /// Fetch once and merge; returns the number of new proxies
    pub async fn refresh(&self) -> Result<usize> {
        info!("Refreshing proxy list from {} provider", self.provider.name());
        let endpoints = self.provider.fetch().await?;
        if endpoints.is_empty() {
            warn!("No proxies available from provider");
            return Ok(0);
        }
        Ok(self.pool.load(endpoints))
    }

    /// Run the refresh loop until `shutdown` flips to `true`
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting proxy refresh service (interval: {}s)",
            self.refresh_interval.as_secs()
        );

        let mut ticker = interval(self.refresh_interval);
        ticker.tick().await; // The caller loads the initial list

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        error!("Proxy list refresh failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Proxy refresh service shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Handle for stopping the proxy refresh service
pub struct ProxyRefreshHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl ProxyRefreshHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
