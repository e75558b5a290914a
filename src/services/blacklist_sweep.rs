//! Blacklist sweep service
//!
//! Periodically clears `blacklisted_until` stamps that have already expired.
//! Eligibility never depends on this sweep; it only keeps the records tidy
//! for status reporting.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, instrument};

use crate::proxy::ProxyPool;

/// Blacklist sweep service
pub struct BlacklistSweepService {
    pool: Arc<ProxyPool>,
    check_interval: Duration,
}

impl BlacklistSweepService {
    pub fn new(pool: Arc<ProxyPool>) -> Self {
        let check_interval = pool.config().sweep_interval;
        Self {
            pool,
            check_interval,
        }
    }

    pub fn with_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// Run the sweep loop until `shutdown` flips to `true`
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting blacklist sweep service (interval: {}s)",
            self.check_interval.as_secs()
        );

        let mut ticker = interval(self.check_interval);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cleared = self.pool.sweep_expired();
                    debug!(cleared, "Blacklist sweep complete");
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Blacklist sweep service shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Handle for stopping the blacklist sweep service
pub struct BlacklistSweepHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl BlacklistSweepHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
