//! Status report service
//!
//! Logs a one-line summary of the pool on a fixed interval so a long-running
//! process shows how its proxies are holding up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, instrument, warn};

use crate::models::PoolStatus;
use crate::proxy::ProxyPool;

pub struct StatusReportService {
    pool: Arc<ProxyPool>,
    report_interval: Duration,
}

impl StatusReportService {
    pub fn new(pool: Arc<ProxyPool>, report_interval: Duration) -> Self {
        Self {
            pool,
            report_interval,
        }
    }

    /// Log the current pool status and return it
    pub fn report(&self) -> PoolStatus {
        let status = self.pool.status();
        if status.total > 0 && status.eligible == 0 {
            warn!(
                "Pool status: all {} proxies blacklisted ({} uses, {} failures)",
                status.total, status.total_uses, status.total_failures
            );
        } else {
            info!(
                total = status.total,
                eligible = status.eligible,
                blacklisted = status.blacklisted,
                uses = status.total_uses,
                failures = status.total_failures,
                "Pool status"
            );
        }
        status
    }

    /// Run the report loop until `shutdown` flips to `true`
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting status report service (interval: {}s)",
            self.report_interval.as_secs()
        );

        let mut ticker = interval(self.report_interval);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.report();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Status report service shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Handle for stopping the status report service
pub struct StatusReportHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl StatusReportHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
