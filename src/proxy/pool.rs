use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::info;

use super::blacklist::{BlacklistController, CooldownPolicy, OutcomeEffect};
use super::selector::LruSelector;
use super::store::{EligibleIter, ProxyStore};
use crate::config::PoolConfig;
use crate::error::Result;
use crate::models::{Outcome, PoolStatus, ProxyEndpoint, ProxyRecord};

/// Shared proxy pool handle.
///
/// Owns the record store and wires the selector and blacklist controller
/// to it. Pass it around as `Arc<ProxyPool>`; each pool is independent, so
/// tests can build as many as they like.
pub struct ProxyPool {
    config: PoolConfig,
    store: Arc<ProxyStore>,
    selector: LruSelector,
    controller: BlacklistController,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
}

impl ProxyPool {
    /// Create an empty pool; fails on invalid configuration
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(ProxyStore::new());
        Ok(Self {
            selector: LruSelector::new(store.clone()),
            controller: BlacklistController::new(store.clone(), CooldownPolicy::from_config(&config)),
            store,
            config,
            last_refresh: RwLock::new(None),
        })
    }

    /// Create a pool pre-populated with `endpoints`
    pub fn with_endpoints(
        config: PoolConfig,
        endpoints: impl IntoIterator<Item = ProxyEndpoint>,
    ) -> Result<Self> {
        let pool = Self::new(config)?;
        pool.load(endpoints);
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn store(&self) -> &ProxyStore {
        &self.store
    }

    pub fn cooldown_policy(&self) -> &CooldownPolicy {
        self.controller.policy()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Merge a freshly fetched proxy list; known addresses keep their state.
    ///
    /// Returns the number of new proxies.
    pub fn load(&self, endpoints: impl IntoIterator<Item = ProxyEndpoint>) -> usize {
        let inserted = self.store.insert_endpoints(endpoints);
        *self.last_refresh.write() = Some(Utc::now());
        info!(
            "Proxy list refreshed. New: {}, total: {}",
            inserted,
            self.store.len()
        );
        inserted
    }

    pub fn get(&self, address: &str) -> Result<ProxyRecord> {
        self.store.get(address)
    }

    pub fn upsert(&self, record: ProxyRecord) -> bool {
        self.store.upsert(record)
    }

    pub fn all_eligible(&self) -> EligibleIter<'_> {
        self.store.all_eligible()
    }

    pub fn select_next(&self, excluding: &HashSet<String>) -> Result<ProxyRecord> {
        self.selector.select_next(excluding)
    }

    pub fn report_outcome(&self, address: &str, outcome: Outcome) -> Result<OutcomeEffect> {
        self.controller.report_outcome(address, outcome)
    }

    pub fn sweep_expired(&self) -> usize {
        self.controller.sweep_expired()
    }

    /// Observability snapshot of the whole pool
    pub fn status(&self) -> PoolStatus {
        let now = Instant::now();
        let proxies = self.store.snapshots(now);
        let blacklisted = proxies.iter().filter(|p| !p.eligible).count();

        PoolStatus {
            total: proxies.len(),
            eligible: proxies.len() - blacklisted,
            blacklisted,
            total_uses: proxies.iter().map(|p| p.total_uses).sum(),
            total_failures: proxies.iter().map(|p| p.total_failures).sum(),
            last_refresh: *self.last_refresh.read(),
            proxies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RotaError;
    use crate::models::ErrorKind;
    use std::time::Duration;

    fn endpoints(addresses: &[&str]) -> Vec<ProxyEndpoint> {
        addresses
            .iter()
            .map(|a| ProxyEndpoint::new(*a, None))
            .collect()
    }

    #[test]
    fn test_pool_rejects_invalid_config() {
        let config = PoolConfig {
            max_attempts: 0,
            ..PoolConfig::default()
        };
        assert!(matches!(
            ProxyPool::new(config),
            Err(RotaError::InvalidConfig(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_load_merges() {
        let pool = ProxyPool::with_endpoints(PoolConfig::default(), endpoints(&["a:1", "b:1"])).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(pool.status().last_refresh.is_some());

        assert_eq!(pool.load(endpoints(&["b:1", "c:1"])), 1);
        assert_eq!(pool.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_status_counts() {
        let config = PoolConfig {
            failure_threshold: 1,
            cooldown_base: Duration::from_secs(60),
            cooldown_cap: Duration::from_secs(60),
            ..PoolConfig::default()
        };
        let pool = ProxyPool::with_endpoints(config, endpoints(&["a:1", "b:1", "c:1"])).unwrap();

        pool.report_outcome("a:1", Outcome::Failure(ErrorKind::Timeout))
            .unwrap();
        pool.report_outcome("b:1", Outcome::success(50)).unwrap();

        let status = pool.status();
        assert_eq!(status.total, 3);
        assert_eq!(status.blacklisted, 1);
        assert_eq!(status.eligible, 2);
        assert_eq!(status.total_uses, 2);
        assert_eq!(status.total_failures, 1);
        assert_eq!(status.proxies[0].address, "a:1");
        assert_eq!(status.proxies[0].cooldown_remaining_secs, Some(60));
        assert_eq!(status.proxies[0].last_error, Some(ErrorKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_reflects_reported_outcomes() {
        let config = PoolConfig {
            failure_threshold: 1,
            ..PoolConfig::default()
        };
        let pool = ProxyPool::with_endpoints(config, endpoints(&["a:1", "b:1"])).unwrap();

        let first = pool.select_next(&HashSet::new()).unwrap();
        assert_eq!(first.address(), "a:1");
        pool.report_outcome("a:1", Outcome::Failure(ErrorKind::UpstreamRateLimited))
            .unwrap();

        for _ in 0..3 {
            assert_eq!(pool.select_next(&HashSet::new()).unwrap().address(), "b:1");
        }
    }
}
