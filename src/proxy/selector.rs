//! Least-recently-used proxy selection

use std::collections::HashSet;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::debug;

use super::store::ProxyStore;
use crate::error::{Result, RotaError};
use crate::models::ProxyRecord;

/// Selects the eligible proxy that has waited longest since its last use.
///
/// The record is stamped at selection time, not after success, so
/// concurrent callers spread across the pool instead of converging on the
/// same idle proxy.
pub struct LruSelector {
    store: Arc<ProxyStore>,
}

impl LruSelector {
    pub fn new(store: Arc<ProxyStore>) -> Self {
        Self { store }
    }

    /// Select the next proxy, skipping every address in `excluding`.
    ///
    /// Fails fast with [`RotaError::NoProxiesAvailable`] when nothing is
    /// eligible.
    pub fn select_next(&self, excluding: &HashSet<String>) -> Result<ProxyRecord> {
        match self
            .store
            .take_least_recently_used(excluding, Instant::now())
        {
            Some(record) => {
                debug!("Selected proxy {}", record.address());
                Ok(record)
            }
            None => Err(RotaError::NoProxiesAvailable {
                attempted: excluding.len(),
                last_error: None,
            }),
        }
    }

    /// Number of records currently eligible
    pub fn available_count(&self) -> usize {
        self.store.eligible_count(Instant::now())
    }

    pub fn strategy_name(&self) -> &'static str {
        "least_recently_used"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyEndpoint;
    use std::time::Duration;

    fn selector_with(addresses: &[&str]) -> (Arc<ProxyStore>, LruSelector) {
        let store = Arc::new(ProxyStore::new());
        store.insert_endpoints(addresses.iter().map(|a| ProxyEndpoint::new(*a, None)));
        (store.clone(), LruSelector::new(store))
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_empty() {
        let (_store, selector) = selector_with(&[]);
        let result = selector.select_next(&HashSet::new());
        assert!(matches!(
            result,
            Err(RotaError::NoProxiesAvailable { attempted: 0, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_cycles_in_order() {
        let (_store, selector) = selector_with(&["127.0.0.1:8083", "127.0.0.1:8081", "127.0.0.1:8082"]);
        let none = HashSet::new();

        let mut picked = Vec::new();
        for _ in 0..6 {
            picked.push(selector.select_next(&none).unwrap().address().to_string());
            tokio::time::advance(Duration::from_millis(1)).await;
        }

        assert_eq!(
            picked,
            vec![
                "127.0.0.1:8081",
                "127.0.0.1:8082",
                "127.0.0.1:8083",
                "127.0.0.1:8081",
                "127.0.0.1:8082",
                "127.0.0.1:8083",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_never_returns_excluded_or_blacklisted() {
        let (store, selector) = selector_with(&["a:1", "b:1", "c:1"]);
        let until = Instant::now() + Duration::from_secs(60);
        store
            .update("b:1", |rec| rec.blacklisted_until = Some(until))
            .unwrap();

        let excluding: HashSet<String> = ["a:1".to_string()].into_iter().collect();
        for _ in 0..5 {
            let picked = selector.select_next(&excluding).unwrap();
            assert_eq!(picked.address(), "c:1");
        }

        let excluding: HashSet<String> = ["a:1".to_string(), "c:1".to_string()].into_iter().collect();
        let err = selector.select_next(&excluding).unwrap_err();
        assert!(matches!(err, RotaError::NoProxiesAvailable { attempted: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_available_count() {
        let (store, selector) = selector_with(&["a:1", "b:1"]);
        assert_eq!(selector.available_count(), 2);

        let until = Instant::now() + Duration::from_secs(5);
        store
            .update("a:1", |rec| rec.blacklisted_until = Some(until))
            .unwrap();
        assert_eq!(selector.available_count(), 1);
        assert_eq!(selector.strategy_name(), "least_recently_used");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_picks_are_distinct() {
        let addresses: Vec<String> = (0..32).map(|i| format!("10.0.0.{}:8080", i)).collect();
        let store = Arc::new(ProxyStore::new());
        store.insert_endpoints(addresses.iter().map(|a| ProxyEndpoint::new(a.clone(), None)));
        let selector = Arc::new(LruSelector::new(store));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let selector = selector.clone();
                tokio::spawn(async move {
                    selector
                        .select_next(&HashSet::new())
                        .map(|r| r.address().to_string())
                })
            })
            .collect();

        let mut picked = HashSet::new();
        for task in tasks {
            let address = task.await.unwrap().unwrap();
            assert!(picked.insert(address), "address selected twice");
        }
        assert_eq!(picked.len(), 32);
    }
}
