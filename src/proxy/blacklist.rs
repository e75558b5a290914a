//! Blacklist / recovery controller
//!
//! Turns reported outcomes into counter updates and temporary exclusions.
//! Recovery is passive: a record is eligible again as soon as its
//! `blacklisted_until` stamp lies in the past.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::store::ProxyStore;
use crate::config::PoolConfig;
use crate::error::Result;
use crate::models::{Outcome, ProxyRecord};

/// Exponential cooldown with a cap.
///
/// Crossing the threshold yields `base`; every further consecutive failure
/// doubles it until `cap` is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub failure_threshold: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl CooldownPolicy {
    pub fn new(failure_threshold: u32, base: Duration, cap: Duration) -> Self {
        Self {
            failure_threshold,
            base,
            cap,
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(
            config.failure_threshold,
            config.cooldown_base,
            config.cooldown_cap,
        )
    }

    /// Cooldown owed after `consecutive_failures`, or `None` below the threshold
    pub fn cooldown_for(&self, consecutive_failures: u32) -> Option<Duration> {
        if consecutive_failures < self.failure_threshold {
            return None;
        }

        let exponent = consecutive_failures - self.failure_threshold;
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        let cooldown = self.base.checked_mul(factor).unwrap_or(self.cap);
        Some(cooldown.min(self.cap))
    }

    /// Apply one outcome to a record
    pub fn apply(&self, record: &mut ProxyRecord, outcome: Outcome, now: Instant) -> OutcomeEffect {
        match outcome {
            Outcome::Success { latency_millis } => {
                let was_failing =
                    record.consecutive_failures > 0 || record.blacklisted_until.is_some();

                record.total_uses += 1;
                record.total_latency_millis =
                    record.total_latency_millis.saturating_add(latency_millis);
                record.consecutive_failures = 0;
                record.blacklisted_until = None;

                if was_failing {
                    OutcomeEffect::Recovered
                } else {
                    OutcomeEffect::Healthy
                }
            }
            Outcome::Failure(kind) if !kind.counts_against_proxy() => OutcomeEffect::Ignored,
            Outcome::Failure(kind) => {
                record.total_uses += 1;
                record.total_failures += 1;
                record.consecutive_failures = record.consecutive_failures.saturating_add(1);
                record.last_error = Some(kind);

                match self.cooldown_for(record.consecutive_failures) {
                    Some(cooldown) => {
                        let until = now + cooldown;
                        // Never shorten an exclusion that is already running.
                        record.blacklisted_until = Some(match record.blacklisted_until {
                            Some(existing) if existing > until => existing,
                            _ => until,
                        });
                        record.blacklist_count += 1;
                        OutcomeEffect::Blacklisted {
                            consecutive_failures: record.consecutive_failures,
                            cooldown,
                        }
                    }
                    None => OutcomeEffect::FailureRecorded {
                        consecutive_failures: record.consecutive_failures,
                    },
                }
            }
        }
    }
}

/// What a reported outcome did to the record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeEffect {
    /// Success on a proxy that was not failing
    Healthy,
    /// Success that reset a failure streak or cleared a blacklist
    Recovered,
    /// Failure below the threshold
    FailureRecorded { consecutive_failures: u32 },
    /// Failure that put (or kept) the proxy on the blacklist
    Blacklisted {
        consecutive_failures: u32,
        cooldown: Duration,
    },
    /// Outcome kind that says nothing about the proxy, such as a cancellation
    Ignored,
}

/// Applies outcomes to the shared store
pub struct BlacklistController {
    store: Arc<ProxyStore>,
    policy: CooldownPolicy,
}

impl BlacklistController {
    pub fn new(store: Arc<ProxyStore>, policy: CooldownPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &CooldownPolicy {
        &self.policy
    }

    /// Record the outcome of one use of `address`
    pub fn report_outcome(&self, address: &str, outcome: Outcome) -> Result<OutcomeEffect> {
        let now = Instant::now();
        let policy = self.policy;
        let effect = self
            .store
            .update(address, |record| policy.apply(record, outcome, now))?;

        match effect {
            OutcomeEffect::Healthy | OutcomeEffect::Ignored => {}
            OutcomeEffect::Recovered => info!("Proxy {} recovered", address),
            OutcomeEffect::FailureRecorded {
                consecutive_failures,
            } => debug!(
                "Proxy {} failed ({:?}), consecutive failures: {}",
                address,
                outcome.error_kind(),
                consecutive_failures
            ),
            OutcomeEffect::Blacklisted {
                consecutive_failures,
                cooldown,
            } => warn!(
                "Proxy {} blacklisted for {}s after {} consecutive failures ({:?})",
                address,
                cooldown.as_secs(),
                consecutive_failures,
                outcome.error_kind()
            ),
        }

        Ok(effect)
    }

    /// Clear blacklist stamps that have expired
    pub fn sweep_expired(&self) -> usize {
        let cleared = self.store.clear_expired(Instant::now());
        if cleared > 0 {
            debug!("Cleared {} expired blacklist entries", cleared);
        }
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorKind, ProxyEndpoint};

    fn policy() -> CooldownPolicy {
        CooldownPolicy::new(3, Duration::from_secs(10), Duration::from_secs(100))
    }

    fn controller(addresses: &[&str]) -> (Arc<ProxyStore>, BlacklistController) {
        let store = Arc::new(ProxyStore::new());
        store.insert_endpoints(addresses.iter().map(|a| ProxyEndpoint::new(*a, None)));
        (store.clone(), BlacklistController::new(store, policy()))
    }

    fn fail() -> Outcome {
        Outcome::Failure(ErrorKind::ConnectionRefused)
    }

    #[test]
    fn test_cooldown_grows_and_caps() {
        let p = policy();
        assert_eq!(p.cooldown_for(0), None);
        assert_eq!(p.cooldown_for(2), None);
        assert_eq!(p.cooldown_for(3), Some(Duration::from_secs(10)));
        assert_eq!(p.cooldown_for(4), Some(Duration::from_secs(20)));
        assert_eq!(p.cooldown_for(5), Some(Duration::from_secs(40)));
        assert_eq!(p.cooldown_for(7), Some(Duration::from_secs(100)));
        assert_eq!(p.cooldown_for(u32::MAX), Some(Duration::from_secs(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blacklisted_once_threshold_is_crossed() {
        let (store, ctl) = controller(&["a:1", "b:1"]);

        assert_eq!(
            ctl.report_outcome("a:1", fail()).unwrap(),
            OutcomeEffect::FailureRecorded {
                consecutive_failures: 1
            }
        );
        ctl.report_outcome("a:1", fail()).unwrap();
        assert!(store.get("a:1").unwrap().blacklisted_until.is_none());

        let effect = ctl.report_outcome("a:1", fail()).unwrap();
        assert_eq!(
            effect,
            OutcomeEffect::Blacklisted {
                consecutive_failures: 3,
                cooldown: Duration::from_secs(10)
            }
        );

        let eligible: Vec<String> = store
            .all_eligible()
            .map(|r| r.address().to_string())
            .collect();
        assert_eq!(eligible, vec!["b:1"]);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(store.all_eligible().count(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.all_eligible().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_streak_and_clears_blacklist() {
        let (store, ctl) = controller(&["a:1"]);
        for _ in 0..5 {
            ctl.report_outcome("a:1", fail()).unwrap();
        }
        assert!(store.get("a:1").unwrap().is_blacklisted(Instant::now()));

        let effect = ctl.report_outcome("a:1", Outcome::success(120)).unwrap();
        assert_eq!(effect, OutcomeEffect::Recovered);

        let rec = store.get("a:1").unwrap();
        assert_eq!(rec.consecutive_failures, 0);
        assert!(rec.blacklisted_until.is_none());
        assert_eq!(rec.total_uses, 6);
        assert_eq!(rec.total_failures, 5);
        assert_eq!(rec.avg_latency_millis(), 120);

        assert_eq!(
            ctl.report_outcome("a:1", Outcome::success(80)).unwrap(),
            OutcomeEffect::Healthy
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_is_non_decreasing_across_cycles() {
        let (store, ctl) = controller(&["a:1"]);

        let mut cooldowns = Vec::new();
        for _ in 0..3 {
            // Fail until blacklisted
            let cooldown = loop {
                if let OutcomeEffect::Blacklisted { cooldown, .. } =
                    ctl.report_outcome("a:1", fail()).unwrap()
                {
                    break cooldown;
                }
            };
            cooldowns.push(cooldown);

            // Passive recovery once the cooldown elapses
            tokio::time::advance(cooldown).await;
            assert!(store.get("a:1").unwrap().is_eligible(Instant::now()));
        }

        assert_eq!(
            cooldowns,
            vec![
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(40)
            ]
        );
        assert!(cooldowns.windows(2).all(|w| w[1] >= w[0]));

        // A success in between starts the streak over at the base cooldown
        ctl.report_outcome("a:1", Outcome::success(1)).unwrap();
        ctl.report_outcome("a:1", fail()).unwrap();
        ctl.report_outcome("a:1", fail()).unwrap();
        let last = ctl.report_outcome("a:1", fail()).unwrap();
        assert!(matches!(last, OutcomeEffect::Blacklisted { cooldown, .. } if cooldown >= cooldowns[0]));
        assert_eq!(store.get("a:1").unwrap().blacklist_count, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellations_do_not_touch_counters() {
        let (store, ctl) = controller(&["a:1"]);
        let effect = ctl
            .report_outcome("a:1", Outcome::Failure(ErrorKind::Cancelled))
            .unwrap();
        assert_eq!(effect, OutcomeEffect::Ignored);

        let rec = store.get("a:1").unwrap();
        assert_eq!(rec.total_uses, 0);
        assert_eq!(rec.total_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_unknown_address() {
        let (_store, ctl) = controller(&[]);
        assert!(ctl.report_outcome("missing:1", fail()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_clears_only_expired() {
        let (store, ctl) = controller(&["a:1"]);
        for _ in 0..3 {
            ctl.report_outcome("a:1", fail()).unwrap();
        }
        assert_eq!(ctl.sweep_expired(), 0);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(ctl.sweep_expired(), 1);
        let rec = store.get("a:1").unwrap();
        assert!(rec.blacklisted_until.is_none());
        // Streak survives the sweep; one more failure re-blacklists with a longer cooldown
        assert_eq!(rec.consecutive_failures, 3);
        assert!(matches!(
            ctl.report_outcome("a:1", fail()).unwrap(),
            OutcomeEffect::Blacklisted { cooldown, .. } if cooldown == Duration::from_secs(20)
        ));
    }
}
