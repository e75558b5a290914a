//! Proxy pool implementation
//!
//! This module provides the pool core:
//! - record store with an LRU index
//! - least-recently-used selection
//! - blacklisting with exponential cooldown and passive recovery
//! - bounded-concurrency health probing
//! - fetch orchestration with retry across distinct proxies

pub mod blacklist;
pub mod handler;
pub mod health;
pub mod pool;
pub mod provider;
pub mod selector;
pub mod store;
pub mod transport;

pub use blacklist::{BlacklistController, CooldownPolicy, OutcomeEffect};
pub use handler::{FetchOptions, FetchOrchestrator, FetchResult, ProxiedRequest};
pub use health::{HealthProber, ProbeCheck};
pub use pool::ProxyPool;
pub use provider::{EnvProxyProvider, ProxyProvider, WebshareProvider};
pub use selector::LruSelector;
pub use store::{EligibleIter, ProxyStore};
pub use transport::ConnectCheck;
