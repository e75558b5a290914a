//! caption-rota - Caption proxy pool
//!
//! Fetches YouTube captions through a pool of rotating proxies that heals
//! itself.
//!
//! ## Features
//!
//! - Least-recently-used proxy selection with atomic select-and-stamp
//! - Temporary blacklisting with exponential, capped cooldowns
//! - Bounded-concurrency health probing with per-probe timeouts
//! - Retry across distinct proxies with a deadline
//! - Proxy lists from the Webshare API or the environment

pub mod captions;
pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod services;

pub use config::Config;
pub use error::{Result, RotaError};
