use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use super::ErrorKind;
use crate::error::{Result, RotaError};

/// Username/password pair for an authenticated proxy
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Username with everything past the first few characters hidden
    pub fn masked_username(&self) -> String {
        let visible: String = self.username.chars().take(5).collect();
        format!("{}***", visible)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.masked_username())
            .field("password", &"***")
            .finish()
    }
}

/// Immutable identity of a proxy: where it lives and how to authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    /// Pool key, unique within a pool. Plain `host:port` unless the
    /// provider tags it to tell apart entries sharing one gateway.
    pub address: String,
    /// `host:port` the proxy is reached at
    pub connect_addr: String,
    pub credentials: Option<Credentials>,
}

impl ProxyEndpoint {
    pub fn new(address: impl Into<String>, credentials: Option<Credentials>) -> Self {
        let address = address.into();
        Self {
            connect_addr: address.clone(),
            address,
            credentials,
        }
    }

    /// Endpoint reached at `connect_addr` but keyed as `connect_addr#tag`
    pub fn tagged(
        connect_addr: impl Into<String>,
        tag: &str,
        credentials: Option<Credentials>,
    ) -> Self {
        let connect_addr = connect_addr.into();
        Self {
            address: format!("{}#{}", connect_addr, tag),
            connect_addr,
            credentials,
        }
    }

    /// Parse and validate a `host:port` address
    pub fn parse(address: &str, credentials: Option<Credentials>) -> Result<Self> {
        let (host, port) = parse_host_port(address.trim())?;
        Ok(Self::new(format_tcp_addr(&host, port), credentials))
    }

    /// Host and port of this endpoint
    pub fn host_port(&self) -> Result<(String, u16)> {
        parse_host_port(&self.connect_addr)
    }

    /// Proxy URL without credentials; clients attach those separately so
    /// reserved characters in passwords survive
    pub fn url(&self) -> String {
        format!("http://{}", self.connect_addr)
    }
}

impl std::fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// A proxy together with its mutable health state.
///
/// Records live inside the pool's store; values handed out by the store
/// are snapshots and never written back.
#[derive(Debug, Clone)]
pub struct ProxyRecord {
    pub endpoint: ProxyEndpoint,
    pub last_used_at: Option<Instant>,
    pub consecutive_failures: u32,
    pub blacklisted_until: Option<Instant>,
    pub total_uses: u64,
    pub total_failures: u64,
    /// Number of times this proxy has entered the blacklist
    pub blacklist_count: u32,
    pub last_error: Option<ErrorKind>,
    pub total_latency_millis: u64,
}

impl ProxyRecord {
    pub fn new(endpoint: ProxyEndpoint) -> Self {
        Self {
            endpoint,
            last_used_at: None,
            consecutive_failures: 0,
            blacklisted_until: None,
            total_uses: 0,
            total_failures: 0,
            blacklist_count: 0,
            last_error: None,
            total_latency_millis: 0,
        }
    }

    pub fn address(&self) -> &str {
        &self.endpoint.address
    }

    /// Eligible iff no blacklist stamp is set or the stamp has passed
    pub fn is_eligible(&self, now: Instant) -> bool {
        match self.blacklisted_until {
            Some(until) => until <= now,
            None => true,
        }
    }

    pub fn is_blacklisted(&self, now: Instant) -> bool {
        !self.is_eligible(now)
    }

    pub fn successful_uses(&self) -> u64 {
        self.total_uses.saturating_sub(self.total_failures)
    }

    /// Success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_uses == 0 {
            0.0
        } else {
            (self.successful_uses() as f64 / self.total_uses as f64) * 100.0
        }
    }

    /// Mean latency of successful uses
    pub fn avg_latency_millis(&self) -> u64 {
        match self.successful_uses() {
            0 => 0,
            n => self.total_latency_millis / n,
        }
    }

    pub fn snapshot(&self, now: Instant) -> ProxySnapshot {
        ProxySnapshot {
            address: self.endpoint.address.clone(),
            eligible: self.is_eligible(now),
            consecutive_failures: self.consecutive_failures,
            total_uses: self.total_uses,
            total_failures: self.total_failures,
            blacklist_count: self.blacklist_count,
            success_rate: self.success_rate(),
            avg_latency_millis: self.avg_latency_millis(),
            last_error: self.last_error,
            cooldown_remaining_secs: self
                .blacklisted_until
                .filter(|until| *until > now)
                .map(|until| until.duration_since(now).as_secs()),
            last_used_secs_ago: self
                .last_used_at
                .map(|at| now.saturating_duration_since(at).as_secs()),
        }
    }
}

/// Serializable view of one proxy for reporting layers
#[derive(Debug, Clone, Serialize)]
pub struct ProxySnapshot {
    pub address: String,
    pub eligible: bool,
    pub consecutive_failures: u32,
    pub total_uses: u64,
    pub total_failures: u64,
    pub blacklist_count: u32,
    pub success_rate: f64,
    pub avg_latency_millis: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_secs_ago: Option<u64>,
}

/// Aggregate pool state
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub total: usize,
    pub eligible: usize,
    pub blacklisted: usize,
    pub total_uses: u64,
    pub total_failures: u64,
    pub last_refresh: Option<DateTime<Utc>>,
    pub proxies: Vec<ProxySnapshot>,
}

pub(crate) fn parse_host_port(addr: &str) -> Result<(String, u16)> {
    // Use URL parsing to properly handle bracketed IPv6 like "[::1]:8080".
    let url = url::Url::parse(&format!("http://{}", addr)).map_err(|e| {
        RotaError::InvalidProxyAddress(format!("Invalid address '{}': {}", addr, e))
    })?;

    let host = url.host_str().ok_or_else(|| {
        RotaError::InvalidProxyAddress(format!("Invalid address '{}': missing host", addr))
    })?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    let port = url.port().ok_or_else(|| {
        RotaError::InvalidProxyAddress(format!("Invalid address '{}': missing port", addr))
    })?;

    Ok((host.to_string(), port))
}

pub(crate) fn format_tcp_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
