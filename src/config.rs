use crate::error::{Result, RotaError};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxy pool tuning
    pub pool: PoolConfig,
    /// Where the proxy universe comes from
    pub provider: ProviderConfig,
    /// Target used by connect-style health probes
    pub probe_target: ProbeTargetConfig,
    /// Logging configuration
    pub log: LogConfig,
}

/// Tuning knobs for selection, blacklisting, retries and probing
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Consecutive failures before a proxy is blacklisted
    pub failure_threshold: u32,
    /// Cooldown applied when the threshold is first crossed
    pub cooldown_base: Duration,
    /// Upper bound for the growing cooldown
    pub cooldown_cap: Duration,
    /// Maximum distinct proxies tried per fetch
    pub max_attempts: u32,
    /// Default number of proxies per probe round
    pub sample_size: usize,
    /// Default number of concurrent probe workers
    pub worker_count: usize,
    /// Timeout for each probe
    pub probe_timeout: Duration,
    /// Timeout for each proxied fetch attempt
    pub request_timeout: Duration,
    /// How often expired blacklist stamps are cleared
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_base: Duration::from_secs(300),
            cooldown_cap: Duration::from_secs(1800),
            max_attempts: 3,
            sample_size: 10,
            worker_count: 5,
            probe_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    /// Reject settings the pool cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(RotaError::InvalidConfig(
                "failure_threshold must be at least 1".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(RotaError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.sample_size == 0 {
            return Err(RotaError::InvalidConfig(
                "sample_size must be at least 1".into(),
            ));
        }
        if self.worker_count == 0 {
            return Err(RotaError::InvalidConfig(
                "worker_count must be at least 1".into(),
            ));
        }
        if self.cooldown_base.is_zero() {
            return Err(RotaError::InvalidConfig(
                "cooldown_base must be greater than zero".into(),
            ));
        }
        if self.cooldown_cap < self.cooldown_base {
            return Err(RotaError::InvalidConfig(
                "cooldown_cap must not be lower than cooldown_base".into(),
            ));
        }
        if self.probe_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(RotaError::InvalidConfig(
                "timeouts must be greater than zero".into(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(RotaError::InvalidConfig(
                "sweep_interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Route caption requests through the pool at all
    pub use_proxy: bool,
    /// Token for the Webshare listing API; takes precedence over the static list
    pub webshare_api_token: Option<String>,
    /// Comma separated `host:port` list
    pub proxy_list: Vec<String>,
    /// Shared username for the static list
    pub username: Option<String>,
    /// Shared password for the static list
    pub password: Option<String>,
    /// How often the provider list is re-fetched
    pub refresh_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTargetConfig {
    pub url: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
    /// How often `run` logs a pool status summary
    pub status_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let pool = PoolConfig {
            failure_threshold: parse_env("POOL_FAILURE_THRESHOLD", "3")?,
            cooldown_base: Duration::from_secs(parse_env("POOL_COOLDOWN_BASE_SECS", "300")?),
            cooldown_cap: Duration::from_secs(parse_env("POOL_COOLDOWN_CAP_SECS", "1800")?),
            max_attempts: parse_env("POOL_MAX_ATTEMPTS", "3")?,
            sample_size: parse_env("PROBE_SAMPLE_SIZE", "10")?,
            worker_count: parse_env("PROBE_WORKERS", "5")?,
            probe_timeout: Duration::from_secs(parse_env("PROBE_TIMEOUT_SECS", "15")?),
            request_timeout: Duration::from_secs(parse_env("POOL_REQUEST_TIMEOUT_SECS", "30")?),
            sweep_interval: Duration::from_secs(parse_env("POOL_SWEEP_INTERVAL_SECS", "60")?),
        };
        pool.validate()?;

        let status_interval: u64 = parse_env("LOG_STATUS_INTERVAL_SECS", "300")?;
        if status_interval == 0 {
            return Err(RotaError::InvalidConfig(
                "LOG_STATUS_INTERVAL_SECS must be greater than zero".into(),
            ));
        }

        Ok(Config {
            pool,
            provider: ProviderConfig {
                use_proxy: parse_bool_env("USE_PROXY", false)?,
                webshare_api_token: get_env_opt("WEBSHARE_API_TOKEN"),
                proxy_list: get_env_or("WEBSHARE_PROXY_LIST", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                username: get_env_opt("WEBSHARE_PROXY_USERNAME"),
                password: get_env_opt("WEBSHARE_PROXY_PASSWORD"),
                refresh_interval: Duration::from_secs(parse_env(
                    "PROXY_REFRESH_INTERVAL_SECS",
                    "3600",
                )?),
            },
            probe_target: parse_probe_target(&get_env_or(
                "PROBE_TARGET_URL",
                "https://www.google.com/robots.txt",
            ))?,
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
                status_interval: Duration::from_secs(status_interval),
            },
        })
    }
}

fn parse_probe_target(raw: &str) -> Result<ProbeTargetConfig> {
    let url = Url::parse(raw.trim()).map_err(|e| {
        RotaError::InvalidConfig(format!("PROBE_TARGET_URL must be a valid URL: {}", e))
    })?;

    let host = url
        .host_str()
        .ok_or_else(|| RotaError::InvalidConfig("PROBE_TARGET_URL must include a host".into()))?;
    let port = url.port_or_known_default().ok_or_else(|| {
        RotaError::InvalidConfig("PROBE_TARGET_URL must include a port or known scheme".into())
    })?;

    Ok(ProbeTargetConfig {
        url: url.to_string(),
        host: host.to_string(),
        port,
    })
}

/// Parse an environment variable, naming it in the error
fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| RotaError::InvalidConfig(format!("{} must be a valid number", key)))
}

/// Parse a boolean environment variable, accepting `true/false`, `True/False` and `1/0`
fn parse_bool_env(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            _ => Err(RotaError::InvalidConfig(format!("{} must be true or false", key))),
        },
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get a non-empty environment variable
fn get_env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
