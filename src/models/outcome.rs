use serde::{Deserialize, Serialize};

/// Failure classification for a single proxied attempt or probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ConnectionRefused,
    UpstreamRateLimited,
    UpstreamOtherError,
    ProxyPoolExhausted,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::UpstreamRateLimited => "upstream_rate_limited",
            ErrorKind::UpstreamOtherError => "upstream_other_error",
            ErrorKind::ProxyPoolExhausted => "proxy_pool_exhausted",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "timeout" => Some(ErrorKind::Timeout),
            "connection_refused" => Some(ErrorKind::ConnectionRefused),
            "upstream_rate_limited" | "rate_limited" => Some(ErrorKind::UpstreamRateLimited),
            "upstream_other_error" => Some(ErrorKind::UpstreamOtherError),
            "proxy_pool_exhausted" => Some(ErrorKind::ProxyPoolExhausted),
            "cancelled" => Some(ErrorKind::Cancelled),
            _ => None,
        }
    }

    /// Whether this kind describes the health of one proxy and therefore
    /// belongs in its failure counters.
    pub fn counts_against_proxy(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::ConnectionRefused
                | ErrorKind::UpstreamRateLimited
                | ErrorKind::UpstreamOtherError
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one use of a proxy, as reported to the blacklist controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success { latency_millis: u64 },
    Failure(ErrorKind),
}

impl Outcome {
    pub fn success(latency_millis: u64) -> Self {
        Outcome::Success { latency_millis }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure(kind) => Some(*kind),
        }
    }
}
