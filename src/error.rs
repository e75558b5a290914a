use thiserror::Error;

use crate::models::ErrorKind;

/// Unified error type for the caption proxy pool
#[derive(Error, Debug)]
pub enum RotaError {
    // Pool errors
    #[error("No proxies available ({attempted} distinct proxies attempted)")]
    NoProxiesAvailable {
        attempted: usize,
        last_error: Option<ErrorKind>,
    },

    #[error("All {attempts} attempts failed across {distinct_proxies} proxies, last error: {last_error}")]
    AllAttemptsFailed {
        attempts: u32,
        distinct_proxies: usize,
        last_error: ErrorKind,
    },

    #[error("Request cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    #[error("Proxy not found: {address}")]
    ProxyNotFound { address: String },

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    // Upstream errors
    #[error("Upstream request failed: {0}")]
    Upstream(ErrorKind),

    #[error("Proxy provider error: {0}")]
    Provider(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, RotaError>;

impl RotaError {
    /// Map this error onto the failure taxonomy, if it belongs to it
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            RotaError::NoProxiesAvailable { .. } => Some(ErrorKind::ProxyPoolExhausted),
            RotaError::Cancelled { .. } => Some(ErrorKind::Cancelled),
            RotaError::AllAttemptsFailed { last_error, .. } => Some(*last_error),
            RotaError::Upstream(kind) => Some(*kind),
            _ => None,
        }
    }

    /// The pool ran dry; needs operator action rather than a retry
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, RotaError::NoProxiesAvailable { .. })
    }

    /// Distinct proxies kept failing; points at upstream-side blocking
    pub fn is_upstream_blocking(&self) -> bool {
        matches!(self, RotaError::AllAttemptsFailed { .. })
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for RotaError {
    fn from(err: url::ParseError) -> Self {
        RotaError::InvalidProxyAddress(err.to_string())
    }
}
