use std::collections::BTreeMap;

use serde::Serialize;

use super::ErrorKind;

/// Result of probing a single proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthProbeResult {
    pub address: String,
    pub success: bool,
    pub latency_millis: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl HealthProbeResult {
    pub fn healthy(address: impl Into<String>, latency_millis: u64) -> Self {
        Self {
            address: address.into(),
            success: true,
            latency_millis,
            error_kind: None,
        }
    }

    pub fn failed(address: impl Into<String>, latency_millis: u64, kind: ErrorKind) -> Self {
        Self {
            address: address.into(),
            success: false,
            latency_millis,
            error_kind: Some(kind),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error_kind == Some(ErrorKind::Cancelled)
    }
}

/// Overall health classification of a probe round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthVerdict {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthVerdict {
    pub fn from_success_rate(rate: f64) -> Self {
        if rate >= 80.0 {
            HealthVerdict::Healthy
        } else if rate >= 50.0 {
            HealthVerdict::Degraded
        } else {
            HealthVerdict::Unhealthy
        }
    }
}

/// Number of failing addresses listed in a report summary
const FAILED_PROXIES_LISTED: usize = 5;

/// Summary of one probe round
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub tested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Percentage of completed (non-cancelled) probes that succeeded
    pub success_rate: f64,
    pub avg_latency_millis: Option<u64>,
    pub min_latency_millis: Option<u64>,
    pub max_latency_millis: Option<u64>,
    pub errors: BTreeMap<ErrorKind, usize>,
    pub failed_proxies: Vec<String>,
    pub elapsed_millis: u64,
    pub verdict: HealthVerdict,
    pub results: Vec<HealthProbeResult>,
}

impl ProbeReport {
    pub fn from_results(results: Vec<HealthProbeResult>, elapsed_millis: u64) -> Self {
        let cancelled = results.iter().filter(|r| r.is_cancelled()).count();
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded - cancelled;
        let completed = succeeded + failed;

        let success_rate = if completed == 0 {
            0.0
        } else {
            succeeded as f64 / completed as f64 * 100.0
        };

        let latencies: Vec<u64> = results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.latency_millis)
            .collect();
        let avg_latency_millis = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<u64>() / latencies.len() as u64)
        };

        let mut errors = BTreeMap::new();
        for kind in results.iter().filter_map(|r| r.error_kind) {
            *errors.entry(kind).or_insert(0) += 1;
        }

        let failed_proxies = results
            .iter()
            .filter(|r| !r.success && !r.is_cancelled())
            .take(FAILED_PROXIES_LISTED)
            .map(|r| r.address.clone())
            .collect();

        Self {
            tested: results.len(),
            succeeded,
            failed,
            cancelled,
            success_rate,
            avg_latency_millis,
            min_latency_millis: latencies.iter().min().copied(),
            max_latency_millis: latencies.iter().max().copied(),
            errors,
            failed_proxies,
            elapsed_millis,
            verdict: HealthVerdict::from_success_rate(success_rate),
            results,
        }
    }
}
