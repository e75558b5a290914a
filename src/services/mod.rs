//! Background services

pub mod blacklist_sweep;
pub mod proxy_refresh;
pub mod status_report;

pub use blacklist_sweep::{BlacklistSweepHandle, BlacklistSweepService};
pub use proxy_refresh::{ProxyRefreshHandle, ProxyRefreshService};
pub use status_report::{StatusReportHandle, StatusReportService};
