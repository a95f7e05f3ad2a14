//! Configuration for the blood bank service.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Expiry sweeper configuration
    pub sweeper: SweeperConfig,
    /// Inventory listing configuration
    pub paging: PagingConfig,
    /// Observability configuration
    pub observability: ObservabilityConfig,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// Expiry sweeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Run the periodic sweeper (default: true)
    pub enabled: bool,
    /// Seconds between sweeps (default: 3600)
    pub interval_secs: u64,
}

/// Page sizes for inventory listings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PagingConfig {
    /// Page size when the caller asks for none (default: 20)
    pub default_page_size: usize,
    /// Largest page size served (default: 100)
    pub max_page_size: usize,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl PagingConfig {
    /// Effective page size for a requested `per_page` (0 means default).
    #[must_use]
    pub fn page_size(&self, per_page: usize) -> usize {
        let size = if per_page == 0 {
            self.default_page_size
        } else {
            per_page
        };
        size.clamp(1, self.max_page_size.max(1))
    }
}

/// Logging and metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log filter (default: info)
    pub log_level: String,
    /// Expose Prometheus metrics (default: false)
    pub metrics_enabled: bool,
    /// Metrics listener host (default: 0.0.0.0)
    pub metrics_host: String,
    /// Metrics listener port (default: 9090)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Falls back to defaults if environment variables are not set.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            sweeper: SweeperConfig {
                enabled: env::var("BLOODBANK_SWEEP_ENABLED")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(true),
                interval_secs: env::var("BLOODBANK_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            },
            paging: PagingConfig {
                default_page_size: env::var("BLOODBANK_DEFAULT_PAGE_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(20),
                max_page_size: env::var("BLOODBANK_MAX_PAGE_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(100),
            },
            observability: ObservabilityConfig {
                log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
                metrics_enabled: env::var("METRICS_ENABLED")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(false),
                metrics_host: env::var("METRICS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                metrics_port: env::var("METRICS_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(9090),
            },
            shutdown_timeout: env::var("SHUTDOWN_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        }
    }

    /// Interval between sweeps.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweeper.interval_secs)
    }

    /// Metrics listener address.
    #[must_use]
    pub fn metrics_address(&self) -> String {
        format!(
            "{}:{}",
            self.observability.metrics_host, self.observability.metrics_port
        )
    }
}
