//! Configuration management for the walk-in queue.
//!
//! Loads configuration from environment variables with sensible defaults.
//! The demo binary calls `dotenvy::dotenv()` first, so a local `.env` file
//! works too.

use crate::aggregates::violation::DetectorPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use walkin_runtime::retry::RetryPolicy;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Abuse detection thresholds
    pub policy: PolicyConfig,
    /// Login lockout
    pub lockout: LockoutConfig,
    /// Background maintenance
    pub sweep: SweepConfig,
    /// Repository read retries
    pub storage: StorageConfig,
    /// Process-level settings
    pub server: ServerConfig,
}

/// Rolling-window abuse thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Cancellations within the window that trigger an abuse violation
    pub cancel_abuse_threshold: u32,
    /// Cancellation window in minutes
    pub cancel_abuse_window_minutes: u32,
    /// No-shows within the window that trigger an attendance violation
    pub no_show_threshold: u32,
    /// No-show window in hours
    pub no_show_window_hours: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            cancel_abuse_threshold: 3,
            cancel_abuse_window_minutes: 120,
            no_show_threshold: 2,
            no_show_window_hours: 24,
        }
    }
}

/// Login lockout settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutConfig {
    /// Consecutive failures before the credential is locked
    pub max_failures: u32,
    /// Lockout duration in minutes
    pub lockout_minutes: u32,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            lockout_minutes: 15,
        }
    }
}

/// Background maintenance settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Seconds between maintenance ticks (expiry, repair, archive)
    pub interval_secs: u64,
    /// Terminal tickets older than this many office-days are archived
    pub archive_after_days: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            archive_after_days: 1,
        }
    }
}

/// Bounded backoff for idempotent repository reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Retries after the first failed read
    pub read_retries: usize,
    /// First backoff delay in milliseconds
    pub retry_base_ms: u64,
    /// Backoff cap in milliseconds
    pub retry_max_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            read_retries: 3,
            retry_base_ms: 50,
            retry_max_ms: 2000,
        }
    }
}

/// Process-level settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Prometheus exporter listen address; no exporter when unset
    pub metrics_addr: Option<String>,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_addr: None,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Invalid configuration value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid configuration: {0} must be greater than zero")]
pub struct ConfigError(pub &'static str);

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let policy = PolicyConfig::default();
        let lockout = LockoutConfig::default();
        let sweep = SweepConfig::default();
        let storage = StorageConfig::default();
        let server = ServerConfig::default();

        Self {
            policy: PolicyConfig {
                cancel_abuse_threshold: env::var("CANCEL_ABUSE_THRESHOLD")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(policy.cancel_abuse_threshold),
                cancel_abuse_window_minutes: env::var("CANCEL_ABUSE_WINDOW_MINUTES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(policy.cancel_abuse_window_minutes),
                no_show_threshold: env::var("NO_SHOW_THRESHOLD")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(policy.no_show_threshold),
                no_show_window_hours: env::var("NO_SHOW_WINDOW_HOURS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(policy.no_show_window_hours),
            },
            lockout: LockoutConfig {
                max_failures: env::var("LOGIN_MAX_FAILURES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(lockout.max_failures),
                lockout_minutes: env::var("LOGIN_LOCKOUT_MINUTES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(lockout.lockout_minutes),
            },
            sweep: SweepConfig {
                interval_secs: env::var("SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(sweep.interval_secs),
                archive_after_days: env::var("ARCHIVE_AFTER_DAYS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(sweep.archive_after_days),
            },
            storage: StorageConfig {
                read_retries: env::var("STORAGE_READ_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(storage.read_retries),
                retry_base_ms: env::var("STORAGE_RETRY_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(storage.retry_base_ms),
                retry_max_ms: env::var("STORAGE_RETRY_MAX_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(storage.retry_max_ms),
            },
            server: ServerConfig {
                log_level: env::var("LOG_LEVEL").unwrap_or(server.log_level),
                metrics_addr: env::var("METRICS_ADDR").ok().filter(|s| !s.trim().is_empty()),
                shutdown_timeout_secs: env::var("SHUTDOWN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(server.shutdown_timeout_secs),
            },
        }
    }

    /// Reject zero thresholds and windows
    ///
    /// # Errors
    ///
    /// Returns the name of the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zeroes = [
            ("CANCEL_ABUSE_THRESHOLD", self.policy.cancel_abuse_threshold == 0),
            ("CANCEL_ABUSE_WINDOW_MINUTES", self.policy.cancel_abuse_window_minutes == 0),
            ("NO_SHOW_THRESHOLD", self.policy.no_show_threshold == 0),
            ("NO_SHOW_WINDOW_HOURS", self.policy.no_show_window_hours == 0),
            ("LOGIN_MAX_FAILURES", self.lockout.max_failures == 0),
            ("LOGIN_LOCKOUT_MINUTES", self.lockout.lockout_minutes == 0),
            ("SWEEP_INTERVAL_SECS", self.sweep.interval_secs == 0),
            ("ARCHIVE_AFTER_DAYS", self.sweep.archive_after_days == 0),
        ];
        match zeroes.into_iter().find(|(_, zero)| *zero) {
            Some((name, _)) => Err(ConfigError(name)),
            None => Ok(()),
        }
    }

    /// Thresholds for the violation detector
    #[must_use]
    pub fn detector_policy(&self) -> DetectorPolicy {
        DetectorPolicy {
            cancel_threshold: self.policy.cancel_abuse_threshold,
            cancel_window: chrono::Duration::minutes(i64::from(
                self.policy.cancel_abuse_window_minutes,
            )),
            no_show_threshold: self.policy.no_show_threshold,
            no_show_window: chrono::Duration::hours(i64::from(self.policy.no_show_window_hours)),
            login_max_failures: self.lockout.max_failures,
            lockout_duration: chrono::Duration::minutes(i64::from(self.lockout.lockout_minutes)),
        }
    }

    /// Interval between maintenance ticks
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep.interval_secs)
    }

    /// Graceful shutdown timeout
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl StorageConfig {
    /// Backoff policy for idempotent reads
    #[must_use]
    pub fn read_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.read_retries)
            .initial_delay(Duration::from_millis(self.retry_base_ms))
            .max_delay(Duration::from_millis(self.retry_max_ms))
            .multiplier(2.0)
            .jitter(true)
            .build()
    }
}
