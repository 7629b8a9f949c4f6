//! Configuration management for the clinic services.
//!
//! Loads configuration from environment variables with sensible defaults.
//! The binary calls `dotenvy::dotenv()` first so a local `.env` file works.

use clinic_runtime::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Invalid configuration value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting that must be positive was zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// Backoff cap below the initial backoff
    #[error("RECONCILE_MAX_BACKOFF_MS ({max}) is below RECONCILE_INITIAL_BACKOFF_MS ({initial})")]
    BackoffRange {
        /// Initial backoff in milliseconds
        initial: u64,
        /// Maximum backoff in milliseconds
        max: u64,
    },
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Booking path settings
    pub booking: BookingConfig,
    /// Deferred release reconciliation
    pub reconciler: ReconcilerConfig,
    /// Observability
    pub observability: ObservabilityConfig,
}

/// Booking path settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConfig {
    /// Longest wait for a schedule lock before reporting `Busy` (ms)
    pub lock_timeout_ms: u64,
    /// Candidates tried before reporting `IssuanceConflict`
    pub issuance_attempts: u32,
    /// Buffered events per subscriber before slow subscribers lag
    pub event_buffer: usize,
}

/// Reconciler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Pause between passes over the pending queue (ms)
    pub interval_ms: u64,
    /// Retries of one release within a pass
    pub max_retries: u32,
    /// First backoff within a pass (ms)
    pub initial_backoff_ms: u64,
    /// Backoff cap within a pass (ms)
    pub max_backoff_ms: u64,
}

/// Observability settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log filter used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Install the Prometheus recorder
    pub metrics_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_source(|_| None)
    }
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Missing or unparsable values fall back to their defaults.
    #[must_use]
    pub fn from_source(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            booking: BookingConfig {
                lock_timeout_ms: parse_or(&lookup, "BOOKING_LOCK_TIMEOUT_MS", 2000),
                issuance_attempts: parse_or(&lookup, "ISSUANCE_ATTEMPTS", 16),
                event_buffer: parse_or(&lookup, "EVENT_BUFFER", 1024),
            },
            reconciler: ReconcilerConfig {
                interval_ms: parse_or(&lookup, "RECONCILE_INTERVAL_MS", 5000),
                max_retries: parse_or(&lookup, "RECONCILE_MAX_RETRIES", 3),
                initial_backoff_ms: parse_or(&lookup, "RECONCILE_INITIAL_BACKOFF_MS", 50),
                max_backoff_ms: parse_or(&lookup, "RECONCILE_MAX_BACKOFF_MS", 1000),
            },
            observability: ObservabilityConfig {
                log_filter: lookup("LOG_FILTER").unwrap_or_else(|| "clinic=info".to_string()),
                metrics_enabled: parse_or(&lookup, "METRICS_ENABLED", true),
            },
        }
    }

    /// Reject settings that would disable the booking path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first offending setting.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.booking.lock_timeout_ms == 0 {
            return Err(ConfigError::Zero("BOOKING_LOCK_TIMEOUT_MS"));
        }
        if self.booking.issuance_attempts == 0 {
            return Err(ConfigError::Zero("ISSUANCE_ATTEMPTS"));
        }
        if self.booking.event_buffer == 0 {
            return Err(ConfigError::Zero("EVENT_BUFFER"));
        }
        if self.reconciler.interval_ms == 0 {
            return Err(ConfigError::Zero("RECONCILE_INTERVAL_MS"));
        }
        if self.reconciler.max_backoff_ms < self.reconciler.initial_backoff_ms {
            return Err(ConfigError::BackoffRange {
                initial: self.reconciler.initial_backoff_ms,
                max: self.reconciler.max_backoff_ms,
            });
        }
        Ok(())
    }

    /// Schedule lock timeout
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.booking.lock_timeout_ms)
    }

    /// Pause between reconciler passes
    #[must_use]
    pub const fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconciler.interval_ms)
    }

    /// Backoff used by the reconciler for each release
    #[must_use]
    pub const fn reconcile_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.reconciler.max_retries)
            .initial_delay(Duration::from_millis(self.reconciler.initial_backoff_ms))
            .max_delay(Duration::from_millis(self.reconciler.max_backoff_ms))
            .build()
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
