// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the resilience core.
//!
//! # Example
//!
//! ```
//! use offline_resilience::ResilienceConfig;
//!
//! // Minimal config (uses defaults)
//! let config = ResilienceConfig::default();
//! assert_eq!(config.circuit_failure_threshold, 5);
//! assert_eq!(config.sync_max_attempts, 5);
//!
//! // Partial TOML override
//! let config = ResilienceConfig::from_toml_str(r#"
//!     circuit_failure_threshold = 3
//!     storage_poll_interval_ms = 10000
//! "#).unwrap();
//! assert_eq!(config.circuit_failure_threshold, 3);
//! assert_eq!(config.circuit_success_threshold, 2);
//! ```

use serde::Deserialize;
use std::time::Duration;

use crate::connection::QualityThresholds;
use crate::error::{ResilienceError, Result};
use crate::resilience::circuit_breaker::CircuitConfig;
use crate::resilience::retry::{BackoffPolicy, RetryOptions};
use crate::storage::StorageThresholds;
use crate::sync::SyncConfig;

/// Configuration for the resilience core.
///
/// All fields have sensible defaults; durations are in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceConfig {
    /// Consecutive failures (within the window) that open a circuit
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,

    /// Rolling window for counting consecutive failures
    #[serde(default = "default_circuit_failure_window_ms")]
    pub circuit_failure_window_ms: u64,

    /// Initial open → probe delay
    #[serde(default = "default_circuit_reset_timeout_ms")]
    pub circuit_reset_timeout_ms: u64,

    /// Cap for the reset timeout after repeated opens
    #[serde(default = "default_circuit_max_reset_timeout_ms")]
    pub circuit_max_reset_timeout_ms: u64,

    /// Consecutive probe successes required to close
    #[serde(default = "default_circuit_success_threshold")]
    pub circuit_success_threshold: u32,

    /// Delivery attempts before an action is dead-lettered
    #[serde(default = "default_sync_max_attempts")]
    pub sync_max_attempts: u32,

    /// Sync backoff
    #[serde(default = "default_sync_backoff_base_ms")]
    pub sync_backoff_base_ms: u64,
    #[serde(default = "default_sync_backoff_cap_ms")]
    pub sync_backoff_cap_ms: u64,

    /// Periodic flush interval
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// fetch_with_retry defaults
    #[serde(default = "default_retry_max_retries")]
    pub retry_max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Storage polling
    #[serde(default = "default_storage_poll_interval_ms")]
    pub storage_poll_interval_ms: u64,
    #[serde(default = "default_storage_warning_percent")]
    pub storage_warning_percent: f64,
    #[serde(default = "default_storage_critical_percent")]
    pub storage_critical_percent: f64,

    /// Quality tier RTT thresholds (used when effective type is unknown)
    #[serde(default = "default_quality_fast_rtt_ms")]
    pub quality_fast_rtt_ms: u32,
    #[serde(default = "default_quality_moderate_rtt_ms")]
    pub quality_moderate_rtt_ms: u32,

    /// Health snapshot push interval
    #[serde(default = "default_health_tick_ms")]
    pub health_tick_ms: u64,

    /// SQLite file for the durable queue (None = in-memory queue)
    #[serde(default)]
    pub queue_path: Option<String>,
}

fn default_circuit_failure_threshold() -> u32 { 5 }
fn default_circuit_failure_window_ms() -> u64 { 60_000 }
fn default_circuit_reset_timeout_ms() -> u64 { 30_000 }
fn default_circuit_max_reset_timeout_ms() -> u64 { 300_000 } // 5 minutes
fn default_circuit_success_threshold() -> u32 { 2 }
fn default_sync_max_attempts() -> u32 { 5 }
fn default_sync_backoff_base_ms() -> u64 { 1_000 }
fn default_sync_backoff_cap_ms() -> u64 { 60_000 }
fn default_sync_interval_ms() -> u64 { 30_000 }
fn default_retry_max_retries() -> u32 { 3 }
fn default_retry_base_delay_ms() -> u64 { 1_000 }
fn default_retry_max_delay_ms() -> u64 { 30_000 }
fn default_storage_poll_interval_ms() -> u64 { 60_000 }
fn default_storage_warning_percent() -> f64 { 80.0 }
fn default_storage_critical_percent() -> f64 { 90.0 }
fn default_quality_fast_rtt_ms() -> u32 { 100 }
fn default_quality_moderate_rtt_ms() -> u32 { 300 }
fn default_health_tick_ms() -> u64 { 5_000 }

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_failure_window_ms: default_circuit_failure_window_ms(),
            circuit_reset_timeout_ms: default_circuit_reset_timeout_ms(),
            circuit_max_reset_timeout_ms: default_circuit_max_reset_timeout_ms(),
            circuit_success_threshold: default_circuit_success_threshold(),
            sync_max_attempts: default_sync_max_attempts(),
            sync_backoff_base_ms: default_sync_backoff_base_ms(),
            sync_backoff_cap_ms: default_sync_backoff_cap_ms(),
            sync_interval_ms: default_sync_interval_ms(),
            retry_max_retries: default_retry_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            storage_poll_interval_ms: default_storage_poll_interval_ms(),
            storage_warning_percent: default_storage_warning_percent(),
            storage_critical_percent: default_storage_critical_percent(),
            quality_fast_rtt_ms: default_quality_fast_rtt_ms(),
            quality_moderate_rtt_ms: default_quality_moderate_rtt_ms(),
            health_tick_ms: default_health_tick_ms(),
            queue_path: None,
        }
    }
}

impl ResilienceConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| ResilienceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break component invariants.
    pub fn validate(&self) -> Result<()> {
        if self.circuit_failure_threshold == 0 {
            return Err(ResilienceError::Config("circuit_failure_threshold must be > 0".into()));
        }
        if self.circuit_success_threshold == 0 {
            return Err(ResilienceError::Config("circuit_success_threshold must be > 0".into()));
        }
        if self.circuit_max_reset_timeout_ms < self.circuit_reset_timeout_ms {
            return Err(ResilienceError::Config(
                "circuit_max_reset_timeout_ms must be >= circuit_reset_timeout_ms".into(),
            ));
        }
        if self.sync_max_attempts == 0 {
            return Err(ResilienceError::Config("sync_max_attempts must be > 0".into()));
        }
        if self.sync_backoff_cap_ms < self.sync_backoff_base_ms {
            return Err(ResilienceError::Config(
                "sync_backoff_cap_ms must be >= sync_backoff_base_ms".into(),
            ));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(ResilienceError::Config(
                "retry_max_delay_ms must be >= retry_base_delay_ms".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.storage_warning_percent)
            || !(0.0..=100.0).contains(&self.storage_critical_percent)
            || self.storage_warning_percent > self.storage_critical_percent
        {
            return Err(ResilienceError::Config(
                "storage thresholds must satisfy 0 <= warning <= critical <= 100".into(),
            ));
        }
        if self.quality_fast_rtt_ms > self.quality_moderate_rtt_ms {
            return Err(ResilienceError::Config(
                "quality_fast_rtt_ms must be <= quality_moderate_rtt_ms".into(),
            ));
        }
        if self.sync_interval_ms == 0 || self.storage_poll_interval_ms == 0 || self.health_tick_ms == 0 {
            return Err(ResilienceError::Config("timer intervals must be > 0".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.circuit_failure_threshold,
            success_threshold: self.circuit_success_threshold,
            reset_timeout: Duration::from_millis(self.circuit_reset_timeout_ms),
            max_reset_timeout: Duration::from_millis(self.circuit_max_reset_timeout_ms),
            failure_window: Duration::from_millis(self.circuit_failure_window_ms),
        }
    }

    #[must_use]
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_attempts: self.sync_max_attempts,
            backoff: BackoffPolicy::new(
                Duration::from_millis(self.sync_backoff_base_ms),
                Duration::from_millis(self.sync_backoff_cap_ms),
            ),
            flush_interval: Duration::from_millis(self.sync_interval_ms),
        }
    }

    #[must_use]
    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions {
            max_retries: self.retry_max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    #[must_use]
    pub fn storage_thresholds(&self) -> StorageThresholds {
        StorageThresholds {
            warning_percent: self.storage_warning_percent,
            critical_percent: self.storage_critical_percent,
        }
    }

    #[must_use]
    pub fn quality_thresholds(&self) -> QualityThresholds {
        QualityThresholds {
            fast_rtt_ms: self.quality_fast_rtt_ms,
            moderate_rtt_ms: self.quality_moderate_rtt_ms,
        }
    }

    #[must_use]
    pub fn storage_poll_interval(&self) -> Duration {
        Duration::from_millis(self.storage_poll_interval_ms)
    }

    #[must_use]
    pub fn health_tick(&self) -> Duration {
        Duration::from_millis(self.health_tick_ms)
    }
}
