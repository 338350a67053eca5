// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage pressure levels for local persistent storage.
//!
//! Three-tier cascade. The monitor only signals; eviction is always the
//! caller's decision.
//!
//! # Example
//!
//! ```
//! use offline_resilience::storage::{StoragePressure, StorageQuota, StorageThresholds};
//!
//! let thresholds = StorageThresholds::default();
//!
//! let quota = StorageQuota::new(500, 1000);
//! assert_eq!(quota.pressure(&thresholds), StoragePressure::Normal);
//!
//! // Over 80% - advisory only
//! let quota = StorageQuota::new(850, 1000);
//! assert_eq!(quota.pressure(&thresholds), StoragePressure::Low);
//! assert!(quota.ensure_capacity().is_ok());
//!
//! // Over 90% - drags the health score down
//! let quota = StorageQuota::new(950, 1000);
//! assert_eq!(quota.pressure(&thresholds), StoragePressure::Critical);
//! ```

use serde::Serialize;

use crate::error::{ResilienceError, Result};

/// Usage cut-offs, in percent. A level applies when usage is strictly above it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StorageThresholds {
    pub warning_percent: f64,
    pub critical_percent: f64,
}

impl Default for StorageThresholds {
    fn default() -> Self {
        Self {
            warning_percent: 80.0,
            critical_percent: 90.0,
        }
    }
}

/// Storage pressure level.
///
/// - **Normal** (<= 80%): nothing to do
/// - **Low** (80-90%): advisory, UI may suggest clearing cache
/// - **Critical** (> 90%): lowers the aggregate health score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoragePressure {
    Normal = 0,
    Low = 1,
    Critical = 2,
}

impl StoragePressure {
    #[must_use]
    pub fn from_percent(percent: f64, thresholds: &StorageThresholds) -> Self {
        match percent {
            p if p > thresholds.critical_percent => Self::Critical,
            p if p > thresholds.warning_percent => Self::Low,
            _ => Self::Normal,
        }
    }

    /// Whether the UI should suggest clearing cached data.
    #[must_use]
    pub fn should_suggest_eviction(&self) -> bool {
        !matches!(self, Self::Normal)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Storage usage normal",
            Self::Low => "Storage running low",
            Self::Critical => "Storage critically low",
        }
    }
}

impl std::fmt::Display for StoragePressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One storage measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StorageQuota {
    pub used_bytes: u64,
    pub quota_bytes: u64,
    /// `used / quota * 100`; zero when the quota is unknown (0).
    pub usage_percent: f64,
}

impl StorageQuota {
    #[must_use]
    pub fn new(used_bytes: u64, quota_bytes: u64) -> Self {
        let usage_percent = if quota_bytes == 0 {
            0.0
        } else {
            used_bytes as f64 / quota_bytes as f64 * 100.0
        };
        Self {
            used_bytes,
            quota_bytes,
            usage_percent,
        }
    }

    /// Nothing measured yet.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(0, 0)
    }

    #[must_use]
    pub fn pressure(&self, thresholds: &StorageThresholds) -> StoragePressure {
        StoragePressure::from_percent(self.usage_percent, thresholds)
    }

    #[must_use]
    pub fn available_bytes(&self) -> u64 {
        self.quota_bytes.saturating_sub(self.used_bytes)
    }

    /// Advisory check before a large local write.
    pub fn ensure_capacity(&self) -> Result<()> {
        if self.quota_bytes > 0 && self.used_bytes >= self.quota_bytes {
            return Err(ResilienceError::StorageQuotaExceeded {
                used_bytes: self.used_bytes,
                quota_bytes: self.quota_bytes,
            });
        }
        Ok(())
    }
}
