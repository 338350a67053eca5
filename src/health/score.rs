// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Health score: 100 minus independent, additive deductions, floored at 0.
//!
//! | condition                         | deduction      |
//! |-----------------------------------|----------------|
//! | offline                           | 30             |
//! | slow connection (online)          | 15             |
//! | storage above critical threshold  | 20             |
//! | storage above warning threshold   | 10             |
//! | open circuit                      | 15 each        |
//! | half-open circuit                 | 5 each         |
//! | pending sync items > 20           | 10             |
//! | pending sync items in (10, 20]    | 5              |
//! | dead-lettered sync item           | 5 each         |
//!
//! # Example
//!
//! ```
//! use offline_resilience::health::{compute_health, HealthInputs, HealthStatus};
//! use offline_resilience::connection::Quality;
//!
//! let inputs = HealthInputs {
//!     online: false,
//!     quality: Quality::Offline,
//!     open_circuits: 2,
//!     pending: 25,
//!     ..HealthInputs::nominal()
//! };
//! let (score, _) = compute_health(&inputs);
//! assert_eq!(score, 30);
//! assert_eq!(HealthStatus::from_score(score), HealthStatus::Critical);
//! ```

use serde::Serialize;
use std::fmt;

use crate::connection::Quality;
use crate::storage::StoragePressure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

impl HealthStatus {
    #[must_use]
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => Self::Healthy,
            50..=79 => Self::Degraded,
            _ => Self::Critical,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Subsystem readings a score is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HealthInputs {
    pub online: bool,
    pub quality: Quality,
    pub storage_usage_percent: f64,
    pub storage_pressure: StoragePressure,
    pub open_circuits: usize,
    pub half_open_circuits: usize,
    pub pending: u64,
    pub dead_letters: u64,
}

impl HealthInputs {
    /// Everything fine: online, fast, empty queue, no pressure.
    #[must_use]
    pub fn nominal() -> Self {
        Self {
            online: true,
            quality: Quality::Fast,
            storage_usage_percent: 0.0,
            storage_pressure: StoragePressure::Normal,
            open_circuits: 0,
            half_open_circuits: 0,
            pending: 0,
            dead_letters: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeductionReason {
    Offline,
    SlowConnection,
    StorageCritical,
    StorageLow,
    OpenCircuits,
    HalfOpenCircuits,
    SyncBacklog,
    DeadLetters,
}

/// One itemised line of the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Deduction {
    pub reason: DeductionReason,
    pub points: u32,
}

/// Score and the deductions that produced it.
#[must_use]
pub fn compute_health(inputs: &HealthInputs) -> (u8, Vec<Deduction>) {
    let mut deductions = Vec::new();
    let mut deduct = |reason, points: u32| {
        if points > 0 {
            deductions.push(Deduction { reason, points });
        }
    };

    if !inputs.online {
        deduct(DeductionReason::Offline, 30);
    } else if inputs.quality == Quality::Slow {
        deduct(DeductionReason::SlowConnection, 15);
    }

    match inputs.storage_pressure {
        StoragePressure::Critical => deduct(DeductionReason::StorageCritical, 20),
        StoragePressure::Low => deduct(DeductionReason::StorageLow, 10),
        StoragePressure::Normal => {}
    }

    deduct(DeductionReason::OpenCircuits, per_item(inputs.open_circuits as u64, 15));
    deduct(DeductionReason::HalfOpenCircuits, per_item(inputs.half_open_circuits as u64, 5));

    match inputs.pending {
        p if p > 20 => deduct(DeductionReason::SyncBacklog, 10),
        p if p > 10 => deduct(DeductionReason::SyncBacklog, 5),
        _ => {}
    }

    deduct(DeductionReason::DeadLetters, per_item(inputs.dead_letters, 5));

    let total: u32 = deductions.iter().fold(0u32, |acc, d| acc.saturating_add(d.points));
    let score = 100u32.saturating_sub(total) as u8;
    (score, deductions)
}

fn per_item(count: u64, points: u32) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX).saturating_mul(points)
}

/// Aggregate health at one instant. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub score: u8,
    pub status: HealthStatus,
    pub deductions: Vec<Deduction>,
    pub inputs: HealthInputs,
    /// Epoch millis
    pub computed_at: i64,
}

impl HealthSnapshot {
    #[must_use]
    pub fn from_inputs(inputs: HealthInputs, computed_at: i64) -> Self {
        let (score, deductions) = compute_health(&inputs);
        Self {
            score,
            status: HealthStatus::from_score(score),
            deductions,
            inputs,
            computed_at,
        }
    }
}
