// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Time source abstraction.
//!
//! Circuit timing uses the monotonic [`Clock::now`]; persisted queue
//! timestamps use [`Clock::epoch_millis`]. [`ManualClock`] moves both
//! together so tests can step time without sleeping.

use parking_lot::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Shortest period a background timer runs at.
pub const MIN_TIMER_PERIOD: Duration = Duration::from_millis(10);

/// Raise a requested timer period to at least [`MIN_TIMER_PERIOD`].
pub(crate) fn timer_period(requested: Duration, timer: &'static str) -> Duration {
    if requested >= MIN_TIMER_PERIOD {
        return requested;
    }
    warn!(
        timer,
        requested_ms = requested.as_millis() as u64,
        "Timer period too short, using {:?}",
        MIN_TIMER_PERIOD
    );
    MIN_TIMER_PERIOD
}

pub trait Clock: Send + Sync + 'static {
    /// Monotonic now.
    fn now(&self) -> Instant;

    /// Wall-clock milliseconds since the Unix epoch.
    fn epoch_millis(&self) -> i64;
}

/// Real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

/// Hand-stepped clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    origin_millis: i64,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Wall-clock origin is fixed at 2025-01-01T00:00:00Z.
    pub const DEFAULT_EPOCH_MILLIS: i64 = 1_735_689_600_000;

    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Self::DEFAULT_EPOCH_MILLIS)
    }

    #[must_use]
    pub fn starting_at(epoch_millis: i64) -> Self {
        Self {
            origin: Instant::now(),
            origin_millis: epoch_millis,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Total time advanced since construction.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }

    fn epoch_millis(&self) -> i64 {
        self.origin_millis + self.offset.lock().as_millis() as i64
    }
}
