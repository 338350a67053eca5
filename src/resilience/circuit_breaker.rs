// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker registry: one failure-isolation state machine per
//! operation name.
//!
//! Provides protection against hammering a backend endpoint that is
//! currently failing. Circuits are created lazily on first use and are
//! fully independent of each other.
//!
//! States:
//! - Closed: normal operation, requests pass through
//! - Open: endpoint unhealthy, requests fail-fast without attempting
//! - HalfOpen: probe window, exactly one in-flight request admitted
//!
//! ```text
//! Closed ──(failures ≥ threshold within window)──▶ Open
//! Open ──(now ≥ next_probe_at, one caller)──▶ HalfOpen (probe)
//! HalfOpen ──(probe ok × success_threshold)──▶ Closed
//! HalfOpen ──(probe fails)──▶ Open (reset timeout doubled, capped)
//! ```

use dashmap::DashMap;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::ResilienceError;

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Error type for circuit-protected operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit rejected the call without attempting it
    #[error("circuit '{name}' open, request rejected (retry in {retry_after:?})")]
    Open { name: String, retry_after: Duration },

    /// The underlying operation failed
    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

impl<E> CircuitError<E> {
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Map the inner error, keeping rejections intact.
    pub fn map_inner<F, E2>(self, f: F) -> CircuitError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::Open { name, retry_after } => CircuitError::Open { name, retry_after },
            Self::Inner(e) => CircuitError::Inner(f(e)),
        }
    }
}

impl<E: Into<ResilienceError>> From<CircuitError<E>> for ResilienceError {
    fn from(err: CircuitError<E>) -> Self {
        match err {
            CircuitError::Open { name, retry_after } => ResilienceError::CircuitOpen { name, retry_after },
            CircuitError::Inner(e) => e.into(),
        }
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitConfig {
    /// Number of consecutive failures to trip the circuit
    pub failure_threshold: u32,
    /// Number of consecutive successes in half-open to close circuit
    pub success_threshold: u32,
    /// How long to wait before the first probe after opening
    pub reset_timeout: Duration,
    /// Cap for the reset timeout as it doubles across repeated opens
    pub max_reset_timeout: Duration,
    /// Failures further apart than this restart the consecutive count
    pub failure_window: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            max_reset_timeout: Duration::from_secs(300),
            failure_window: Duration::from_secs(60),
        }
    }
}

impl CircuitConfig {
    /// Aggressive config for critical paths (trips faster, recovers cautiously)
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 3,
            reset_timeout: Duration::from_secs(60),
            max_reset_timeout: Duration::from_secs(600),
            failure_window: Duration::from_secs(60),
        }
    }

    /// Lenient config for less critical paths (tolerates more failures)
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            failure_threshold: 10,
            success_threshold: 1,
            reset_timeout: Duration::from_secs(15),
            max_reset_timeout: Duration::from_secs(120),
            failure_window: Duration::from_secs(60),
        }
    }

    /// Reset timeout after the `opens`-th consecutive open (1-indexed).
    #[must_use]
    pub fn reset_timeout_for(&self, opens: u32) -> Duration {
        let exponent = opens.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.reset_timeout.checked_mul(factor))
            .map_or(self.max_reset_timeout, |d| d.min(self.max_reset_timeout))
    }
}

/// Point-in-time view of one circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitStats {
    pub name: String,
    /// Reported state: an open circuit whose probe time has passed reports `HalfOpen`.
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure_at: Option<Instant>,
    /// Set (and in the future) whenever `state` is `Open`.
    pub next_probe_at: Option<Instant>,
    /// Consecutive opens without a full recovery (drives reset backoff).
    pub open_count: u32,
    pub calls_total: u64,
    pub failures_total: u64,
    pub rejections_total: u64,
}

impl CircuitStats {
    fn closed(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_at: None,
            next_probe_at: None,
            open_count: 0,
            calls_total: 0,
            failures_total: 0,
            rejections_total: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct CircuitEntry {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// Timestamps of failures still inside the window, oldest first.
    recent_failures: VecDeque<Instant>,
    last_failure_at: Option<Instant>,
    next_probe_at: Option<Instant>,
    open_count: u32,
    probe_in_flight: bool,
    /// Bumped on reset so permits issued earlier are ignored.
    generation: u64,
    calls_total: u64,
    failures_total: u64,
    rejections_total: u64,
}

impl CircuitEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            recent_failures: VecDeque::new(),
            last_failure_at: None,
            next_probe_at: None,
            open_count: 0,
            probe_in_flight: false,
            generation: 0,
            calls_total: 0,
            failures_total: 0,
            rejections_total: 0,
        }
    }

    fn reset(&mut self) {
        let generation = self.generation.wrapping_add(1);
        *self = Self::new();
        self.generation = generation;
    }

    fn stats(&self, name: &str, now: Instant) -> CircuitStats {
        let state = match (self.state, self.next_probe_at) {
            (CircuitState::Open, Some(at)) if now >= at => CircuitState::HalfOpen,
            (state, _) => state,
        };
        CircuitStats {
            name: name.to_string(),
            state,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            last_failure_at: self.last_failure_at,
            next_probe_at: if state == CircuitState::Open { self.next_probe_at } else { None },
            open_count: self.open_count,
            calls_total: self.calls_total,
            failures_total: self.failures_total,
            rejections_total: self.rejections_total,
        }
    }

    fn trip(&mut self, name: &str, now: Instant, config: &CircuitConfig) {
        self.open_count = self.open_count.saturating_add(1);
        let wait = config.reset_timeout_for(self.open_count);
        self.state = CircuitState::Open;
        self.consecutive_successes = 0;
        self.next_probe_at = Some(now + wait);
        warn!(
            circuit = %name,
            failures = self.consecutive_failures,
            opens = self.open_count,
            "Circuit opened, next probe in {:?}",
            wait
        );
        crate::metrics::record_circuit_trip(name);
        crate::metrics::set_circuit_state(name, CircuitState::Open as u8);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermitKind {
    Normal,
    Probe,
}

/// Admission ticket for one call.
struct Permit {
    kind: PermitKind,
    generation: u64,
}

/// Releases a probe slot if the probing future is dropped before it completes.
struct ProbeGuard<'a> {
    registry: &'a CircuitRegistry,
    name: &'a str,
    generation: u64,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Some(mut entry) = self.registry.circuits.get_mut(self.name) {
                if entry.generation == self.generation {
                    entry.probe_in_flight = false;
                    debug!(circuit = %self.name, "Probe cancelled, slot released");
                }
            }
        }
    }
}

/// Registry of named circuit breakers.
///
/// Each name is atomically updated through its map entry; calls for
/// different names never contend on a shared lock.
pub struct CircuitRegistry {
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
    circuits: DashMap<String, CircuitEntry>,
}

impl CircuitRegistry {
    #[must_use]
    pub fn new(config: CircuitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            circuits: DashMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Execute an async operation through the named circuit.
    ///
    /// Every `Err` from the operation counts as a failure.
    pub async fn execute<F, Fut, T, E>(&self, name: &str, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_filtered(name, f, |_| true).await
    }

    /// Like [`execute`](Self::execute), but only errors for which
    /// `counts_as_failure` returns `true` move the circuit toward open.
    ///
    /// A non-counted error is neutral for a closed circuit and ends a
    /// probe without changing state (the endpoint did answer).
    pub async fn execute_filtered<F, Fut, T, E, P>(
        &self,
        name: &str,
        f: F,
        counts_as_failure: P,
    ) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        let permit = self.acquire(name)?;
        let mut guard = ProbeGuard {
            registry: self,
            name,
            generation: permit.generation,
            armed: permit.kind == PermitKind::Probe,
        };

        let result = f().await;
        guard.armed = false;

        match &result {
            Ok(_) => self.on_success(name, &permit),
            Err(e) => {
                if counts_as_failure(e) {
                    self.on_failure(name, &permit);
                } else {
                    self.on_neutral(name, &permit);
                }
            }
        }

        result.map_err(CircuitError::Inner)
    }

    /// Whether a call would be admitted right now (does not claim a probe).
    #[must_use]
    pub fn is_call_permitted(&self, name: &str) -> bool {
        let now = self.clock.now();
        match self.circuits.get(name) {
            None => true,
            Some(entry) => match entry.state {
                CircuitState::Closed => true,
                CircuitState::Open => entry.next_probe_at.is_some_and(|at| now >= at) && !entry.probe_in_flight,
                CircuitState::HalfOpen => !entry.probe_in_flight,
            },
        }
    }

    /// Current view of one circuit (closed defaults for unknown names).
    #[must_use]
    pub fn stats(&self, name: &str) -> CircuitStats {
        let now = self.clock.now();
        self.circuits
            .get(name)
            .map_or_else(|| CircuitStats::closed(name), |entry| entry.stats(name, now))
    }

    /// Every circuit created so far, keyed by name.
    #[must_use]
    pub fn all_stats(&self) -> BTreeMap<String, CircuitStats> {
        let now = self.clock.now();
        self.circuits
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats(entry.key(), now)))
            .collect()
    }

    /// Count circuits by reported state: `(open, half_open)`.
    #[must_use]
    pub fn state_counts(&self) -> (usize, usize) {
        self.all_stats().values().fold((0, 0), |(open, half), s| match s.state {
            CircuitState::Open => (open + 1, half),
            CircuitState::HalfOpen => (open, half + 1),
            CircuitState::Closed => (open, half),
        })
    }

    /// Force one circuit back to closed with zeroed counters.
    pub fn reset(&self, name: &str) {
        if let Some(mut entry) = self.circuits.get_mut(name) {
            entry.reset();
            info!(circuit = %name, "Circuit reset");
            crate::metrics::set_circuit_state(name, CircuitState::Closed as u8);
        }
    }

    /// Reset every known circuit.
    pub fn reset_all(&self) {
        for mut entry in self.circuits.iter_mut() {
            entry.value_mut().reset();
            crate::metrics::set_circuit_state(entry.key(), CircuitState::Closed as u8);
        }
        info!(circuits = self.circuits.len(), "All circuits reset");
    }

    fn acquire<E>(&self, name: &str) -> Result<Permit, CircuitError<E>> {
        let now = self.clock.now();
        let mut entry = self
            .circuits
            .entry(name.to_string())
            .or_insert_with(CircuitEntry::new);
        entry.calls_total += 1;

        let kind = match entry.state {
            CircuitState::Closed => Some(PermitKind::Normal),
            CircuitState::Open => match entry.next_probe_at {
                Some(at) if now >= at && !entry.probe_in_flight => {
                    entry.state = CircuitState::HalfOpen;
                    entry.probe_in_flight = true;
                    debug!(circuit = %name, "Probe window reached, admitting probe");
                    crate::metrics::set_circuit_state(name, CircuitState::HalfOpen as u8);
                    Some(PermitKind::Probe)
                }
                _ => None,
            },
            CircuitState::HalfOpen if !entry.probe_in_flight => {
                entry.probe_in_flight = true;
                Some(PermitKind::Probe)
            }
            CircuitState::HalfOpen => None,
        };

        match kind {
            Some(kind) => Ok(Permit {
                kind,
                generation: entry.generation,
            }),
            None => {
                entry.rejections_total += 1;
                let retry_after = entry
                    .next_probe_at
                    .map_or(Duration::ZERO, |at| at.saturating_duration_since(now));
                debug!(circuit = %name, "Circuit rejected call (open)");
                crate::metrics::record_circuit_call(name, "rejected");
                Err(CircuitError::Open {
                    name: name.to_string(),
                    retry_after,
                })
            }
        }
    }

    fn on_success(&self, name: &str, permit: &Permit) {
        crate::metrics::record_circuit_call(name, "success");
        let Some(mut entry) = self.circuits.get_mut(name) else { return };
        if entry.generation != permit.generation {
            return;
        }

        match permit.kind {
            PermitKind::Normal => {
                if entry.state == CircuitState::Closed {
                    entry.consecutive_failures = 0;
                    entry.recent_failures.clear();
                }
            }
            PermitKind::Probe => {
                entry.probe_in_flight = false;
                entry.consecutive_successes += 1;
                if entry.consecutive_successes >= self.config.success_threshold {
                    let opens = entry.open_count;
                    let generation = entry.generation;
                    let (calls, failures, rejections) =
                        (entry.calls_total, entry.failures_total, entry.rejections_total);
                    *entry = CircuitEntry::new();
                    entry.generation = generation;
                    entry.calls_total = calls;
                    entry.failures_total = failures;
                    entry.rejections_total = rejections;
                    info!(circuit = %name, after_opens = opens, "Circuit closed, endpoint recovered");
                    crate::metrics::set_circuit_state(name, CircuitState::Closed as u8);
                } else {
                    entry.state = CircuitState::HalfOpen;
                    debug!(
                        circuit = %name,
                        successes = entry.consecutive_successes,
                        needed = self.config.success_threshold,
                        "Probe succeeded"
                    );
                }
            }
        }
    }

    fn on_failure(&self, name: &str, permit: &Permit) {
        crate::metrics::record_circuit_call(name, "failure");
        let now = self.clock.now();
        let Some(mut entry) = self.circuits.get_mut(name) else { return };
        if entry.generation != permit.generation {
            return;
        }
        entry.failures_total += 1;
        entry.last_failure_at = Some(now);

        match permit.kind {
            PermitKind::Normal => {
                if entry.state != CircuitState::Closed {
                    return;
                }
                let window = self.config.failure_window;
                while entry
                    .recent_failures
                    .front()
                    .is_some_and(|at| now.saturating_duration_since(*at) > window)
                {
                    entry.recent_failures.pop_front();
                }
                entry.recent_failures.push_back(now);
                let threshold = self.config.failure_threshold.max(1) as usize;
                while entry.recent_failures.len() > threshold {
                    entry.recent_failures.pop_front();
                }
                entry.consecutive_failures = entry.recent_failures.len() as u32;
                debug!(circuit = %name, failures = entry.consecutive_failures, "Circuit call failed");
                if entry.consecutive_failures >= self.config.failure_threshold {
                    entry.trip(name, now, &self.config);
                }
            }
            PermitKind::Probe => {
                entry.probe_in_flight = false;
                entry.consecutive_failures += 1;
                entry.trip(name, now, &self.config);
            }
        }
    }

    fn on_neutral(&self, name: &str, permit: &Permit) {
        crate::metrics::record_circuit_call(name, "neutral");
        if permit.kind != PermitKind::Probe {
            return;
        }
        if let Some(mut entry) = self.circuits.get_mut(name) {
            if entry.generation == permit.generation {
                entry.probe_in_flight = false;
            }
        }
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}
