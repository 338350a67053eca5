// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the resilience core.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `resilience_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `circuit`: circuit/endpoint name
//! - `action`: queued action name
//! - `outcome`: success, failure, rejected, retry, dead_letter

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKER
// ═══════════════════════════════════════════════════════════════════════════

/// Record circuit breaker call outcome
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "resilience_circuit_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set circuit state (0 = closed, 1 = half_open, 2 = open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "resilience_circuit_state",
        "circuit" => circuit.to_string()
    )
    .set(state as f64);
}

/// Record a closed/half-open → open transition
pub fn record_circuit_trip(circuit: &str) {
    counter!(
        "resilience_circuit_trips_total",
        "circuit" => circuit.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// CONNECTION QUALITY
// ═══════════════════════════════════════════════════════════════════════════

/// Set connection quality tier (0 = fast, 1 = moderate, 2 = slow, 3 = offline)
pub fn set_connection_quality(tier: u8) {
    gauge!("resilience_connection_quality").set(tier as f64);
}

/// Set last observed round-trip time
pub fn set_connection_rtt(rtt_ms: u32) {
    gauge!("resilience_connection_rtt_ms").set(rtt_ms as f64);
}

/// Record a retried request attempt
pub fn record_request_retry(operation: &str) {
    counter!(
        "resilience_request_retries_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record request outcome after retries
pub fn record_request(operation: &str, outcome: &str) {
    counter!(
        "resilience_requests_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record request latency
pub fn record_request_latency(operation: &str, duration: Duration) {
    histogram!(
        "resilience_request_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// STORAGE QUOTA
// ═══════════════════════════════════════════════════════════════════════════

/// Set local storage usage (0.0 - 100.0)
pub fn set_storage_usage_percent(percent: f64) {
    gauge!("resilience_storage_usage_percent").set(percent);
}

/// Set local storage used bytes
pub fn set_storage_used_bytes(bytes: u64) {
    gauge!("resilience_storage_used_bytes").set(bytes as f64);
}

/// Record a failed storage estimate
pub fn record_storage_check_error() {
    counter!("resilience_storage_check_errors_total").increment(1);
}

/// Record cache eviction
pub fn record_eviction(files: u64, bytes: u64) {
    counter!("resilience_evictions_total").increment(files);
    counter!("resilience_evicted_bytes_total").increment(bytes);
}

// ═══════════════════════════════════════════════════════════════════════════
// OFFLINE SYNC QUEUE
// ═══════════════════════════════════════════════════════════════════════════

/// Record an enqueued action
pub fn record_enqueued(action: &str) {
    counter!(
        "resilience_sync_enqueued_total",
        "action" => action.to_string()
    )
    .increment(1);
}

/// Record a delivery attempt outcome (delivered, retry, dead_letter, skipped)
pub fn record_delivery(action: &str, outcome: &str) {
    counter!(
        "resilience_sync_deliveries_total",
        "action" => action.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set pending queue depth
pub fn set_sync_pending(count: u64) {
    gauge!("resilience_sync_pending").set(count as f64);
}

/// Set dead-letter depth
pub fn set_sync_dead_letters(count: u64) {
    gauge!("resilience_sync_dead_letters").set(count as f64);
}

/// Record flush cycle duration
pub fn record_flush_duration(duration: Duration) {
    histogram!("resilience_sync_flush_seconds").record(duration.as_secs_f64());
}

/// Record a flush request that was skipped (offline, coalesced)
pub fn record_flush_skipped(reason: &str) {
    counter!(
        "resilience_sync_flush_skipped_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a queue store error that was logged rather than propagated
pub fn record_queue_error(operation: &str) {
    counter!(
        "resilience_sync_queue_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// HEALTH
// ═══════════════════════════════════════════════════════════════════════════

/// Set aggregate health score (0 - 100)
pub fn set_health_score(score: u8) {
    gauge!("resilience_health_score").set(score as f64);
}

/// Record a corrective action invoked on the aggregator
pub fn record_corrective_action(action: &str) {
    counter!(
        "resilience_corrective_actions_total",
        "action" => action.to_string()
    )
    .increment(1);
}

/// Record a lifecycle state transition
pub fn set_lifecycle_state(state: &str) {
    counter!(
        "resilience_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// A timer that records request latency when dropped
pub struct LatencyTimer {
    operation: String,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_request_latency(&self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These verify the API doesn't panic without an installed recorder.

    #[test]
    fn test_circuit_metrics() {
        set_circuit_state("crew", 0);
        set_circuit_state("audits", 2);
        record_circuit_call("crew", "success");
        record_circuit_call("audits", "rejected");
        record_circuit_trip("audits");
    }

    #[test]
    fn test_sync_metrics() {
        record_enqueued("crew.update");
        record_delivery("crew.update", "delivered");
        record_delivery("crew.update", "dead_letter");
        set_sync_pending(3);
        set_sync_dead_letters(1);
        record_flush_duration(Duration::from_millis(12));
        record_flush_skipped("offline");
        record_queue_error("update");
    }

    #[test]
    fn test_health_and_storage_metrics() {
        set_health_score(85);
        set_storage_usage_percent(42.5);
        set_storage_used_bytes(1024);
        record_storage_check_error();
        record_eviction(3, 4096);
        set_connection_quality(1);
        set_connection_rtt(120);
        record_corrective_action("reset_circuits");
        set_lifecycle_state("Running");
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("fetch");
            std::thread::sleep(Duration::from_micros(10));
        }
        record_request("fetch", "success");
        record_request_retry("fetch");
    }
}
