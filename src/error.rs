// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for the resilience core.
//!
//! Two layers:
//! - [`RequestError`] classifies a single backend call (what the transport saw).
//! - [`ResilienceError`] is what callers of this crate receive.
//!
//! Retryable request failures (timeout, connection trouble, 5xx, 429) are
//! retried locally; everything else surfaces on first occurrence.

use std::time::Duration;
use thiserror::Error;

/// Outcome classification of one outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The request did not finish within its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection refused/reset, DNS failure and similar transport trouble.
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with a non-success status.
    #[error("backend returned status {code}: {message}")]
    Status { code: u16, message: String },
}

impl RequestError {
    /// Shorthand for a status-coded failure.
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    /// Whether a retry may succeed: timeouts, transport errors, 5xx and 429.
    ///
    /// 4xx validation-type failures are permanent.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) => true,
            Self::Status { code, .. } => *code == 429 || (500..=599).contains(code),
        }
    }
}

/// Errors surfaced by the resilience core.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// Fail-fast rejection: the circuit guarding this operation is open.
    #[error("circuit '{name}' is open, retry in {retry_after:?}")]
    CircuitOpen { name: String, retry_after: Duration },

    /// Timeout or connection failure that survived the local retry budget.
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    /// 4xx-class failure; never retried.
    #[error("operation rejected by backend: {0}")]
    PermanentOperation(String),

    /// Advisory: local storage is full.
    #[error("storage quota exceeded: {used_bytes} of {quota_bytes} bytes used")]
    StorageQuotaExceeded { used_bytes: u64, quota_bytes: u64 },

    /// A queued action exhausted its retry budget.
    #[error("action '{action_name}' ({id}) dead-lettered after {attempts} attempts")]
    DeadLetter {
        id: String,
        action_name: String,
        attempts: u32,
    },

    /// The action is being delivered right now and cannot be cancelled.
    #[error("action {0} is in flight")]
    ActionInFlight(String),

    #[error("action {0} not found")]
    NotFound(String),

    /// Local persistence failure (queue store, filesystem).
    #[error("storage backend error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The coordinator was disposed and cannot be restarted.
    #[error("coordinator has been disposed")]
    Disposed,
}

impl ResilienceError {
    /// Whether the caller may reasonably try again later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. } | Self::TransientNetwork(_) | Self::ActionInFlight(_)
        )
    }

    /// Short label used for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::TransientNetwork(_) => "transient",
            Self::PermanentOperation(_) => "permanent",
            Self::StorageQuotaExceeded { .. } => "quota_exceeded",
            Self::DeadLetter { .. } => "dead_letter",
            Self::ActionInFlight(_) => "in_flight",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::Disposed => "disposed",
        }
    }
}

impl From<RequestError> for ResilienceError {
    fn from(err: RequestError) -> Self {
        if err.is_retryable() {
            Self::TransientNetwork(err.to_string())
        } else {
            Self::PermanentOperation(err.to_string())
        }
    }
}

impl From<sqlx::Error> for ResilienceError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<std::io::Error> for ResilienceError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type Result<T, E = ResilienceError> = std::result::Result<T, E>;
