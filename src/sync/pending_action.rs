// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queued mutation record.
//!
//! ```text
//! queued ──▶ in_flight ──▶ delivered (removed)
//!    ▲            │
//!    └──(retry)───┤
//!                 └──▶ dead_letter (attempts == max_attempts, or permanent failure)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ResilienceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Queued,
    InFlight,
    DeadLetter,
}

impl ActionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InFlight => "in_flight",
            Self::DeadLetter => "dead_letter",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = ResilienceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "in_flight" => Ok(Self::InFlight),
            "dead_letter" => Ok(Self::DeadLetter),
            other => Err(ResilienceError::Storage(format!("unknown action status '{}'", other))),
        }
    }
}

/// A mutation waiting for delivery to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Opaque unique key handed back to the caller
    pub id: String,
    /// Enqueue order, strictly increasing
    pub seq: u64,
    pub action_name: String,
    pub payload: Vec<u8>,
    /// Epoch millis
    pub enqueued_at: i64,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Not eligible for delivery before this epoch millis
    pub next_attempt_at: i64,
    pub status: ActionStatus,
    pub last_error: Option<String>,
}

impl PendingAction {
    pub fn new(seq: u64, action_name: impl Into<String>, payload: Vec<u8>, enqueued_at: i64, max_attempts: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            seq,
            action_name: action_name.into(),
            payload,
            enqueued_at,
            attempts: 0,
            max_attempts,
            next_attempt_at: enqueued_at,
            status: ActionStatus::Queued,
            last_error: None,
        }
    }

    #[must_use]
    pub fn is_eligible(&self, now_millis: i64) -> bool {
        self.status == ActionStatus::Queued && self.next_attempt_at <= now_millis
    }

    #[must_use]
    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    /// Decode a JSON payload.
    pub fn payload_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// The error surfaced to callers once this action is dead-lettered.
    #[must_use]
    pub fn dead_letter_error(&self) -> ResilienceError {
        ResilienceError::DeadLetter {
            id: self.id.clone(),
            action_name: self.action_name.clone(),
            attempts: self.attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_action_is_immediately_eligible() {
        let action = PendingAction::new(1, "crew.update", b"{}".to_vec(), 1_000, 5);
        assert!(action.is_eligible(1_000));
        assert!(!action.is_eligible(999));
        assert_eq!(action.attempts_remaining(), 5);
        assert_eq!(action.id.len(), 36);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = PendingAction::new(1, "x", vec![], 0, 5);
        let b = PendingAction::new(2, "x", vec![], 0, 5);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [ActionStatus::Queued, ActionStatus::InFlight, ActionStatus::DeadLetter] {
            assert_eq!(status.as_str().parse::<ActionStatus>().unwrap(), status);
        }
        assert!("lost".parse::<ActionStatus>().is_err());
    }

    #[test]
    fn test_payload_json_and_dead_letter_error() {
        let mut action = PendingAction::new(1, "audit.submit", br#"{"score":7}"#.to_vec(), 0, 3);
        let value: serde_json::Value = action.payload_json().unwrap();
        assert_eq!(value["score"], 7);

        action.attempts = 3;
        let err = action.dead_letter_error();
        assert!(matches!(err, ResilienceError::DeadLetter { attempts: 3, .. }));
        assert_eq!(action.attempts_remaining(), 0);
    }
}
