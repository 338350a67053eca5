// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable queue persistence.
//!
//! Callers only ever append (`insert`); the flush worker is the only
//! writer that updates or removes records.

use async_trait::async_trait;
use serde::Serialize;

use super::pending_action::PendingAction;
use crate::error::Result;

/// Lifetime counters persisted alongside the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SyncCounters {
    pub total_queued: u64,
    pub completed: u64,
    pub failed: u64,
}

#[async_trait]
pub trait QueueStore: Send + Sync + 'static {
    async fn insert(&self, action: &PendingAction) -> Result<()>;

    /// Persist attempts, schedule, status and last error of an existing record.
    async fn update(&self, action: &PendingAction) -> Result<()>;

    /// Returns `false` if no record had this id.
    async fn remove(&self, id: &str) -> Result<bool>;

    /// Every record (queued, in flight and dead-lettered) in enqueue order.
    async fn load_all(&self) -> Result<Vec<PendingAction>>;

    async fn load_counters(&self) -> Result<SyncCounters>;

    async fn save_counters(&self, counters: &SyncCounters) -> Result<()>;

    /// Release underlying resources.
    async fn close(&self) {}
}
