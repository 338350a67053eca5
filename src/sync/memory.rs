// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory queue store for tests and ephemeral sessions.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

use super::pending_action::PendingAction;
use super::queue_store::{QueueStore, SyncCounters};
use crate::error::{ResilienceError, Result};

#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    actions: Mutex<BTreeMap<u64, PendingAction>>,
    counters: Mutex<SyncCounters>,
}

impl MemoryQueueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert(&self, action: &PendingAction) -> Result<()> {
        let mut actions = self.actions.lock();
        if actions.values().any(|a| a.id == action.id) {
            return Err(ResilienceError::Storage(format!("duplicate action id {}", action.id)));
        }
        actions.insert(action.seq, action.clone());
        Ok(())
    }

    async fn update(&self, action: &PendingAction) -> Result<()> {
        match self.actions.lock().get_mut(&action.seq) {
            Some(existing) if existing.id == action.id => {
                *existing = action.clone();
                Ok(())
            }
            _ => Err(ResilienceError::NotFound(action.id.clone())),
        }
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let mut actions = self.actions.lock();
        let seq = actions.iter().find(|(_, a)| a.id == id).map(|(seq, _)| *seq);
        Ok(seq.and_then(|seq| actions.remove(&seq)).is_some())
    }

    async fn load_all(&self) -> Result<Vec<PendingAction>> {
        Ok(self.actions.lock().values().cloned().collect())
    }

    async fn load_counters(&self) -> Result<SyncCounters> {
        Ok(*self.counters.lock())
    }

    async fn save_counters(&self, counters: &SyncCounters) -> Result<()> {
        *self.counters.lock() = *counters;
        Ok(())
    }
}
