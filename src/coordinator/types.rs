// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the resilience coordinator.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::connection::NetworkSignalSource;
use crate::storage::{CacheEvictor, StorageSignalSource};

/// Coordinator lifecycle state.
///
/// ```text
/// Created ──start──▶ Running ──stop──▶ Stopped ──start──▶ Running
///    └──────────────────┴───────dispose──────┴──▶ Disposed (terminal)
/// ```
///
/// Use [`super::ResilienceCoordinator::state()`] to check current state or
/// [`super::ResilienceCoordinator::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Built, timers not running
    Created,
    /// Timers and watchers active
    Running,
    /// Timers stopped, may be started again
    Stopped,
    /// Listeners dropped and queue store closed
    Disposed,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Disposed => write!(f, "Disposed"),
        }
    }
}

/// Platform adapters the coordinator is built from.
#[derive(Clone)]
pub struct ResilienceSources {
    pub network: Arc<dyn NetworkSignalSource>,
    pub storage: Arc<dyn StorageSignalSource>,
    pub evictor: Arc<dyn CacheEvictor>,
    pub clock: Arc<dyn Clock>,
}

impl ResilienceSources {
    pub fn new(
        network: Arc<dyn NetworkSignalSource>,
        storage: Arc<dyn StorageSignalSource>,
        evictor: Arc<dyn CacheEvictor>,
    ) -> Self {
        Self {
            network,
            storage,
            evictor,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
