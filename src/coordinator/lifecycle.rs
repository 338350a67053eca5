// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Coordinator lifecycle management: start, stop, dispose.

use tokio::sync::watch;
use tracing::{debug, info};

use super::{CoordinatorState, ResilienceCoordinator};
use crate::error::{ResilienceError, Result};

impl ResilienceCoordinator {
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == CoordinatorState::Running
    }

    /// Start every timer and watcher. No-op when already running.
    ///
    /// Must be called from within a tokio runtime.
    #[tracing::instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        match self.state() {
            CoordinatorState::Running => {
                debug!("Coordinator already running");
                return Ok(());
            }
            CoordinatorState::Disposed => return Err(ResilienceError::Disposed),
            CoordinatorState::Created | CoordinatorState::Stopped => {}
        }

        self.connection.start();
        self.storage.start(self.config.storage_poll_interval());
        self.sync.start();
        self.health.start(self.config.health_tick());

        self.transition(CoordinatorState::Running);
        info!("Resilience coordinator running");
        Ok(())
    }

    /// Stop every timer. Always safe; subscriptions stay in place.
    #[tracing::instrument(skip(self))]
    pub fn stop(&self) {
        if self.state() != CoordinatorState::Running {
            return;
        }
        self.health.stop();
        self.sync.stop();
        self.storage.stop();
        self.connection.stop();
        self.transition(CoordinatorState::Stopped);
        info!("Resilience coordinator stopped");
    }

    /// Stop, drop every listener and close the queue store. Terminal.
    #[tracing::instrument(skip(self))]
    pub async fn dispose(&self) {
        if self.state() == CoordinatorState::Disposed {
            return;
        }
        self.stop();
        self.health.dispose();
        self.storage.dispose();
        self.connection.dispose();
        self.sync.close().await;
        self.transition(CoordinatorState::Disposed);
        info!("Resilience coordinator disposed");
    }

    fn transition(&self, next: CoordinatorState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Coordinator state changed");
            crate::metrics::set_lifecycle_state(&next.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResilienceConfig;
    use crate::connection::{NetworkSignals, StaticNetworkSource};
    use crate::coordinator::ResilienceSources;
    use crate::storage::{DirectoryCacheEvictor, FixedStorageSource};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn coordinator() -> (ResilienceCoordinator, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let sources = ResilienceSources::new(
            Arc::new(StaticNetworkSource::new(NetworkSignals::default())),
            Arc::new(FixedStorageSource::new(10, 100)),
            Arc::new(DirectoryCacheEvictor::new(dir.path())),
        );
        let coordinator = ResilienceCoordinator::open(ResilienceConfig::default(), sources).await.unwrap();
        (coordinator, dir)
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let (c, _dir) = coordinator().await;
        let mut rx = c.state_receiver();
        assert_eq!(c.state(), CoordinatorState::Created);

        c.start().unwrap();
        c.start().unwrap();
        assert!(c.is_running());
        assert!(c.storage.is_running());
        assert!(c.sync.is_running());
        assert!(c.health.is_running());
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), CoordinatorState::Running);

        c.stop();
        assert_eq!(c.state(), CoordinatorState::Stopped);
        assert!(!c.storage.is_running());
        assert!(!c.sync.is_running());

        c.start().unwrap();
        assert!(c.is_running());

        c.dispose().await;
        assert_eq!(c.state(), CoordinatorState::Disposed);
        assert!(matches!(c.start(), Err(ResilienceError::Disposed)));
        c.dispose().await;
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sources = ResilienceSources::new(
            Arc::new(StaticNetworkSource::new(NetworkSignals::default())),
            Arc::new(FixedStorageSource::new(10, 100)),
            Arc::new(DirectoryCacheEvictor::new(dir.path())),
        );
        let config = ResilienceConfig {
            sync_max_attempts: 0,
            ..Default::default()
        };
        let result = ResilienceCoordinator::open(config, sources).await;
        assert!(matches!(result, Err(ResilienceError::Config(_))));
    }
}
