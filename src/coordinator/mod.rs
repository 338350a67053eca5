// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience coordinator.
//!
//! Builds every subsystem from one [`ResilienceConfig`] and owns their
//! lifecycle. There is no global state: each coordinator is an isolated
//! instance.
//!
//! # Example
//!
//! ```rust,no_run
//! use offline_resilience::{ResilienceConfig, ResilienceCoordinator, ResilienceSources};
//! use offline_resilience::connection::{NetworkSignals, WatchNetworkSource};
//! use offline_resilience::storage::{DirectoryCacheEvictor, DirectoryStorageSource};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> offline_resilience::Result<()> {
//!     let network = Arc::new(WatchNetworkSource::new(NetworkSignals::default()));
//!     let sources = ResilienceSources::new(
//!         network.clone(),
//!         Arc::new(DirectoryStorageSource::new("./data", 512 * 1024 * 1024)),
//!         Arc::new(DirectoryCacheEvictor::new("./data/cache")),
//!     );
//!     let config = ResilienceConfig {
//!         queue_path: Some("./data/queue.db".into()),
//!         ..Default::default()
//!     };
//!
//!     let coordinator = ResilienceCoordinator::open(config, sources).await?;
//!     coordinator.start()?;
//!
//!     let id = coordinator.sync().enqueue("crew.update", br#"{"id":7}"#.to_vec()).await?;
//!     println!("queued {} (health {})", id, coordinator.health().snapshot().score);
//!
//!     coordinator.dispose().await;
//!     Ok(())
//! }
//! ```

mod lifecycle;
pub mod types;

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::config::ResilienceConfig;
use crate::connection::ConnectionMonitor;
use crate::error::Result;
use crate::health::ResilienceAggregator;
use crate::resilience::circuit_breaker::CircuitRegistry;
use crate::storage::StorageMonitor;
use crate::sync::{MemoryQueueStore, QueueStore, SqliteQueueStore, SyncManager};

pub use types::{CoordinatorState, ResilienceSources};

pub struct ResilienceCoordinator {
    config: ResilienceConfig,
    state: watch::Sender<CoordinatorState>,
    connection: Arc<ConnectionMonitor>,
    storage: Arc<StorageMonitor>,
    circuits: Arc<CircuitRegistry>,
    sync: Arc<SyncManager>,
    health: Arc<ResilienceAggregator>,
}

impl ResilienceCoordinator {
    /// Validate `config`, open the durable queue and build every subsystem.
    ///
    /// The coordinator starts in `Created`; call [`start()`](Self::start)
    /// to begin polling.
    #[tracing::instrument(skip_all, fields(queue_path = ?config.queue_path))]
    pub async fn open(config: ResilienceConfig, sources: ResilienceSources) -> Result<Self> {
        config.validate()?;
        let clock = sources.clock.clone();

        let connection = Arc::new(ConnectionMonitor::new(
            sources.network.clone(),
            config.quality_thresholds(),
            config.retry_options(),
        ));
        let storage = Arc::new(StorageMonitor::new(sources.storage.clone(), config.storage_thresholds()));
        let circuits = Arc::new(CircuitRegistry::with_clock(config.circuit_config(), clock.clone()));

        let store: Arc<dyn QueueStore> = match &config.queue_path {
            Some(path) => Arc::new(SqliteQueueStore::open(path).await?),
            None => {
                info!("No queue path configured, pending actions will not survive restarts");
                Arc::new(MemoryQueueStore::new())
            }
        };
        let sync = Arc::new(
            SyncManager::open_with_clock(
                config.sync_config(),
                store,
                connection.clone(),
                circuits.clone(),
                clock.clone(),
            )
            .await?,
        );
        let health = Arc::new(
            ResilienceAggregator::new(
                connection.clone(),
                storage.clone(),
                circuits.clone(),
                sync.clone(),
                sources.evictor.clone(),
            )
            .with_clock(clock),
        );

        let (state, _rx) = watch::channel(CoordinatorState::Created);
        crate::metrics::set_lifecycle_state("Created");
        info!("Resilience coordinator ready");

        Ok(Self {
            config,
            state,
            connection,
            storage,
            circuits,
            sync,
            health,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<ConnectionMonitor> {
        &self.connection
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<StorageMonitor> {
        &self.storage
    }

    #[must_use]
    pub fn circuits(&self) -> &Arc<CircuitRegistry> {
        &self.circuits
    }

    #[must_use]
    pub fn sync(&self) -> &Arc<SyncManager> {
        &self.sync
    }

    /// The aggregator: health snapshots and corrective actions.
    #[must_use]
    pub fn health(&self) -> &Arc<ResilienceAggregator> {
        &self.health
    }
}
