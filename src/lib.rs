// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Offline Resilience
//!
//! Client-side resilience and offline-sync core: keeps an interactive
//! application usable under degraded, intermittent or absent connectivity.
//!
//! ## Architecture
//!
//! Data flows bottom-up, corrective commands flow top-down:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Resilience Aggregator                     │
//! │  • HealthSnapshot (score 0-100, healthy/degraded/critical)  │
//! │  • force_sync_now / reset_circuits / clear_storage          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ reads snapshots
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Offline Sync Manager                      │
//! │  • Durable FIFO queue (SQLite) of pending mutations         │
//! │  • Backoff, dead letters, one flush at a time               │
//! └─────────────────────────────────────────────────────────────┘
//!          │ is_online / adaptive timeout     │ per-endpoint guard
//!          ▼                                  ▼
//! ┌──────────────────────┐  ┌───────────────────┐  ┌────────────────────┐
//! │ Connection Monitor   │  │ Circuit Registry  │  │ Storage Monitor    │
//! │ quality tier +       │  │ closed/open/      │  │ quota polling +    │
//! │ adaptive settings    │  │ half_open         │  │ pressure signals   │
//! └──────────────────────┘  └───────────────────┘  └────────────────────┘
//!          ▲                                                 ▲
//!   NetworkSignalSource                             StorageSignalSource
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use offline_resilience::{ResilienceConfig, ResilienceCoordinator, ResilienceSources};
//! use offline_resilience::connection::{NetworkSignals, WatchNetworkSource};
//! use offline_resilience::storage::{DirectoryCacheEvictor, DirectoryStorageSource};
//! use offline_resilience::sync::FnHandler;
//! use offline_resilience::RequestError;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> offline_resilience::Result<()> {
//!     let network = Arc::new(WatchNetworkSource::new(NetworkSignals::default()));
//!     let sources = ResilienceSources::new(
//!         network.clone(),
//!         Arc::new(DirectoryStorageSource::new("./data", 256 * 1024 * 1024)),
//!         Arc::new(DirectoryCacheEvictor::new("./data/cache")),
//!     );
//!     let coordinator = ResilienceCoordinator::open(ResilienceConfig::default(), sources).await?;
//!
//!     coordinator.sync().register_handler(
//!         "crew.update",
//!         Arc::new(FnHandler::new(|action| async move {
//!             // POST action.payload to the backend here
//!             let _ = action;
//!             Ok::<(), RequestError>(())
//!         })),
//!     );
//!     coordinator.start()?;
//!
//!     coordinator.sync().enqueue("crew.update", br#"{"name":"Ada"}"#.to_vec()).await?;
//!     coordinator.health().subscribe(|snapshot| println!("health: {}", snapshot.status));
//!
//!     coordinator.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`ResilienceCoordinator`] wiring and lifecycle
//! - [`resilience`]: Circuit breaker registry and retry/backoff
//! - [`connection`]: Connection quality monitor
//! - [`storage`]: Storage quota monitor and cache eviction
//! - [`sync`]: Offline sync manager and durable queue stores
//! - [`health`]: Health scoring and the resilience aggregator

pub mod clock;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod listeners;
pub mod metrics;
pub mod resilience;
pub mod storage;
pub mod sync;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ResilienceConfig;
pub use connection::{AdaptiveSettings, ConnectionMonitor, ConnectionSnapshot, Quality};
pub use coordinator::{CoordinatorState, ResilienceCoordinator, ResilienceSources};
pub use error::{RequestError, ResilienceError, Result};
pub use health::{HealthSnapshot, HealthStatus, ResilienceAggregator};
pub use listeners::{ListenerId, Listeners};
pub use metrics::LatencyTimer;
pub use resilience::circuit_breaker::{CircuitConfig, CircuitError, CircuitRegistry, CircuitState, CircuitStats};
pub use resilience::retry::{BackoffPolicy, RetryOptions};
pub use storage::{StorageMonitor, StoragePressure, StorageQuota};
pub use sync::{PendingAction, SyncManager, SyncOutcome, SyncStats};
