// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience aggregator: one subscribable health signal plus the
//! corrective actions the UI can trigger.
//!
//! The aggregator only reads subsystem snapshots. Every corrective action
//! goes through the owning subsystem's public API.

pub mod score;

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::connection::ConnectionMonitor;
use crate::error::Result;
use crate::listeners::{ListenerId, Listeners};
use crate::resilience::circuit_breaker::CircuitRegistry;
use crate::storage::{CacheEvictor, EvictionReport, StorageMonitor};
use crate::sync::{SyncManager, SyncOutcome};

pub use score::{compute_health, Deduction, DeductionReason, HealthInputs, HealthSnapshot, HealthStatus};

const SECS_PER_DAY: u64 = 86_400;

pub struct ResilienceAggregator {
    connection: Arc<ConnectionMonitor>,
    storage: Arc<StorageMonitor>,
    circuits: Arc<CircuitRegistry>,
    sync: Arc<SyncManager>,
    evictor: Arc<dyn CacheEvictor>,
    clock: Arc<dyn Clock>,
    listeners: Listeners<HealthSnapshot>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl ResilienceAggregator {
    pub fn new(
        connection: Arc<ConnectionMonitor>,
        storage: Arc<StorageMonitor>,
        circuits: Arc<CircuitRegistry>,
        sync: Arc<SyncManager>,
        evictor: Arc<dyn CacheEvictor>,
    ) -> Self {
        Self {
            connection,
            storage,
            circuits,
            sync,
            evictor,
            clock: Arc::new(SystemClock),
            listeners: Listeners::new(),
            ticker: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Current subsystem readings.
    #[must_use]
    pub fn inputs(&self) -> HealthInputs {
        let connection = self.connection.snapshot();
        let quota = self.storage.snapshot();
        let (open_circuits, half_open_circuits) = self.circuits.state_counts();
        let stats = self.sync.get_stats();
        HealthInputs {
            online: connection.online,
            quality: connection.quality,
            storage_usage_percent: quota.usage_percent,
            storage_pressure: quota.pressure(self.storage.thresholds()),
            open_circuits,
            half_open_circuits,
            pending: stats.pending,
            dead_letters: stats.dead_lettered,
        }
    }

    /// Freshly computed snapshot (no notification).
    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot::from_inputs(self.inputs(), self.clock.epoch_millis())
    }

    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&HealthSnapshot) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Compute a snapshot and push it to every subscriber.
    pub fn publish(&self) -> HealthSnapshot {
        let snapshot = self.snapshot();
        debug!(score = snapshot.score, status = %snapshot.status, "Health computed");
        crate::metrics::set_health_score(snapshot.score);
        self.listeners.emit(&snapshot);
        snapshot
    }

    /// Flush the sync queue now. No-op while offline or already syncing.
    #[tracing::instrument(skip(self))]
    pub async fn force_sync_now(&self) -> Result<SyncOutcome> {
        crate::metrics::record_corrective_action("force_sync");
        let outcome = self.sync.sync_all().await?;
        self.publish();
        Ok(outcome)
    }

    #[tracing::instrument(skip(self))]
    pub fn reset_circuits(&self) {
        crate::metrics::record_corrective_action("reset_circuits");
        self.circuits.reset_all();
        info!("Circuits reset on request");
        self.publish();
    }

    /// Evict cached entries older than `retention_days`, then re-measure storage.
    #[tracing::instrument(skip(self))]
    pub async fn clear_storage(&self, retention_days: u32) -> Result<EvictionReport> {
        crate::metrics::record_corrective_action("clear_storage");
        let retention = Duration::from_secs(u64::from(retention_days) * SECS_PER_DAY);
        let report = self.evictor.evict_older_than(retention).await?;
        if let Err(e) = self.storage.check_now().await {
            warn!(error = %e, "Storage re-check after eviction failed");
        }
        self.publish();
        Ok(report)
    }

    /// Push a snapshot every `tick`. No-op if already ticking.
    pub fn start(self: &Arc<Self>, tick: Duration) {
        let mut ticker = self.ticker.lock();
        if ticker.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let tick = crate::clock::timer_period(tick, "health");
        let weak: Weak<Self> = Arc::downgrade(self);
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(aggregator) = weak.upgrade() else { break };
                aggregator.publish();
            }
        }));
        info!(tick_ms = tick.as_millis() as u64, "Health ticker started");
    }

    pub fn stop(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
            info!("Health ticker stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.ticker.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn dispose(&self) {
        self.stop();
        self.listeners.clear();
    }
}

impl Drop for ResilienceAggregator {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.get_mut().take() {
            handle.abort();
        }
    }
}
