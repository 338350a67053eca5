// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline sync manager: durable queue of pending mutations.
//!
//! Mutations are accepted immediately regardless of connectivity and
//! delivered later, in enqueue order, through the circuit registry.
//!
//! ```text
//! enqueue() ──▶ QueueStore (durable) ──▶ in-memory queue (seq order)
//!                                              │
//!            timer / reconnect / sync_all() ──▶ flush (one at a time)
//!                                              │
//!                 CircuitRegistry::execute_filtered(endpoint, deliver)
//!                   ├─ ok ──────────▶ removed, completed += 1
//!                   ├─ retryable ───▶ attempts += 1, backoff
//!                   └─ exhausted / permanent ──▶ dead letter, failed += 1
//! ```
//!
//! # Flush cycle rules
//!
//! - Skipped while offline; concurrent requests coalesce into the running cycle
//! - Actions still in backoff wait for a later cycle
//! - Once an endpoint's circuit is open, the rest of that endpoint's actions
//!   are left untouched until the next cycle. The action whose failure
//!   trips the circuit still consumes its attempt.

pub mod handler;
pub mod memory;
pub mod pending_action;
pub mod queue_store;
pub mod sqlite;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::connection::ConnectionMonitor;
use crate::error::{RequestError, ResilienceError, Result};
use crate::listeners::{ListenerId, Listeners};
use crate::resilience::circuit_breaker::{CircuitError, CircuitRegistry, CircuitState};
use crate::resilience::retry::BackoffPolicy;

pub use handler::{ActionHandler, FnHandler};
pub use memory::MemoryQueueStore;
pub use pending_action::{ActionStatus, PendingAction};
pub use queue_store::{QueueStore, SyncCounters};
pub use sqlite::SqliteQueueStore;

/// Sync manager tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncConfig {
    /// Delivery attempts before an action is dead-lettered
    pub max_attempts: u32,
    /// Delay before a failed action becomes eligible again
    pub backoff: BackoffPolicy,
    /// Period of the background flush timer
    pub flush_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60)),
            flush_interval: Duration::from_secs(30),
        }
    }
}

/// Queue statistics for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SyncStats {
    /// Actions ever enqueued
    pub total_queued: u64,
    /// Actions delivered
    pub completed: u64,
    /// Actions ever dead-lettered
    pub failed: u64,
    /// Actions waiting for delivery (including in flight)
    pub pending: u64,
    /// Dead letters currently held for manual resolution
    pub dead_lettered: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NetworkStatus {
    pub is_syncing: bool,
    pub is_online: bool,
}

/// Why a flush request did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    AlreadySyncing,
}

/// What one flush cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Ids delivered, in delivery order
    pub delivered: Vec<String>,
    /// Failed attempts that were re-queued with backoff
    pub retried: usize,
    /// Ids moved to the dead-letter list
    pub dead_lettered: Vec<String>,
    /// Still in backoff, left for a later cycle
    pub deferred: usize,
    /// Left untouched because their endpoint's circuit is open
    pub circuit_skipped: usize,
    /// No handler registered for the action name
    pub unhandled: usize,
}

impl SyncReport {
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.retried + self.dead_lettered.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Skipped { reason: SkipReason },
    Completed(SyncReport),
}

impl SyncOutcome {
    #[must_use]
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Skipped { .. } => None,
        }
    }
}

/// Details of an action that exhausted its retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetterNotice {
    pub id: String,
    pub action_name: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Pushed to subscribers of [`SyncManager::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    StatsChanged(SyncStats),
    SyncingChanged { is_syncing: bool },
    DeadLettered(DeadLetterNotice),
}

/// Resets the syncing flag when a flush cycle ends, even on early return.
struct FlushGuard<'a> {
    manager: &'a SyncManager,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.manager.syncing.store(false, Ordering::Release);
        self.manager.events.emit(&SyncEvent::SyncingChanged { is_syncing: false });
    }
}

struct FlushWorker {
    handle: JoinHandle<()>,
    connection_listener: ListenerId,
}

pub struct SyncManager {
    config: SyncConfig,
    store: Arc<dyn QueueStore>,
    connection: Arc<ConnectionMonitor>,
    circuits: Arc<CircuitRegistry>,
    clock: Arc<dyn Clock>,
    handlers: DashMap<String, Arc<dyn ActionHandler>>,
    /// Queued and in-flight actions keyed by seq
    queue: Mutex<BTreeMap<u64, PendingAction>>,
    dead_letters: Mutex<BTreeMap<u64, PendingAction>>,
    next_seq: AtomicU64,
    total_queued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    syncing: AtomicBool,
    events: Listeners<SyncEvent>,
    wake: Arc<Notify>,
    worker: Mutex<Option<FlushWorker>>,
}

impl SyncManager {
    /// Open the manager over `store`, recovering any persisted queue.
    ///
    /// Actions persisted as in flight (process died mid-delivery) go back
    /// to the queue; their delivery may be repeated.
    pub async fn open(
        config: SyncConfig,
        store: Arc<dyn QueueStore>,
        connection: Arc<ConnectionMonitor>,
        circuits: Arc<CircuitRegistry>,
    ) -> Result<Self> {
        Self::open_with_clock(config, store, connection, circuits, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        config: SyncConfig,
        store: Arc<dyn QueueStore>,
        connection: Arc<ConnectionMonitor>,
        circuits: Arc<CircuitRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let counters = store.load_counters().await?;
        let mut queue = BTreeMap::new();
        let mut dead_letters = BTreeMap::new();
        let mut max_seq = 0u64;

        for mut action in store.load_all().await? {
            max_seq = max_seq.max(action.seq);
            match action.status {
                ActionStatus::DeadLetter => {
                    dead_letters.insert(action.seq, action);
                }
                ActionStatus::InFlight => {
                    warn!(id = %action.id, action = %action.action_name, "Recovering action interrupted mid-delivery");
                    action.status = ActionStatus::Queued;
                    store.update(&action).await?;
                    queue.insert(action.seq, action);
                }
                ActionStatus::Queued => {
                    queue.insert(action.seq, action);
                }
            }
        }

        if !queue.is_empty() || !dead_letters.is_empty() {
            info!(
                pending = queue.len(),
                dead_letters = dead_letters.len(),
                "Recovered sync queue from previous session"
            );
        }
        crate::metrics::set_sync_pending(queue.len() as u64);
        crate::metrics::set_sync_dead_letters(dead_letters.len() as u64);

        Ok(Self {
            config,
            store,
            connection,
            circuits,
            clock,
            handlers: DashMap::new(),
            queue: Mutex::new(queue),
            dead_letters: Mutex::new(dead_letters),
            next_seq: AtomicU64::new(max_seq + 1),
            total_queued: AtomicU64::new(counters.total_queued),
            completed: AtomicU64::new(counters.completed),
            failed: AtomicU64::new(counters.failed),
            syncing: AtomicBool::new(false),
            events: Listeners::new(),
            wake: Arc::new(Notify::new()),
            worker: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Register the delivery handler for `action_name` (replacing any previous one).
    pub fn register_handler(&self, action_name: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        let action_name = action_name.into();
        debug!(action = %action_name, "Registered action handler");
        self.handlers.insert(action_name, handler);
    }

    /// Durably queue a mutation. Never blocks on the network.
    pub async fn enqueue(&self, action_name: impl Into<String>, payload: Vec<u8>) -> Result<String> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let action = PendingAction::new(
            seq,
            action_name,
            payload,
            self.clock.epoch_millis(),
            self.config.max_attempts,
        );
        self.store.insert(&action).await?;

        let id = action.id.clone();
        debug!(id = %id, action = %action.action_name, seq, "Action enqueued");
        crate::metrics::record_enqueued(&action.action_name);
        self.queue.lock().insert(seq, action);
        self.total_queued.fetch_add(1, Ordering::Relaxed);

        self.persist_counters().await;
        self.publish_stats();
        Ok(id)
    }

    /// Serialize `payload` as JSON and enqueue it.
    pub async fn enqueue_json<T: Serialize>(&self, action_name: impl Into<String>, payload: &T) -> Result<String> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| ResilienceError::PermanentOperation(format!("payload not serializable: {}", e)))?;
        self.enqueue(action_name, bytes).await
    }

    #[must_use]
    pub fn get_stats(&self) -> SyncStats {
        SyncStats {
            total_queued: self.total_queued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            pending: self.queue.lock().len() as u64,
            dead_lettered: self.dead_letters.lock().len() as u64,
        }
    }

    #[must_use]
    pub fn get_network_status(&self) -> NetworkStatus {
        NetworkStatus {
            is_syncing: self.is_syncing(),
            is_online: self.connection.is_online(),
        }
    }

    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Queued and in-flight actions in enqueue order.
    #[must_use]
    pub fn pending_actions(&self) -> Vec<PendingAction> {
        self.queue.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn dead_letters(&self) -> Vec<PendingAction> {
        self.dead_letters.lock().values().cloned().collect()
    }

    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Cancel a queued action. In-flight deliveries cannot be cancelled.
    pub async fn remove_pending_action(&self, id: &str) -> Result<()> {
        let removed = {
            let mut queue = self.queue.lock();
            let found = queue.iter().find(|(_, a)| a.id == id).map(|(seq, a)| (*seq, a.status));
            match found {
                None => return Err(ResilienceError::NotFound(id.to_string())),
                Some((_, ActionStatus::InFlight)) => return Err(ResilienceError::ActionInFlight(id.to_string())),
                Some((seq, _)) => queue.remove(&seq),
            }
        };

        if let Some(action) = removed {
            self.store.remove(&action.id).await?;
            info!(id = %id, action = %action.action_name, "Pending action cancelled");
            self.publish_stats();
        }
        Ok(())
    }

    /// Put a dead letter back in the queue with a fresh attempt budget.
    ///
    /// It keeps its original position in enqueue order.
    pub async fn retry_dead_letter(&self, id: &str) -> Result<()> {
        let mut action = self.take_dead_letter(id)?;
        action.attempts = 0;
        action.status = ActionStatus::Queued;
        action.next_attempt_at = self.clock.epoch_millis();
        action.last_error = None;

        if let Err(e) = self.store.update(&action).await {
            action.status = ActionStatus::DeadLetter;
            self.dead_letters.lock().insert(action.seq, action);
            return Err(e);
        }
        info!(id = %id, action = %action.action_name, "Dead letter re-queued");
        self.queue.lock().insert(action.seq, action);
        self.publish_stats();
        Ok(())
    }

    /// Drop a dead letter for good.
    pub async fn discard_dead_letter(&self, id: &str) -> Result<()> {
        let action = self.take_dead_letter(id)?;
        if let Err(e) = self.store.remove(&action.id).await {
            self.dead_letters.lock().insert(action.seq, action);
            return Err(e);
        }
        info!(id = %id, action = %action.action_name, "Dead letter discarded");
        self.publish_stats();
        Ok(())
    }

    fn take_dead_letter(&self, id: &str) -> Result<PendingAction> {
        let mut dead = self.dead_letters.lock();
        let seq = dead
            .iter()
            .find(|(_, a)| a.id == id)
            .map(|(seq, _)| *seq)
            .ok_or_else(|| ResilienceError::NotFound(id.to_string()))?;
        dead.remove(&seq).ok_or_else(|| ResilienceError::NotFound(id.to_string()))
    }

    /// Run one flush cycle now.
    #[tracing::instrument(skip(self), fields(pending))]
    pub async fn sync_all(&self) -> Result<SyncOutcome> {
        if !self.connection.is_online() {
            debug!("Offline, flush skipped");
            crate::metrics::record_flush_skipped("offline");
            return Ok(SyncOutcome::Skipped {
                reason: SkipReason::Offline,
            });
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Flush already running, request coalesced");
            crate::metrics::record_flush_skipped("coalesced");
            return Ok(SyncOutcome::Skipped {
                reason: SkipReason::AlreadySyncing,
            });
        }
        let _guard = FlushGuard { manager: self };
        self.events.emit(&SyncEvent::SyncingChanged { is_syncing: true });

        let started = Instant::now();
        let order: Vec<u64> = self.queue.lock().keys().copied().collect();
        tracing::Span::current().record("pending", order.len());

        let mut report = SyncReport::default();
        let mut blocked: HashSet<String> = HashSet::new();

        for seq in order {
            let now = self.clock.epoch_millis();
            let action = {
                let mut queue = self.queue.lock();
                let Some(action) = queue.get_mut(&seq) else { continue };
                if !action.is_eligible(now) {
                    report.deferred += 1;
                    continue;
                }
                let Some(handler) = self.handlers.get(&action.action_name).map(|h| h.value().clone()) else {
                    report.unhandled += 1;
                    crate::metrics::record_delivery(&action.action_name, "no_handler");
                    continue;
                };
                let endpoint = handler.endpoint(&action.action_name);
                if !blocked.contains(&endpoint) && !self.circuits.is_call_permitted(&endpoint) {
                    blocked.insert(endpoint.clone());
                }
                if blocked.contains(&endpoint) {
                    report.circuit_skipped += 1;
                    crate::metrics::record_delivery(&action.action_name, "skipped");
                    continue;
                }
                action.status = ActionStatus::InFlight;
                (action.clone(), handler, endpoint)
            };
            let (action, handler, endpoint) = action;
            if let Err(e) = self.store.update(&action).await {
                error!(id = %action.id, error = %e, "Failed to mark action in flight");
                crate::metrics::record_queue_error("update");
            }

            match self.deliver(&action, handler.as_ref(), &endpoint).await {
                Ok(()) => self.on_delivered(action, &mut report).await,
                Err(failure) => {
                    if failure.is_circuit_rejection()
                        || self.circuits.stats(&endpoint).state == CircuitState::Open
                    {
                        debug!(endpoint = %endpoint, "Circuit open, skipping endpoint for this cycle");
                        blocked.insert(endpoint);
                    }
                    self.on_failed(action, failure, &mut report).await;
                }
            }
        }

        self.persist_counters().await;
        self.publish_stats();
        crate::metrics::record_flush_duration(started.elapsed());

        if report.attempted() > 0 {
            info!(
                delivered = report.delivered.len(),
                retried = report.retried,
                dead_lettered = report.dead_lettered.len(),
                deferred = report.deferred,
                "Flush cycle complete"
            );
        }
        Ok(SyncOutcome::Completed(report))
    }

    async fn deliver(
        &self,
        action: &PendingAction,
        handler: &dyn ActionHandler,
        endpoint: &str,
    ) -> std::result::Result<(), DeliveryFailure> {
        let deadline = self.connection.adaptive_settings().request_timeout;
        let result = self
            .circuits
            .execute_filtered(
                endpoint,
                || async move {
                    match tokio::time::timeout(deadline, handler.deliver(action)).await {
                        Ok(result) => result,
                        Err(_) => Err(RequestError::Timeout(deadline)),
                    }
                },
                RequestError::is_retryable,
            )
            .await;

        result.map_err(|e| match e {
            CircuitError::Open { name, retry_after } => DeliveryFailure::CircuitOpen { name, retry_after },
            CircuitError::Inner(e) => DeliveryFailure::Request(e),
        })
    }

    async fn on_delivered(&self, action: PendingAction, report: &mut SyncReport) {
        self.queue.lock().remove(&action.seq);
        self.completed.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.store.remove(&action.id).await {
            // Already delivered; a stale record only risks a repeat delivery after restart
            error!(id = %action.id, error = %e, "Failed to remove delivered action from store");
            crate::metrics::record_queue_error("remove");
        }
        debug!(id = %action.id, action = %action.action_name, "Action delivered");
        crate::metrics::record_delivery(&action.action_name, "delivered");
        report.delivered.push(action.id);
    }

    async fn on_failed(&self, mut action: PendingAction, failure: DeliveryFailure, report: &mut SyncReport) {
        action.attempts = (action.attempts + 1).min(action.max_attempts);
        action.last_error = Some(failure.to_string());

        let exhausted = action.attempts >= action.max_attempts;
        if exhausted || !failure.is_retryable() {
            action.status = ActionStatus::DeadLetter;
            self.queue.lock().remove(&action.seq);
            self.failed.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.store.update(&action).await {
                error!(id = %action.id, error = %e, "Failed to persist dead letter");
                crate::metrics::record_queue_error("update");
            }

            warn!(
                id = %action.id,
                action = %action.action_name,
                attempts = action.attempts,
                error = %failure,
                "{}",
                action.dead_letter_error()
            );
            crate::metrics::record_delivery(&action.action_name, "dead_letter");

            let notice = DeadLetterNotice {
                id: action.id.clone(),
                action_name: action.action_name.clone(),
                attempts: action.attempts,
                last_error: action.last_error.clone(),
            };
            report.dead_lettered.push(action.id.clone());
            self.dead_letters.lock().insert(action.seq, action);
            self.events.emit(&SyncEvent::DeadLettered(notice));
            return;
        }

        let delay = self.config.backoff.delay_for(action.attempts - 1);
        action.next_attempt_at = self
            .clock
            .epoch_millis()
            .saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
        action.status = ActionStatus::Queued;
        if let Err(e) = self.store.update(&action).await {
            error!(id = %action.id, error = %e, "Failed to persist retry schedule");
            crate::metrics::record_queue_error("update");
        }

        debug!(
            id = %action.id,
            attempts = action.attempts,
            max_attempts = action.max_attempts,
            error = %failure,
            "Delivery failed, retry in {:?}",
            delay
        );
        crate::metrics::record_delivery(&action.action_name, "retry");
        report.retried += 1;

        if let Some(slot) = self.queue.lock().get_mut(&action.seq) {
            *slot = action;
        }
    }

    async fn persist_counters(&self) {
        let counters = SyncCounters {
            total_queued: self.total_queued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        };
        if let Err(e) = self.store.save_counters(&counters).await {
            warn!(error = %e, "Failed to persist sync counters");
            crate::metrics::record_queue_error("save_counters");
        }
    }

    fn publish_stats(&self) {
        let stats = self.get_stats();
        crate::metrics::set_sync_pending(stats.pending);
        crate::metrics::set_sync_dead_letters(stats.dead_lettered);
        self.events.emit(&SyncEvent::StatsChanged(stats));
    }

    /// Start the flush timer and flush automatically on reconnect.
    ///
    /// No-op if already started.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return;
        }

        let was_online = Arc::new(AtomicBool::new(self.connection.is_online()));
        let wake = self.wake.clone();
        let connection_listener = self.connection.subscribe(move |snapshot| {
            let previously = was_online.swap(snapshot.online, Ordering::AcqRel);
            if snapshot.online && !previously {
                wake.notify_one();
            }
        });

        let weak: Weak<Self> = Arc::downgrade(self);
        let wake = self.wake.clone();
        let interval = crate::clock::timer_period(self.config.flush_interval, "sync");
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = wake.notified() => {
                        debug!("Connectivity regained, flushing");
                    }
                }
                let Some(manager) = weak.upgrade() else { break };
                if let Err(e) = manager.sync_all().await {
                    warn!(error = %e, "Background flush failed");
                }
            }
        });

        *worker = Some(FlushWorker {
            handle,
            connection_listener,
        });
        info!(interval_ms = interval.as_millis() as u64, "Sync manager started");
    }

    pub fn stop(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.handle.abort();
            self.connection.unsubscribe(worker.connection_listener);
            info!("Sync manager stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(|w| !w.handle.is_finished())
    }

    pub fn dispose(&self) {
        self.stop();
        self.events.clear();
    }

    /// Close the underlying queue store.
    pub async fn close(&self) {
        self.dispose();
        self.store.close().await;
    }
}

impl Drop for SyncManager {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.handle.abort();
            self.connection.unsubscribe(worker.connection_listener);
        }
    }
}

/// Why a single delivery attempt failed.
#[derive(Debug, thiserror::Error)]
enum DeliveryFailure {
    #[error("circuit '{name}' open (retry in {retry_after:?})")]
    CircuitOpen { name: String, retry_after: Duration },

    #[error(transparent)]
    Request(RequestError),
}

impl DeliveryFailure {
    fn is_circuit_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } => true,
            Self::Request(e) => e.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::connection::{NetworkSignals, QualityThresholds, StaticNetworkSource};
    use crate::resilience::circuit_breaker::CircuitConfig;
    use crate::resilience::retry::RetryOptions;
    use std::sync::atomic::AtomicUsize;

    struct Harness {
        manager: Arc<SyncManager>,
        network: Arc<StaticNetworkSource>,
        connection: Arc<ConnectionMonitor>,
        circuits: Arc<CircuitRegistry>,
        clock: Arc<ManualClock>,
    }

    async fn harness_with(config: SyncConfig, store: Arc<dyn QueueStore>) -> Harness {
        let network = Arc::new(StaticNetworkSource::new(NetworkSignals::default()));
        let connection = Arc::new(ConnectionMonitor::new(
            network.clone(),
            QualityThresholds::default(),
            RetryOptions::default(),
        ));
        let clock = Arc::new(ManualClock::new());
        let circuits = Arc::new(CircuitRegistry::with_clock(CircuitConfig::default(), clock.clone()));
        let manager = SyncManager::open_with_clock(config, store, connection.clone(), circuits.clone(), clock.clone())
            .await
            .unwrap();
        Harness {
            manager: Arc::new(manager),
            network,
            connection,
            circuits,
            clock,
        }
    }

    async fn harness() -> Harness {
        harness_with(test_config(), Arc::new(MemoryQueueStore::new())).await
    }

    fn test_config() -> SyncConfig {
        SyncConfig {
            max_attempts: 3,
            backoff: BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1)).without_jitter(),
            flush_interval: Duration::from_secs(30),
        }
    }

    /// Records delivery order; fails with `fail_with` when set.
    struct Recorder {
        delivered: Mutex<Vec<String>>,
        calls: AtomicUsize,
        fail_with: Mutex<Option<RequestError>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                delivered: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                fail_with: Mutex::new(None),
            })
        }

        fn failing(err: RequestError) -> Arc<Self> {
            let r = Self::new();
            *r.fail_with.lock() = Some(err);
            r
        }
    }

    #[async_trait::async_trait]
    impl ActionHandler for Recorder {
        async fn deliver(&self, action: &PendingAction) -> std::result::Result<(), RequestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.fail_with.lock().clone() {
                return Err(err);
            }
            self.delivered.lock().push(String::from_utf8_lossy(&action.payload).into_owned());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_enqueue_then_flush_in_order() {
        let h = harness().await;
        let recorder = Recorder::new();
        h.manager.register_handler("crew.update", recorder.clone());

        h.manager.enqueue("crew.update", b"A".to_vec()).await.unwrap();
        h.manager.enqueue("crew.update", b"B".to_vec()).await.unwrap();
        assert_eq!(h.manager.get_stats().pending, 2);

        let outcome = h.manager.sync_all().await.unwrap();
        assert_eq!(outcome.report().unwrap().delivered.len(), 2);
        assert_eq!(*recorder.delivered.lock(), vec!["A", "B"]);

        let stats = h.manager.get_stats();
        assert_eq!(stats.total_queued, 2);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_offline_flush_is_skipped() {
        let h = harness().await;
        h.manager.register_handler("crew.update", Recorder::new());
        h.manager.enqueue("crew.update", b"A".to_vec()).await.unwrap();

        h.network.set_online(false);
        h.connection.refresh();
        let outcome = h.manager.sync_all().await.unwrap();
        assert_eq!(outcome, SyncOutcome::Skipped { reason: SkipReason::Offline });
        assert_eq!(h.manager.get_stats().pending, 1);
        assert!(!h.manager.get_network_status().is_online);
    }

    #[tokio::test]
    async fn test_retry_uses_backoff_then_dead_letters() {
        let h = harness().await;
        let recorder = Recorder::failing(RequestError::status(503, "unavailable"));
        h.manager.register_handler("audit.submit", recorder.clone());
        let id = h.manager.enqueue("audit.submit", b"x".to_vec()).await.unwrap();

        let report = h.manager.sync_all().await.unwrap().report().cloned().unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(h.manager.pending_actions()[0].attempts, 1);

        // Still in backoff (100ms)
        let report = h.manager.sync_all().await.unwrap().report().cloned().unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);

        h.clock.advance(Duration::from_millis(100));
        h.manager.sync_all().await.unwrap();
        h.clock.advance(Duration::from_millis(200));
        let report = h.manager.sync_all().await.unwrap().report().cloned().unwrap();
        assert_eq!(report.dead_lettered, vec![id.clone()]);
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 3);

        // Never retried again
        h.clock.advance(Duration::from_secs(60));
        h.manager.sync_all().await.unwrap();
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 3);

        let stats = h.manager.get_stats();
        assert_eq!((stats.failed, stats.dead_lettered, stats.pending), (1, 1, 0));
        let dead = h.manager.dead_letters();
        assert_eq!(dead[0].attempts, 3);
        assert_eq!(dead[0].status, ActionStatus::DeadLetter);
    }

    #[tokio::test]
    async fn test_permanent_failure_dead_letters_immediately() {
        let h = harness().await;
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        h.manager.subscribe(move |event| {
            if let SyncEvent::DeadLettered(notice) = event {
                e.lock().push(notice.clone());
            }
        });
        h.manager
            .register_handler("crew.update", Recorder::failing(RequestError::status(422, "invalid")));
        h.manager.enqueue("crew.update", b"A".to_vec()).await.unwrap();

        h.manager.sync_all().await.unwrap();
        let notices = events.lock().clone();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].attempts, 1);
        assert!(notices[0].last_error.as_deref().unwrap().contains("422"));
        // 4xx is not an endpoint failure
        assert_eq!(h.circuits.stats("crew.update").consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_rest_of_endpoint() {
        let config = SyncConfig {
            max_attempts: 10,
            ..test_config()
        };
        let h = harness_with(config, Arc::new(MemoryQueueStore::new())).await;
        let failing = Recorder::failing(RequestError::Network("reset".into()));
        let healthy = Recorder::new();
        h.manager.register_handler("crew.update", failing.clone());
        h.manager.register_handler("audit.submit", healthy.clone());

        for i in 0..7 {
            h.manager.enqueue("crew.update", vec![b'0' + i]).await.unwrap();
        }
        h.manager.enqueue("audit.submit", b"audit".to_vec()).await.unwrap();

        let report = h.manager.sync_all().await.unwrap().report().cloned().unwrap();
        // default threshold is 5: the 5th failure trips, the last two are skipped
        assert_eq!(failing.calls.load(Ordering::SeqCst), 5);
        assert_eq!(report.retried, 5);
        assert_eq!(report.circuit_skipped, 2);
        assert_eq!(report.delivered.len(), 1);
        assert_eq!(*healthy.delivered.lock(), vec!["audit"]);

        let skipped: Vec<_> = h.manager.pending_actions().into_iter().filter(|a| a.attempts == 0).collect();
        assert_eq!(skipped.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_pending_action() {
        let h = harness().await;
        let id = h.manager.enqueue("crew.update", b"A".to_vec()).await.unwrap();
        h.manager.remove_pending_action(&id).await.unwrap();
        assert_eq!(h.manager.get_stats().pending, 0);
        assert!(matches!(
            h.manager.remove_pending_action(&id).await,
            Err(ResilienceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_in_flight_action_cannot_be_removed() {
        let h = harness().await;
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let entered = Mutex::new(Some(entered_tx));
        let release = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

        let handler = FnHandler::new(move |_action: PendingAction| {
            if let Some(tx) = entered.lock().take() {
                let _ = tx.send(());
            }
            let release = release.clone();
            async move {
                if let Some(rx) = release.lock().await.take() {
                    let _ = rx.await;
                }
                Ok(())
            }
        });
        h.manager.register_handler("doc.upload", Arc::new(handler));
        let id = h.manager.enqueue("doc.upload", b"pdf".to_vec()).await.unwrap();

        let manager = h.manager.clone();
        let flush = tokio::spawn(async move { manager.sync_all().await });
        entered_rx.await.unwrap();

        assert!(h.manager.is_syncing());
        assert!(matches!(
            h.manager.remove_pending_action(&id).await,
            Err(ResilienceError::ActionInFlight(_))
        ));
        assert_eq!(
            h.manager.sync_all().await.unwrap(),
            SyncOutcome::Skipped { reason: SkipReason::AlreadySyncing }
        );

        release_tx.send(()).unwrap();
        let outcome = flush.await.unwrap().unwrap();
        assert_eq!(outcome.report().unwrap().delivered, vec![id]);
        assert!(!h.manager.is_syncing());
    }

    #[tokio::test]
    async fn test_retry_and_discard_dead_letters() {
        let h = harness().await;
        let recorder = Recorder::failing(RequestError::status(400, "bad"));
        h.manager.register_handler("crew.update", recorder.clone());
        let a = h.manager.enqueue("crew.update", b"A".to_vec()).await.unwrap();
        let b = h.manager.enqueue("crew.update", b"B".to_vec()).await.unwrap();
        h.manager.sync_all().await.unwrap();
        assert_eq!(h.manager.get_stats().dead_lettered, 2);

        *recorder.fail_with.lock() = None;
        h.manager.retry_dead_letter(&a).await.unwrap();
        h.manager.discard_dead_letter(&b).await.unwrap();
        assert!(h.manager.discard_dead_letter(&b).await.is_err());

        h.manager.sync_all().await.unwrap();
        assert_eq!(*recorder.delivered.lock(), vec!["A"]);
        let stats = h.manager.get_stats();
        assert_eq!((stats.completed, stats.failed, stats.dead_lettered), (1, 2, 0));
    }

    #[tokio::test]
    async fn test_unhandled_actions_stay_queued() {
        let h = harness().await;
        h.manager.enqueue("unknown.op", b"?".to_vec()).await.unwrap();
        let report = h.manager.sync_all().await.unwrap().report().cloned().unwrap();
        assert_eq!(report.unhandled, 1);
        assert_eq!(h.manager.get_stats().pending, 1);
    }

    #[tokio::test]
    async fn test_recovery_from_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let ids = {
            let store = Arc::new(SqliteQueueStore::open(&path).await.unwrap());
            let h = harness_with(test_config(), store.clone()).await;
            let a = h.manager.enqueue("crew.update", b"A".to_vec()).await.unwrap();
            let b = h.manager.enqueue("crew.update", b"B".to_vec()).await.unwrap();
            h.manager.close().await;
            vec![a, b]
        };

        let store = Arc::new(SqliteQueueStore::open(&path).await.unwrap());
        let h = harness_with(test_config(), store).await;
        let recovered: Vec<_> = h.manager.pending_actions().into_iter().map(|a| a.id).collect();
        assert_eq!(recovered, ids);
        assert_eq!(h.manager.get_stats().total_queued, 2);

        let recorder = Recorder::new();
        h.manager.register_handler("crew.update", recorder.clone());
        let c = h.manager.enqueue("crew.update", b"C".to_vec()).await.unwrap();
        h.manager.sync_all().await.unwrap();
        assert_eq!(*recorder.delivered.lock(), vec!["A", "B", "C"]);
        assert!(!ids.contains(&c));
    }

    #[tokio::test]
    async fn test_in_flight_records_are_requeued_on_open() {
        let store = Arc::new(MemoryQueueStore::new());
        let mut action = PendingAction::new(4, "crew.update", b"A".to_vec(), 0, 5);
        action.status = ActionStatus::InFlight;
        store.insert(&action).await.unwrap();

        let h = harness_with(test_config(), store.clone()).await;
        assert_eq!(h.manager.pending_actions()[0].status, ActionStatus::Queued);
        assert_eq!(store.load_all().await.unwrap()[0].status, ActionStatus::Queued);

        let id = h.manager.enqueue("crew.update", b"B".to_vec()).await.unwrap();
        let seqs: Vec<_> = h.manager.pending_actions().iter().map(|a| (a.seq, a.id.clone())).collect();
        assert_eq!(seqs[1], (5, id));
    }

    #[tokio::test]
    async fn test_interrupted_delivery_is_recovered_on_open() {
        let store = Arc::new(MemoryQueueStore::new());
        let h = harness_with(test_config(), store.clone()).await;
        let started = Arc::new(Notify::new());
        let signal = started.clone();
        h.manager.register_handler(
            "crew.update",
            Arc::new(FnHandler::new(move |_action: PendingAction| {
                signal.notify_one();
                std::future::pending::<std::result::Result<(), RequestError>>()
            })),
        );
        h.manager.enqueue("crew.update", b"A".to_vec()).await.unwrap();

        let manager = h.manager.clone();
        let flush = tokio::spawn(async move { manager.sync_all().await });
        started.notified().await;
        assert_eq!(store.load_all().await.unwrap()[0].status, ActionStatus::InFlight);

        // Simulate a crash mid-delivery
        flush.abort();
        let _ = flush.await;
        drop(h);

        let reopened = harness_with(test_config(), store.clone()).await;
        let pending = reopened.manager.pending_actions();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, ActionStatus::Queued);
        assert_eq!(pending[0].attempts, 0);
        assert_eq!(store.load_all().await.unwrap()[0].status, ActionStatus::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_triggers_flush() {
        let h = harness().await;
        let recorder = Recorder::new();
        h.manager.register_handler("crew.update", recorder.clone());

        h.network.set_online(false);
        h.connection.refresh();
        h.manager.start();
        h.manager.start();
        assert!(h.manager.is_running());
        h.manager.enqueue("crew.update", b"A".to_vec()).await.unwrap();

        // First timer tick happens immediately but we are offline
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(recorder.delivered.lock().is_empty());

        h.network.set_online(true);
        h.connection.refresh();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*recorder.delivered.lock(), vec!["A"]);

        h.manager.stop();
        assert!(!h.manager.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_periodically() {
        let h = harness().await;
        let recorder = Recorder::new();
        h.manager.register_handler("crew.update", recorder.clone());
        h.manager.start();
        tokio::time::sleep(Duration::from_secs(1)).await;

        h.manager.enqueue("crew.update", b"A".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(*recorder.delivered.lock(), vec!["A"]);
        h.manager.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_flush_interval_still_flushes() {
        let config = SyncConfig {
            flush_interval: Duration::ZERO,
            ..test_config()
        };
        let h = harness_with(config, Arc::new(MemoryQueueStore::new())).await;
        let recorder = Recorder::new();
        h.manager.register_handler("crew.update", recorder.clone());
        h.manager.start();
        tokio::time::sleep(Duration::from_millis(5)).await;

        h.manager.enqueue("crew.update", b"A".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.manager.is_running());
        assert_eq!(*recorder.delivered.lock(), vec!["A"]);
        h.manager.dispose();
    }
}
