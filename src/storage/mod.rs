// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage quota monitor.
//!
//! Polls a [`StorageSignalSource`] on an interval, caches the latest
//! [`StorageQuota`] and pushes every measurement to subscribers. Pressure
//! is only signalled: eviction happens when a caller invokes a
//! [`CacheEvictor`].

pub mod eviction;
pub mod pressure;
pub mod source;

use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::listeners::{ListenerId, Listeners};

pub use eviction::{CacheEvictor, DirectoryCacheEvictor, EvictionReport};
pub use pressure::{StoragePressure, StorageQuota, StorageThresholds};
pub use source::{DirectoryStorageSource, FixedStorageSource, StorageEstimate, StorageSignalSource};

pub struct StorageMonitor {
    source: Arc<dyn StorageSignalSource>,
    thresholds: StorageThresholds,
    latest: RwLock<StorageQuota>,
    listeners: Listeners<StorageQuota>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl StorageMonitor {
    pub fn new(source: Arc<dyn StorageSignalSource>, thresholds: StorageThresholds) -> Self {
        Self {
            source,
            thresholds,
            latest: RwLock::new(StorageQuota::empty()),
            listeners: Listeners::new(),
            poller: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn thresholds(&self) -> &StorageThresholds {
        &self.thresholds
    }

    /// Last measurement (all zeros before the first check).
    #[must_use]
    pub fn snapshot(&self) -> StorageQuota {
        *self.latest.read()
    }

    #[must_use]
    pub fn pressure(&self) -> StoragePressure {
        self.snapshot().pressure(&self.thresholds)
    }

    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&StorageQuota) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Measure now, update the cached snapshot and notify subscribers.
    pub async fn check_now(&self) -> Result<StorageQuota> {
        let estimate = match self.source.estimate().await {
            Ok(estimate) => estimate,
            Err(e) => {
                warn!(error = %e, "Storage estimate failed");
                crate::metrics::record_storage_check_error();
                return Err(e);
            }
        };
        let quota = StorageQuota::new(estimate.used_bytes, estimate.quota_bytes);
        let previous = std::mem::replace(&mut *self.latest.write(), quota);

        let before = previous.pressure(&self.thresholds);
        let after = quota.pressure(&self.thresholds);
        if after > before {
            warn!(
                usage_percent = quota.usage_percent,
                used = quota.used_bytes,
                quota = quota.quota_bytes,
                "{}",
                after.description()
            );
        } else if after < before {
            info!(usage_percent = quota.usage_percent, "Storage pressure eased to {}", after);
        } else {
            debug!(usage_percent = quota.usage_percent, "Storage checked");
        }
        crate::metrics::set_storage_usage_percent(quota.usage_percent);
        crate::metrics::set_storage_used_bytes(quota.used_bytes);

        self.listeners.emit(&quota);
        Ok(quota)
    }

    /// Begin polling every `interval` (first check immediately).
    ///
    /// Returns `false` if polling was already active.
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        let mut poller = self.poller.lock();
        if poller.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Storage monitor already running");
            return false;
        }

        let interval = crate::clock::timer_period(interval, "storage");
        let weak: Weak<Self> = Arc::downgrade(self);
        *poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(monitor) = weak.upgrade() else { break };
                // Errors are logged and counted inside check_now
                let _ = monitor.check_now().await;
            }
        }));
        info!(interval_ms = interval.as_millis() as u64, "Storage monitor started");
        true
    }

    pub fn stop(&self) {
        if let Some(handle) = self.poller.lock().take() {
            handle.abort();
            info!("Storage monitor stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.poller.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn dispose(&self) {
        self.stop();
        self.listeners.clear();
    }
}

impl Drop for StorageMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn monitor(source: Arc<FixedStorageSource>) -> Arc<StorageMonitor> {
        Arc::new(StorageMonitor::new(source, StorageThresholds::default()))
    }

    #[tokio::test]
    async fn test_check_now_updates_snapshot_and_notifies() {
        let source = Arc::new(FixedStorageSource::new(850, 1000));
        let m = monitor(source.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        m.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(m.snapshot(), StorageQuota::empty());
        let quota = m.check_now().await.unwrap();
        assert_eq!(quota.usage_percent, 85.0);
        assert_eq!(m.pressure(), StoragePressure::Low);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_check_keeps_last_snapshot() {
        let source = Arc::new(FixedStorageSource::new(100, 1000));
        let m = monitor(source.clone());
        m.check_now().await.unwrap();

        source.set_failure(Some("estimate unavailable"));
        assert!(m.check_now().await.is_err());
        assert_eq!(m.snapshot().used_bytes, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_runs_one_timer() {
        let source = Arc::new(FixedStorageSource::new(10, 100));
        let m = monitor(source.clone());

        assert!(m.start(Duration::from_secs(60)));
        assert!(!m.start(Duration::from_secs(60)));

        // ticks at 0s, 60s, 120s
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(source.reads(), 3);

        m.stop();
        assert!(!m.is_running());
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(source.reads(), 3);
        m.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_still_polls() {
        let source = Arc::new(FixedStorageSource::new(10, 100));
        let m = monitor(source.clone());

        assert!(m.start(Duration::ZERO));
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(m.is_running());
        assert!(source.reads() >= 2);
        assert_eq!(m.snapshot().used_bytes, 10);
        m.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let source = Arc::new(FixedStorageSource::new(10, 100));
        let m = monitor(source.clone());
        assert!(m.start(Duration::from_secs(5)));
        m.stop();
        assert!(m.start(Duration::from_secs(5)));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(m.is_running());
        assert!(source.reads() >= 1);
    }
}
