// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection quality monitor.
//!
//! Turns raw network readings into a stable [`Quality`] tier and an
//! [`AdaptiveSettings`] table that callers consult synchronously. The only
//! awaiting operation here is [`ConnectionMonitor::fetch_with_retry`].
//!
//! ```text
//! NetworkSignalSource ──(read / watch stream)──▶ apply() ──▶ snapshot
//!                                                     └──▶ listeners (on change)
//! ```

pub mod quality;
pub mod source;

use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{RequestError, ResilienceError, Result};
use crate::listeners::{ListenerId, Listeners};
use crate::metrics::LatencyTimer;
use crate::resilience::retry::{retry_transient, RetryOptions};

pub use quality::{
    derive_quality, AdaptiveSettings, ConnectionSnapshot, EffectiveType, ImageQuality, NetworkSignals, Quality,
    QualityThresholds,
};
pub use source::{NetworkSignalSource, StaticNetworkSource, WatchNetworkSource};

pub struct ConnectionMonitor {
    source: Arc<dyn NetworkSignalSource>,
    thresholds: QualityThresholds,
    retry: RetryOptions,
    snapshot: RwLock<ConnectionSnapshot>,
    listeners: Listeners<ConnectionSnapshot>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionMonitor {
    /// Build a monitor and take the cold-start reading.
    pub fn new(source: Arc<dyn NetworkSignalSource>, thresholds: QualityThresholds, retry: RetryOptions) -> Self {
        let snapshot = ConnectionSnapshot::from_signals(&source.read(), &thresholds);
        crate::metrics::set_connection_quality(snapshot.quality as u8);
        Self {
            source,
            thresholds,
            retry,
            snapshot: RwLock::new(snapshot),
            listeners: Listeners::new(),
            watcher: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot.read().clone()
    }

    #[must_use]
    pub fn quality(&self) -> Quality {
        self.snapshot.read().quality
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.snapshot.read().online
    }

    #[must_use]
    pub fn adaptive_settings(&self) -> AdaptiveSettings {
        self.snapshot.read().adaptive_settings()
    }

    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ConnectionSnapshot) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Re-read the source and apply the result.
    pub fn refresh(&self) -> ConnectionSnapshot {
        let signals = self.source.read();
        self.apply(signals)
    }

    /// Recompute from `signals`. Listeners fire only when the snapshot changed.
    pub fn apply(&self, signals: NetworkSignals) -> ConnectionSnapshot {
        let next = ConnectionSnapshot::from_signals(&signals, &self.thresholds);
        let previous = {
            let mut current = self.snapshot.write();
            if *current == next {
                return next;
            }
            std::mem::replace(&mut *current, next.clone())
        };

        if previous.quality != next.quality {
            if next.quality == Quality::Offline {
                warn!(from = %previous.quality, "Connection lost");
            } else {
                info!(from = %previous.quality, to = %next.quality, rtt_ms = next.rtt_ms, "Connection quality changed");
            }
        } else {
            debug!(rtt_ms = next.rtt_ms, downlink = next.downlink_mbps, "Network signals updated");
        }
        crate::metrics::set_connection_quality(next.quality as u8);
        crate::metrics::set_connection_rtt(next.rtt_ms);

        self.listeners.emit(&next);
        next
    }

    /// Follow the source's change stream. No-op if already following or
    /// if the source cannot push.
    pub fn start(self: &Arc<Self>) {
        let mut watcher = self.watcher.lock();
        if watcher.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        self.refresh();

        let Some(mut rx) = self.source.changes() else {
            debug!("Network source has no change stream, relying on refresh()");
            return;
        };
        let weak: Weak<Self> = Arc::downgrade(self);
        *watcher = Some(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let signals = rx.borrow_and_update().clone();
                match weak.upgrade() {
                    Some(monitor) => {
                        monitor.apply(signals);
                    }
                    None => break,
                }
            }
            debug!("Network watcher exited");
        }));
        info!("Connection monitor started");
    }

    pub fn stop(&self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
            info!("Connection monitor stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.watcher.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn dispose(&self) {
        self.stop();
        self.listeners.clear();
    }

    /// Run a backend request with the adaptive timeout and exponential
    /// backoff. `None` uses the configured retry options.
    ///
    /// Fails fast with a transient error while offline.
    pub async fn fetch_with_retry<F, Fut, T>(
        &self,
        operation_name: &str,
        options: Option<RetryOptions>,
        request: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, RequestError>>,
    {
        if !self.is_online() {
            crate::metrics::record_request(operation_name, "offline");
            return Err(ResilienceError::TransientNetwork(format!(
                "{} skipped: device is offline",
                operation_name
            )));
        }
        let options = options.unwrap_or(self.retry);
        let timeout = self.adaptive_settings().request_timeout;
        let _timer = LatencyTimer::new(operation_name);
        retry_transient(operation_name, &options, timeout, request)
            .await
            .map_err(ResilienceError::from)
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.get_mut().take() {
            handle.abort();
        }
    }
}
