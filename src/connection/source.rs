// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Where network readings come from.
//!
//! The host runtime owns the platform APIs; it pushes readings into a
//! [`WatchNetworkSource`]. Tests use [`StaticNetworkSource`].

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

use super::quality::NetworkSignals;

/// Narrow capability interface over the platform network APIs.
pub trait NetworkSignalSource: Send + Sync + 'static {
    /// Current readings. Must not block.
    fn read(&self) -> NetworkSignals;

    /// Change stream, if the source can push updates.
    fn changes(&self) -> Option<watch::Receiver<NetworkSignals>> {
        None
    }
}

/// Adapter fed by the host through a watch channel.
#[derive(Debug)]
pub struct WatchNetworkSource {
    tx: watch::Sender<NetworkSignals>,
}

impl WatchNetworkSource {
    #[must_use]
    pub fn new(initial: NetworkSignals) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Publish new readings. Subscribers only wake if something changed.
    pub fn publish(&self, signals: NetworkSignals) {
        self.tx.send_if_modified(|current| {
            if *current == signals {
                false
            } else {
                *current = signals;
                true
            }
        });
    }

    pub fn set_online(&self, online: bool) {
        let mut signals = self.read();
        signals.online = online;
        self.publish(signals);
    }
}

impl NetworkSignalSource for WatchNetworkSource {
    fn read(&self) -> NetworkSignals {
        self.tx.borrow().clone()
    }

    fn changes(&self) -> Option<watch::Receiver<NetworkSignals>> {
        Some(self.tx.subscribe())
    }
}

/// Deterministic fake: fixed readings, changed only by the test.
#[derive(Debug, Default)]
pub struct StaticNetworkSource {
    signals: RwLock<NetworkSignals>,
    reads: AtomicU64,
}

impl StaticNetworkSource {
    #[must_use]
    pub fn new(signals: NetworkSignals) -> Self {
        Self {
            signals: RwLock::new(signals),
            reads: AtomicU64::new(0),
        }
    }

    pub fn set(&self, signals: NetworkSignals) {
        *self.signals.write() = signals;
    }

    pub fn set_online(&self, online: bool) {
        self.signals.write().online = online;
    }

    #[must_use]
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl NetworkSignalSource for StaticNetworkSource {
    fn read(&self) -> NetworkSignals {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.signals.read().clone()
    }
}
