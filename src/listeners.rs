// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Explicit observer list with unsubscribe tokens.
//!
//! Every subsystem that pushes snapshots to the UI layer owns one
//! [`Listeners`] arena. Callbacks run synchronously on the emitting task,
//! outside the internal lock, so a callback may subscribe or unsubscribe
//! without deadlocking.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Token returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slots<T> {
    next_id: u64,
    entries: BTreeMap<u64, Callback<T>>,
}

pub struct Listeners<T> {
    slots: Mutex<Slots<T>>,
}

impl<T> Listeners<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                next_id: 1,
                entries: BTreeMap::new(),
            }),
        }
    }

    /// Register a callback. Ids are never reused.
    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut slots = self.slots.lock();
        let id = slots.next_id;
        slots.next_id += 1;
        slots.entries.insert(id, Arc::new(callback));
        ListenerId(id)
    }

    /// Returns `false` if the id was unknown or already removed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.slots.lock().entries.remove(&id.0).is_some()
    }

    /// Invoke every live listener in subscription order.
    pub fn emit(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self.slots.lock().entries.values().cloned().collect();
        for callback in callbacks {
            callback(value);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every listener (used by `dispose`).
    pub fn clear(&self) {
        self.slots.lock().entries.clear();
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}
