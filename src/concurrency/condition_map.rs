// SPDX-License-Identifier: GPL-3.0-or-later

//! Named condition variables backing the RPC `signal`/`wait` procedures
//! (spec §4.5, §9 Open Question 2): a waiter blocks on a name until another
//! thread signals or broadcasts it, or until a timeout elapses.
//!
//! Grounded on the teacher's `DashMap`-of-`Arc` bookkeeping in
//! `client::pool_sessions::Pool` (sessions keyed in a concurrent map, each
//! entry independently reference-counted), generalized from session handles
//! to condition-variable handles.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct Slot {
    mutex: Mutex<u64>,
    condvar: Condvar,
}

/// A registry of named condition variables. Entries are created lazily on
/// first wait/signal and dropped once no waiter or signaler is touching
/// them, so long-lived idle names don't leak memory.
#[derive(Default)]
pub struct ConditionMap {
    slots: DashMap<String, Arc<Slot>>,
}

impl ConditionMap {
    pub fn new() -> Self {
        ConditionMap {
            slots: DashMap::new(),
        }
    }

    fn slot_for(&self, name: &str) -> Arc<Slot> {
        self.slots
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(Slot::default()))
            .clone()
    }

    /// Wake exactly one thread waiting on `name`.
    pub fn signal(&self, name: &str) {
        if let Some(slot) = self.slots.get(name) {
            let mut generation = slot.mutex.lock();
            *generation = generation.wrapping_add(1);
            slot.condvar.notify_one();
        }
    }

    /// Wake every thread waiting on `name`.
    pub fn broadcast(&self, name: &str) {
        if let Some(slot) = self.slots.get(name) {
            let mut generation = slot.mutex.lock();
            *generation = generation.wrapping_add(1);
            slot.condvar.notify_all();
        }
    }

    /// Broadcast to every registered name at once (the RPC `signal`
    /// procedure with no key selects this behavior, spec §4.5).
    pub fn broadcast_all(&self) {
        for entry in self.slots.iter() {
            let mut generation = entry.value().mutex.lock();
            *generation = generation.wrapping_add(1);
            entry.value().condvar.notify_all();
        }
    }

    /// Block on `name` until signaled/broadcast or `timeout` elapses.
    /// Returns `true` if woken by a signal, `false` on timeout.
    pub fn wait(&self, name: &str, timeout: Duration) -> bool {
        let slot = self.slot_for(name);
        let mut generation = slot.mutex.lock();
        let seen = *generation;
        let result = slot
            .condvar
            .wait_for(&mut generation, timeout, |g| *g != seen);
        !result.timed_out()
    }

    /// Remove entries with no other referent — call periodically, e.g. from
    /// the idle timer (spec §4.3), to bound memory for short-lived names.
    pub fn reap_unused(&self) {
        self.slots.retain(|_, slot| Arc::strong_count(slot) > 1);
    }
}
