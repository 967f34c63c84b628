// SPDX-License-Identifier: GPL-3.0-or-later

//! A fixed-size array of mutexes, each guarding a disjoint slice of a
//! record space so concurrent writers to different keys don't serialize on
//! one global lock, while an operation that must see the whole space (a
//! full scan, `clear`, `synchronize`) can still take every slot in a fixed
//! order and get a consistent snapshot.
//!
//! This generalizes the bounded-channel-as-semaphore idiom the teacher uses
//! to cap in-flight work (`TPool::submit_job`) into a fixed pool of
//! independently lockable slots instead of a single counting gate.

use std::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;

use parking_lot::{Mutex, MutexGuard};

pub struct SlottedMutex {
    slots: Vec<Mutex<()>>,
}

impl SlottedMutex {
    pub fn new(slot_count: usize) -> Self {
        assert!(slot_count > 0, "SlottedMutex needs at least one slot");
        let slots = (0..slot_count).map(|_| Mutex::new(())).collect();
        SlottedMutex { slots }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn index_for<K: Hash>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.slots.len()
    }

    /// Lock the single slot that owns `key`.
    pub fn lock<K: Hash>(&self, key: &K) -> MutexGuard<'_, ()> {
        self.slots[self.index_for(key)].lock()
    }

    /// Lock every slot, in ascending order, for an operation that needs a
    /// consistent view of the whole record space. Holding the returned
    /// guards blocks all per-key writers until they are dropped.
    pub fn lock_all(&self) -> Vec<MutexGuard<'_, ()>> {
        self.slots.iter().map(|m| m.lock()).collect()
    }
}
