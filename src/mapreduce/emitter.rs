// SPDX-License-Identifier: GPL-3.0-or-later

//! The emitter cache (spec §3 "Emitter cache", §4.8 step 3): a sharded
//! multimap from emitted key to a sequence of varint-length-prefixed
//! values, flushed wholesale once its encoded size crosses the configured
//! limit.
//!
//! Grounded on [`crate::concurrency::slotted_mutex::SlottedMutex`]'s
//! hash-sharded locking idea, generalized from guarding an external record
//! space to owning the sharded data itself, since each shard here needs to
//! carry its own multimap rather than just a lock.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use super::temp_store::TempStore;
use crate::varint;

/// Number of independently-lockable shards (spec §9 "mod RLOCKSLOT
/// (256)").
const RLOCKSLOT: usize = 256;

pub type Shard = HashMap<Vec<u8>, Vec<u8>>;

/// A flushable snapshot of every shard's data, handed to the flusher once
/// the cache crosses its byte limit. Shards are disjoint by key (the hash
/// partition is deterministic), so no merge step is needed across them.
pub struct CacheSnapshot {
    pub shards: Vec<Shard>,
}

pub struct EmitterCache {
    shards: Vec<Mutex<Shard>>,
    byte_size: AtomicU64,
    limit_bytes: u64,
}

impl EmitterCache {
    pub fn new(limit_bytes: u64) -> Self {
        let shards = (0..RLOCKSLOT).map(|_| Mutex::new(Shard::new())).collect();
        EmitterCache { shards, byte_size: AtomicU64::new(0), limit_bytes }
    }

    fn shard_index(key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % RLOCKSLOT
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size.load(Ordering::Relaxed)
    }

    /// Appends `value`, length-prefixed as a varint, to `key`'s bucket.
    /// Returns a snapshot ready to flush if this emit pushed the cache over
    /// its limit (spec §3's "once total size exceeds the configured cache
    /// limit, the cache is flushed atomically... and a fresh empty cache
    /// replaces it"); the caller acquires every shard in order to do so,
    /// matching the slotted-mutex "lock-all" pattern.
    pub fn emit(&self, key: &[u8], value: &[u8]) -> Option<CacheSnapshot> {
        let prefixed_len = varint::encode_to_vec(value.len() as u64).len() + value.len();
        {
            let idx = Self::shard_index(key);
            let mut shard = self.shards[idx].lock();
            let entry = shard.entry(key.to_vec()).or_default();
            varint::encode(value.len() as u64, entry);
            entry.extend_from_slice(value);
        }
        let new_size = self.byte_size.fetch_add(prefixed_len as u64, Ordering::AcqRel) + prefixed_len as u64;
        if new_size < self.limit_bytes {
            return None;
        }

        // Re-check under full exclusion: another thread may have already
        // flushed between the fetch_add above and acquiring every slot.
        let mut guards: Vec<_> = self.shards.iter().map(|s| s.lock()).collect();
        if self.byte_size.load(Ordering::Acquire) < self.limit_bytes {
            return None;
        }
        let shards = guards.iter_mut().map(|g| std::mem::take(&mut **g)).collect();
        self.byte_size.store(0, Ordering::Release);
        Some(CacheSnapshot { shards })
    }

    /// Takes whatever remains in the cache regardless of the size
    /// threshold (spec §4.8 step 5's final flush at a phase boundary).
    pub fn drain(&self) -> CacheSnapshot {
        let mut guards: Vec<_> = self.shards.iter().map(|s| s.lock()).collect();
        let shards = guards.iter_mut().map(|g| std::mem::take(&mut **g)).collect();
        self.byte_size.store(0, Ordering::Release);
        CacheSnapshot { shards }
    }
}

fn apply_snapshot(store: &mut TempStore, snapshot: CacheSnapshot) {
    for shard in snapshot.shards {
        for (key, blob) in shard {
            store.append(&key, &blob);
        }
    }
}

/// Ties an [`EmitterCache`] to the job's temp-store set, round-robin
/// assigning each flushed snapshot to one store and optionally running
/// flushes on a dedicated pool (spec §4.8 "XPARAFLS... a bounded queue of
/// pending flushes; the emitter blocks (applies backpressure) once the
/// queue is full rather than growing it unbounded").
pub struct Emitter {
    cache: EmitterCache,
    stores: Arc<Vec<Mutex<TempStore>>>,
    dbclock: AtomicUsize,
    flush_tx: Option<Sender<(usize, CacheSnapshot)>>,
    flush_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Emitter {
    /// Flushes run inline, on whichever map thread triggers them.
    pub fn inline(cache_limit_bytes: u64, stores: Vec<TempStore>) -> Self {
        Emitter {
            cache: EmitterCache::new(cache_limit_bytes),
            stores: Arc::new(stores.into_iter().map(Mutex::new).collect()),
            dbclock: AtomicUsize::new(0),
            flush_tx: None,
            flush_handles: Mutex::new(Vec::new()),
        }
    }

    /// Flushes run on `flush_threads.min(dbnum)` dedicated background
    /// threads draining a bounded channel (spec §4.8 "XPARAFLS"). Call
    /// [`Self::finish_flushing`] once the map/midprocess phases are done
    /// emitting to join these threads back before the reduce phase reads
    /// the stores.
    pub fn with_parallel_flush(
        cache_limit_bytes: u64,
        stores: Vec<TempStore>,
        flush_threads: usize,
        dbnum: usize,
    ) -> Self {
        let stores = Arc::new(stores.into_iter().map(Mutex::new).collect::<Vec<_>>());
        let queue_cap = flush_threads.min(dbnum.max(1)).max(1);
        let (tx, rx) = crossbeam_channel::bounded::<(usize, CacheSnapshot)>(queue_cap);
        let mut handles = Vec::with_capacity(queue_cap);
        for _ in 0..queue_cap {
            let rx = rx.clone();
            let stores = stores.clone();
            handles.push(std::thread::spawn(move || {
                while let Ok((idx, snapshot)) = rx.recv() {
                    let mut store = stores[idx].lock();
                    apply_snapshot(&mut store, snapshot);
                }
            }));
        }
        Emitter {
            cache: EmitterCache::new(cache_limit_bytes),
            stores,
            dbclock: AtomicUsize::new(0),
            flush_tx: Some(tx),
            flush_handles: Mutex::new(handles),
        }
    }

    pub fn byte_size(&self) -> u64 {
        self.cache.byte_size()
    }

    /// Emits one key/value pair (spec §3 "Emitter cache"). Flushes the
    /// cache to a temp store, round-robin by a monotonic clock, whenever
    /// this call pushes it over the configured limit.
    pub fn emit(&self, key: &[u8], value: &[u8]) {
        if let Some(snapshot) = self.cache.emit(key, value) {
            self.flush(snapshot);
        }
    }

    /// Flushes whatever remains in the cache regardless of size (spec
    /// §4.8 step 5's final flush at a phase boundary).
    pub fn drain_final(&self) {
        let snapshot = self.cache.drain();
        if snapshot.shards.iter().any(|s| !s.is_empty()) {
            self.flush(snapshot);
        }
    }

    fn flush(&self, snapshot: CacheSnapshot) {
        let idx = self.dbclock.fetch_add(1, Ordering::Relaxed) % self.stores.len();
        match &self.flush_tx {
            Some(tx) => {
                // Backpressure by design: a full bounded channel blocks
                // the emitting thread rather than growing without limit.
                let _ = tx.send((idx, snapshot));
            },
            None => apply_snapshot(&mut self.stores[idx].lock(), snapshot),
        }
    }

    /// Closes the flush channel (if any), joins every flush worker, and
    /// returns the temp stores ready for the reduce phase's merge.
    pub fn finish_flushing(self) -> Vec<TempStore> {
        drop(self.flush_tx);
        for handle in self.flush_handles.into_inner() {
            let _ = handle.join();
        }
        match Arc::try_unwrap(self.stores) {
            Ok(stores) => stores.into_iter().map(Mutex::into_inner).collect(),
            Err(_) => unreachable!("every flush worker joined and dropped its store handle above"),
        }
    }
}
