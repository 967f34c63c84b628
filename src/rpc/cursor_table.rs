// SPDX-License-Identifier: GPL-3.0-or-later

//! Server-side cursor registry backing the RPC `cur_*` procedures (spec
//! §4.7 "Cursor objects are identified by server-assigned 63-bit IDs
//! derived from client pointer + timestamp + a monotonic counter to avoid
//! collisions across concurrent clients"). Grounded on
//! `concurrency::condition_map::ConditionMap`'s `DashMap`-of-handle
//! bookkeeping, generalized to `Box<dyn Cursor>` instead of condition
//! slots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::kv::Cursor;

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Allocates a new 63-bit cursor ID: high bits from the current time, low
/// bits from a monotonic counter, top bit cleared so it fits a signed
/// 64-bit wire field without sign ambiguity.
fn next_cursor_id() -> u64 {
    let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
    let nanos =
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or_default();
    (nanos.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ seq) & 0x7FFF_FFFF_FFFF_FFFF
}

/// Registry of live cursors, keyed by the ID handed back to the RPC
/// caller. Cursors never outlive the `Database` they were opened over
/// since `open_cursor` takes `Arc<Self>`.
#[derive(Default)]
pub struct CursorTable {
    cursors: DashMap<u64, Mutex<Box<dyn Cursor>>>,
}

impl CursorTable {
    pub fn new() -> Self {
        CursorTable::default()
    }

    pub fn insert(&self, cursor: Box<dyn Cursor>) -> u64 {
        let id = next_cursor_id();
        self.cursors.insert(id, Mutex::new(cursor));
        id
    }

    pub fn with_cursor<R>(&self, id: u64, f: impl FnOnce(&mut dyn Cursor) -> R) -> Option<R> {
        let entry = self.cursors.get(&id)?;
        let mut guard = entry.lock();
        Some(f(guard.as_mut()))
    }

    pub fn remove(&self, id: u64) -> bool {
        self.cursors.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }
}
