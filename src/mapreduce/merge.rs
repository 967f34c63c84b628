// SPDX-License-Identifier: GPL-3.0-or-later

//! Balanced k-way merge over the temp stores' sorted cursors (spec §3
//! "Merge line", §4.8 step 6 "Reduce"): a min-heap seeded with each
//! store's first record, repeatedly popping the smallest key and
//! re-seeding from the store it came from.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::temp_store::TempStore;

struct MergeLine<'a> {
    key: &'a [u8],
    value: &'a [u8],
    store_idx: usize,
}

impl PartialEq for MergeLine<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.store_idx == other.store_idx
    }
}
impl Eq for MergeLine<'_> {}

impl Ord for MergeLine<'_> {
    /// Reversed so `BinaryHeap` (a max-heap) behaves as the min-heap spec
    /// §3 calls for; ties break by store index, "not observable to the
    /// reducer" but kept deterministic.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key.cmp(self.key).then_with(|| other.store_idx.cmp(&self.store_idx))
    }
}
impl PartialOrd for MergeLine<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One reduce group: all blobs (one per contributing store) sharing `key`.
pub struct ReduceGroup {
    pub key: Vec<u8>,
    pub blobs: Vec<Vec<u8>>,
}

/// Walks every store's cursor in lockstep, grouping consecutive equal keys
/// across stores, and calls `deliver` once per group in ascending key
/// order. Stops early (without error) if `deliver` returns `false` for a
/// group — this is how the reduce phase's `aborted` short-circuit (spec
/// §4.8 step 6) reaches the merge loop.
pub fn merge_and_deliver(stores: &[TempStore], mut deliver: impl FnMut(ReduceGroup) -> bool) {
    let mut cursors: Vec<_> = stores.iter().map(TempStore::cursor).collect();
    let mut heap: BinaryHeap<MergeLine<'_>> = BinaryHeap::new();
    for (idx, cursor) in cursors.iter_mut().enumerate() {
        if let Some((key, value)) = cursor.next() {
            heap.push(MergeLine { key, value, store_idx: idx });
        }
    }

    let mut pending_key: Option<Vec<u8>> = None;
    let mut pending_blobs: Vec<Vec<u8>> = Vec::new();

    while let Some(line) = heap.pop() {
        let store_idx = line.store_idx;
        match &pending_key {
            Some(k) if k.as_slice() == line.key => pending_blobs.push(line.value.to_vec()),
            _ => {
                if let Some(key) = pending_key.take() {
                    let group = ReduceGroup { key, blobs: std::mem::take(&mut pending_blobs) };
                    if !deliver(group) {
                        return;
                    }
                }
                pending_key = Some(line.key.to_vec());
                pending_blobs.push(line.value.to_vec());
            },
        }
        if let Some((key, value)) = cursors[store_idx].next() {
            heap.push(MergeLine { key, value, store_idx });
        }
    }

    if let Some(key) = pending_key.take() {
        let group = ReduceGroup { key, blobs: pending_blobs };
        deliver(group);
    }
}
