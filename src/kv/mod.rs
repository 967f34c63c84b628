// SPDX-License-Identifier: GPL-3.0-or-later

//! The storage boundary (spec §6 "Out of scope... consumed through a
//! uniform operation/cursor interface"). The persistent hash/tree/grass
//! engines themselves are external collaborators; this crate only defines
//! the [`Database`]/[`Cursor`] capability traits they must satisfy and ships
//! one reference in-memory implementation ([`memory::MemoryDatabase`]) used
//! by the demo binary, the MapReduce temp stores, and the test suite.
//!
//! Grounded on the teacher's trait-over-opaque-representation style
//! (`models::common::BasicHeaderSegment`): a small capability trait that
//! hides the concrete wire/storage representation behind a handful of
//! methods, rather than one god object.

pub mod memory;

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::KtError;

/// How two keys order against each other. The MapReduce engine "inherits"
/// this from the source database (spec §4.8 "Prepare") so its temp stores
/// spill in the same order the reducer expects to see.
pub trait Comparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Plain byte-lexicographic order: the default comparator spec §3 assumes
/// when nothing else is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalComparator;

impl Comparator for LexicalComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// One key surfaced by `match_prefix`/`match_regex`/`match_similar`,
/// carrying the "order" field the remote client preserves across the wire
/// (spec §4.7) so result ordering from the server is not lost to a client
/// that re-sorts alphabetically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchHit {
    pub key: Vec<u8>,
    pub order: u32,
}

/// A record's remaining time-to-live. `Duration::MAX`-style "no expiry" is
/// represented as `None` to keep the common case branch-free.
pub type Expiry = Option<std::time::Duration>;

/// The uniform KV operation surface the RPC layer, the binary bulk
/// dispatcher, and the MapReduce engine all drive (spec §6). Every method
/// that can fail for a reason a caller should branch on returns
/// `Result<_, KtError>`; callers that only care about success/failure can
/// match `KtError::NoRecord` / `KtError::Logic` as appropriate.
pub trait Database: Send + Sync {
    fn comparator(&self) -> Arc<dyn Comparator>;

    fn get(&self, key: &[u8]) -> Result<Vec<u8>, KtError>;

    fn set(&self, key: &[u8], value: &[u8], xt: Expiry) -> Result<(), KtError>;

    /// Fails with `KtError::Logic` ("duplicate record") if `key` exists.
    fn add(&self, key: &[u8], value: &[u8], xt: Expiry) -> Result<(), KtError>;

    /// Fails with `KtError::NoRecord` if `key` does not exist.
    fn replace(&self, key: &[u8], value: &[u8], xt: Expiry) -> Result<(), KtError>;

    /// Appends `value` to the existing record, creating it if absent.
    fn append(&self, key: &[u8], value: &[u8], xt: Expiry) -> Result<(), KtError>;

    /// Single-key compare-and-swap (spec §1 "transactional isolation...
    /// beyond a single compare-and-swap"). `old = None` requires absence;
    /// `new = None` removes the record. Mismatch is `KtError::Logic`
    /// ("logically inconsistent"), surfaced by RPC as 450.
    fn cas(&self, key: &[u8], old: Option<&[u8]>, new: Option<&[u8]>) -> Result<(), KtError>;

    fn remove(&self, key: &[u8]) -> Result<(), KtError>;

    /// Atomic get-then-remove.
    fn seize(&self, key: &[u8]) -> Result<Vec<u8>, KtError>;

    /// Adds `delta` to the big-endian i64 stored at `key` (creating it as
    /// `delta` if absent) and returns the new value.
    fn increment(&self, key: &[u8], delta: i64, xt: Expiry) -> Result<i64, KtError>;

    /// Same as `increment` but over the 16-byte fixed-point double format
    /// the remote client speaks (spec §4.7).
    fn increment_double(&self, key: &[u8], delta: f64, xt: Expiry) -> Result<f64, KtError>;

    /// Returns the stored value's size in bytes without copying it out.
    fn check(&self, key: &[u8]) -> Result<usize, KtError>;

    fn clear(&self) -> Result<(), KtError>;

    fn count(&self) -> u64;

    /// Approximate on-disk/in-memory footprint, in bytes.
    fn size(&self) -> u64;

    /// No-op pass-through for the in-memory reference implementation; a
    /// real backend wires this to its own flush-to-stable-storage call
    /// (spec §4.11 "synchronize").
    fn synchronize(&self) -> Result<(), KtError> {
        Ok(())
    }

    fn match_prefix(&self, prefix: &[u8], max: Option<usize>) -> Vec<MatchHit>;

    fn match_regex(&self, pattern: &str, max: Option<usize>) -> Result<Vec<MatchHit>, KtError>;

    /// Keys within `distance` edits of `origin` (Levenshtein distance over
    /// raw bytes).
    fn match_similar(&self, origin: &[u8], distance: u32, max: Option<usize>) -> Vec<MatchHit>;

    /// A single-cursor, comparator-ordered iterator over every record.
    /// Drives MapReduce's `XNOLOCK`/default map strategies (spec §4.8).
    fn iterate(&self) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>;

    /// Splits the key space into `threads` disjoint ranges and visits each
    /// concurrently, calling `visit` for every record. Drives MapReduce's
    /// `XPARAMAP` strategy (spec §4.8). The default implementation falls
    /// back to a single-threaded `iterate()` for backends that have no
    /// cheaper parallel decomposition.
    fn scan_parallel(&self, threads: usize, visit: &(dyn Fn(&[u8], &[u8]) + Send + Sync)) {
        let _ = threads;
        for (k, v) in self.iterate() {
            visit(&k, &v);
        }
    }

    /// Opens a cursor over this database (spec §4.7 "cursor operations").
    fn open_cursor(self: Arc<Self>) -> Box<dyn Cursor>;
}

/// Iterator position outcome shared by every step/jump operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorStep {
    Positioned { key: Vec<u8>, value: Vec<u8> },
    NoRecord,
}

/// A mutable position into a [`Database`]'s key space (spec §3 "Cursor",
/// §9 "cursor with jump/step/get/set/remove"). Server-side; the
/// server-assigned 63-bit cursor ID used on the wire (spec §4.7) lives one
/// layer up, in the RPC dispatcher's cursor table.
pub trait Cursor: Send {
    /// Positions at the first key >= `key` (or the very first record if
    /// `key` is `None`).
    fn jump(&mut self, key: Option<&[u8]>) -> CursorStep;

    /// Positions at the last key <= `key` (or the very last record if
    /// `key` is `None`). `KtError::NotImplemented` on backends that cannot
    /// scan backward (spec §7 "Not implemented: backward scans on
    /// unordered stores").
    fn jump_back(&mut self, key: Option<&[u8]>) -> Result<CursorStep, KtError>;

    fn step(&mut self) -> CursorStep;

    fn step_back(&mut self) -> Result<CursorStep, KtError>;

    fn get(&self) -> CursorStep;

    fn get_key(&self) -> Option<Vec<u8>>;

    fn get_value(&self) -> Option<Vec<u8>>;

    fn set_value(&mut self, value: &[u8]) -> Result<(), KtError>;

    fn remove(&mut self) -> Result<(), KtError>;

    /// Atomic get-then-remove at the current position, advancing to the
    /// next record.
    fn seize(&mut self) -> Result<(Vec<u8>, Vec<u8>), KtError>;
}
