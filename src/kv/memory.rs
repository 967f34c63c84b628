// SPDX-License-Identifier: GPL-3.0-or-later

//! An in-memory [`Database`] implementation: the reference backend used by
//! the demo binary, by MapReduce's in-memory temp store variant, and by the
//! test suite. Not one of the persistent hash/tree/grass engines the real
//! system ships (those are out of scope, spec §1) — this exists purely to
//! give the `Database`/`Cursor` traits a concrete, fully-working instance.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use regex::bytes::Regex;

use super::{Comparator, Cursor, CursorStep, Database, Expiry, LexicalComparator, MatchHit};
use crate::error::KtError;

#[derive(Clone)]
struct Record {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Record {
    fn is_live(&self) -> bool {
        match self.expires_at {
            Some(t) => Instant::now() < t,
            None => true,
        }
    }
}

/// `BTreeMap`-backed [`Database`]. Byte-lexicographic order, matching
/// [`LexicalComparator`], so iteration order is stable and MapReduce temp
/// stores built on top of it merge correctly.
pub struct MemoryDatabase {
    map: RwLock<BTreeMap<Vec<u8>, Record>>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        MemoryDatabase { map: RwLock::new(BTreeMap::new()) }
    }

    fn expiry_to_instant(xt: Expiry) -> Option<Instant> {
        xt.map(|d| Instant::now() + d)
    }
}

const DOUBLE_SCALE: i64 = 1_000_000_000_000;

fn encode_int(v: i64) -> Vec<u8> {
    v.to_be_bytes().to_vec()
}

fn decode_int(bytes: &[u8]) -> Result<i64, KtError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| KtError::Logic("stored value is not an 8-byte integer".into()))?;
    Ok(i64::from_be_bytes(arr))
}

fn encode_double(v: f64) -> Vec<u8> {
    let integral = v.trunc() as i64;
    let fractional = ((v.fract()) * DOUBLE_SCALE as f64).round() as i64;
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&integral.to_be_bytes());
    out.extend_from_slice(&fractional.to_be_bytes());
    out
}

fn decode_double(bytes: &[u8]) -> Result<f64, KtError> {
    if bytes.len() != 16 {
        return Err(KtError::Logic("stored value is not a 16-byte fixed-point double".into()));
    }
    let integral = i64::from_be_bytes(bytes[..8].try_into().expect("checked len"));
    let fractional = i64::from_be_bytes(bytes[8..].try_into().expect("checked len"));
    Ok(integral as f64 + fractional as f64 / DOUBLE_SCALE as f64)
}

fn levenshtein(a: &[u8], b: &[u8]) -> u32 {
    let mut prev: Vec<u32> = (0..=b.len() as u32).collect();
    let mut cur = vec![0u32; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        cur[0] = i as u32 + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

impl Database for MemoryDatabase {
    fn comparator(&self) -> Arc<dyn Comparator> {
        Arc::new(LexicalComparator)
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>, KtError> {
        let map = self.map.read();
        match map.get(key) {
            Some(r) if r.is_live() => Ok(r.value.clone()),
            _ => Err(KtError::NoRecord),
        }
    }

    fn set(&self, key: &[u8], value: &[u8], xt: Expiry) -> Result<(), KtError> {
        self.map.write().insert(
            key.to_vec(),
            Record { value: value.to_vec(), expires_at: Self::expiry_to_instant(xt) },
        );
        Ok(())
    }

    fn add(&self, key: &[u8], value: &[u8], xt: Expiry) -> Result<(), KtError> {
        let mut map = self.map.write();
        if map.get(key).is_some_and(Record::is_live) {
            return Err(KtError::Logic("duplicate record".into()));
        }
        map.insert(
            key.to_vec(),
            Record { value: value.to_vec(), expires_at: Self::expiry_to_instant(xt) },
        );
        Ok(())
    }

    fn replace(&self, key: &[u8], value: &[u8], xt: Expiry) -> Result<(), KtError> {
        let mut map = self.map.write();
        if !map.get(key).is_some_and(Record::is_live) {
            return Err(KtError::NoRecord);
        }
        map.insert(
            key.to_vec(),
            Record { value: value.to_vec(), expires_at: Self::expiry_to_instant(xt) },
        );
        Ok(())
    }

    fn append(&self, key: &[u8], value: &[u8], xt: Expiry) -> Result<(), KtError> {
        let mut map = self.map.write();
        let entry = map.entry(key.to_vec()).or_insert_with(|| Record { value: Vec::new(), expires_at: None });
        if !entry.is_live() {
            entry.value.clear();
        }
        entry.value.extend_from_slice(value);
        entry.expires_at = Self::expiry_to_instant(xt).or(entry.expires_at);
        Ok(())
    }

    fn cas(&self, key: &[u8], old: Option<&[u8]>, new: Option<&[u8]>) -> Result<(), KtError> {
        let mut map = self.map.write();
        let current = map.get(key).filter(|r| r.is_live()).map(|r| r.value.as_slice());
        if current != old {
            return Err(KtError::Logic("logically inconsistent compare-and-swap".into()));
        }
        match new {
            Some(v) => {
                map.insert(key.to_vec(), Record { value: v.to_vec(), expires_at: None });
            },
            None => {
                map.remove(key);
            },
        }
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<(), KtError> {
        let mut map = self.map.write();
        match map.remove(key) {
            Some(r) if r.is_live() => Ok(()),
            Some(_) => Err(KtError::NoRecord),
            None => Err(KtError::NoRecord),
        }
    }

    fn seize(&self, key: &[u8]) -> Result<Vec<u8>, KtError> {
        let mut map = self.map.write();
        match map.remove(key) {
            Some(r) if r.is_live() => Ok(r.value),
            _ => Err(KtError::NoRecord),
        }
    }

    fn increment(&self, key: &[u8], delta: i64, xt: Expiry) -> Result<i64, KtError> {
        let mut map = self.map.write();
        let new_val = match map.get(key).filter(|r| r.is_live()) {
            Some(r) => decode_int(&r.value)?.checked_add(delta).ok_or_else(|| KtError::Logic("integer overflow".into()))?,
            None => delta,
        };
        map.insert(
            key.to_vec(),
            Record { value: encode_int(new_val), expires_at: Self::expiry_to_instant(xt) },
        );
        Ok(new_val)
    }

    fn increment_double(&self, key: &[u8], delta: f64, xt: Expiry) -> Result<f64, KtError> {
        let mut map = self.map.write();
        let new_val = match map.get(key).filter(|r| r.is_live()) {
            Some(r) => decode_double(&r.value)? + delta,
            None => delta,
        };
        map.insert(
            key.to_vec(),
            Record { value: encode_double(new_val), expires_at: Self::expiry_to_instant(xt) },
        );
        Ok(new_val)
    }

    fn check(&self, key: &[u8]) -> Result<usize, KtError> {
        let map = self.map.read();
        match map.get(key).filter(|r| r.is_live()) {
            Some(r) => Ok(r.value.len()),
            None => Err(KtError::NoRecord),
        }
    }

    fn clear(&self) -> Result<(), KtError> {
        self.map.write().clear();
        Ok(())
    }

    fn count(&self) -> u64 {
        self.map.read().values().filter(|r| r.is_live()).count() as u64
    }

    fn size(&self) -> u64 {
        self.map
            .read()
            .iter()
            .filter(|(_, r)| r.is_live())
            .map(|(k, r)| (k.len() + r.value.len()) as u64)
            .sum()
    }

    fn match_prefix(&self, prefix: &[u8], max: Option<usize>) -> Vec<MatchHit> {
        let map = self.map.read();
        let mut hits = Vec::new();
        for (order, (k, r)) in map.range(prefix.to_vec()..).enumerate() {
            if !k.starts_with(prefix) {
                break;
            }
            if !r.is_live() {
                continue;
            }
            hits.push(MatchHit { key: k.clone(), order: order as u32 });
            if max.is_some_and(|m| hits.len() >= m) {
                break;
            }
        }
        hits
    }

    fn match_regex(&self, pattern: &str, max: Option<usize>) -> Result<Vec<MatchHit>, KtError> {
        let re =
            Regex::new(pattern).map_err(|e| KtError::Protocol(format!("invalid regex: {e}")))?;
        let map = self.map.read();
        let mut hits = Vec::new();
        for (order, (k, r)) in map.iter().enumerate() {
            if !r.is_live() || !re.is_match(k) {
                continue;
            }
            hits.push(MatchHit { key: k.clone(), order: order as u32 });
            if max.is_some_and(|m| hits.len() >= m) {
                break;
            }
        }
        Ok(hits)
    }

    fn match_similar(&self, origin: &[u8], distance: u32, max: Option<usize>) -> Vec<MatchHit> {
        let map = self.map.read();
        let mut hits = Vec::new();
        let mut order = 0u32;
        for (k, r) in map.iter() {
            if !r.is_live() {
                continue;
            }
            if levenshtein(origin, k) <= distance {
                hits.push(MatchHit { key: k.clone(), order });
                order += 1;
                if max.is_some_and(|m| hits.len() >= m) {
                    break;
                }
            }
        }
        hits
    }

    fn iterate(&self) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_> {
        let map = self.map.read();
        let snapshot: Vec<(Vec<u8>, Vec<u8>)> =
            map.iter().filter(|(_, r)| r.is_live()).map(|(k, r)| (k.clone(), r.value.clone())).collect();
        Box::new(snapshot.into_iter())
    }

    fn open_cursor(self: Arc<Self>) -> Box<dyn Cursor> {
        Box::new(MemoryCursor { db: self, position: None })
    }
}

/// A cursor over [`MemoryDatabase`]. Re-derives its position from the
/// current key on every step via `BTreeMap::range`, which is correct but
/// O(log n) per step rather than a true pointer walk — acceptable for the
/// reference backend; a persistent engine would give this a real iterator.
struct MemoryCursor {
    db: Arc<MemoryDatabase>,
    position: Option<Vec<u8>>,
}

impl MemoryCursor {
    fn snapshot_from(&self, key: &[u8]) -> CursorStep {
        let map = self.db.map.read();
        match map.range(key.to_vec()..).find(|(_, r)| r.is_live()) {
            Some((k, r)) => CursorStep::Positioned { key: k.clone(), value: r.value.clone() },
            None => CursorStep::NoRecord,
        }
    }

    fn snapshot_from_back(&self, key: &[u8]) -> CursorStep {
        let map = self.db.map.read();
        match map.range(..=key.to_vec()).rev().find(|(_, r)| r.is_live()) {
            Some((k, r)) => CursorStep::Positioned { key: k.clone(), value: r.value.clone() },
            None => CursorStep::NoRecord,
        }
    }
}

impl Cursor for MemoryCursor {
    fn jump(&mut self, key: Option<&[u8]>) -> CursorStep {
        let start = key.map(|k| k.to_vec()).unwrap_or_default();
        let step = self.snapshot_from(&start);
        self.position = match &step {
            CursorStep::Positioned { key, .. } => Some(key.clone()),
            CursorStep::NoRecord => None,
        };
        step
    }

    fn jump_back(&mut self, key: Option<&[u8]>) -> Result<CursorStep, KtError> {
        let step = match key {
            Some(k) => self.snapshot_from_back(k),
            None => {
                let map = self.db.map.read();
                match map.iter().rev().find(|(_, r)| r.is_live()) {
                    Some((k, r)) => CursorStep::Positioned { key: k.clone(), value: r.value.clone() },
                    None => CursorStep::NoRecord,
                }
            },
        };
        self.position = match &step {
            CursorStep::Positioned { key, .. } => Some(key.clone()),
            CursorStep::NoRecord => None,
        };
        Ok(step)
    }

    fn step(&mut self) -> CursorStep {
        use std::ops::Bound::{Excluded, Unbounded};

        let Some(cur) = self.position.clone() else {
            return CursorStep::NoRecord;
        };
        let map = self.db.map.read();
        match map.range((Excluded(cur), Unbounded)).find(|(_, r)| r.is_live()) {
            Some((k, r)) => {
                let step = CursorStep::Positioned { key: k.clone(), value: r.value.clone() };
                self.position = Some(k.clone());
                step
            },
            None => {
                self.position = None;
                CursorStep::NoRecord
            },
        }
    }

    fn step_back(&mut self) -> Result<CursorStep, KtError> {
        let Some(cur) = self.position.clone() else {
            return Ok(CursorStep::NoRecord);
        };
        let map = self.db.map.read();
        let step = match map.range(..cur).rev().find(|(_, r)| r.is_live()) {
            Some((k, r)) => CursorStep::Positioned { key: k.clone(), value: r.value.clone() },
            None => CursorStep::NoRecord,
        };
        drop(map);
        self.position = match &step {
            CursorStep::Positioned { key, .. } => Some(key.clone()),
            CursorStep::NoRecord => None,
        };
        Ok(step)
    }

    fn get(&self) -> CursorStep {
        let Some(cur) = &self.position else {
            return CursorStep::NoRecord;
        };
        let map = self.db.map.read();
        match map.get(cur).filter(|r| r.is_live()) {
            Some(r) => CursorStep::Positioned { key: cur.clone(), value: r.value.clone() },
            None => CursorStep::NoRecord,
        }
    }

    fn get_key(&self) -> Option<Vec<u8>> {
        match self.get() {
            CursorStep::Positioned { key, .. } => Some(key),
            CursorStep::NoRecord => None,
        }
    }

    fn get_value(&self) -> Option<Vec<u8>> {
        match self.get() {
            CursorStep::Positioned { value, .. } => Some(value),
            CursorStep::NoRecord => None,
        }
    }

    fn set_value(&mut self, value: &[u8]) -> Result<(), KtError> {
        let cur = self.position.clone().ok_or(KtError::Logic("cursor past end".into()))?;
        let mut map = self.db.map.write();
        match map.get_mut(&cur) {
            Some(r) if r.is_live() => {
                r.value = value.to_vec();
                Ok(())
            },
            _ => Err(KtError::Logic("cursor past end".into())),
        }
    }

    fn remove(&mut self) -> Result<(), KtError> {
        let cur = self.position.clone().ok_or(KtError::Logic("cursor past end".into()))?;
        self.db.map.write().remove(&cur).ok_or(KtError::Logic("cursor past end".into()))?;
        self.step();
        Ok(())
    }

    fn seize(&mut self) -> Result<(Vec<u8>, Vec<u8>), KtError> {
        let cur = self.position.clone().ok_or(KtError::Logic("cursor past end".into()))?;
        let record = self.db.map.write().remove(&cur).ok_or(KtError::Logic("cursor past end".into()))?;
        self.step();
        Ok((cur, record.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let db = MemoryDatabase::new();
        db.set(b"k", b"v", None).unwrap();
        assert_eq!(db.get(b"k").unwrap(), b"v");
    }

    #[test]
    fn add_rejects_duplicate() {
        let db = MemoryDatabase::new();
        db.add(b"k", b"v1", None).unwrap();
        assert!(matches!(db.add(b"k", b"v2", None), Err(KtError::Logic(_))));
    }

    #[test]
    fn replace_requires_existing_key() {
        let db = MemoryDatabase::new();
        assert!(matches!(db.replace(b"k", b"v", None), Err(KtError::NoRecord)));
        db.set(b"k", b"v0", None).unwrap();
        db.replace(b"k", b"v1", None).unwrap();
        assert_eq!(db.get(b"k").unwrap(), b"v1");
    }

    #[test]
    fn cas_checks_expected_old_value() {
        let db = MemoryDatabase::new();
        db.set(b"k", b"v0", None).unwrap();
        assert!(db.cas(b"k", Some(b"wrong"), Some(b"v1")).is_err());
        db.cas(b"k", Some(b"v0"), Some(b"v1")).unwrap();
        assert_eq!(db.get(b"k").unwrap(), b"v1");
        db.cas(b"k", Some(b"v1"), None).unwrap();
        assert!(matches!(db.get(b"k"), Err(KtError::NoRecord)));
    }

    #[test]
    fn increment_accumulates() {
        let db = MemoryDatabase::new();
        assert_eq!(db.increment(b"n", 5, None).unwrap(), 5);
        assert_eq!(db.increment(b"n", 3, None).unwrap(), 8);
    }

    #[test]
    fn increment_double_round_trips_fractional() {
        let db = MemoryDatabase::new();
        let v = db.increment_double(b"n", 1.5, None).unwrap();
        assert!((v - 1.5).abs() < 1e-9);
        let v2 = db.increment_double(b"n", 2.25, None).unwrap();
        assert!((v2 - 3.75).abs() < 1e-9);
    }

    #[test]
    fn seize_removes_and_returns() {
        let db = MemoryDatabase::new();
        db.set(b"k", b"v", None).unwrap();
        assert_eq!(db.seize(b"k").unwrap(), b"v");
        assert!(matches!(db.get(b"k"), Err(KtError::NoRecord)));
    }

    #[test]
    fn match_prefix_finds_only_matching_keys() {
        let db = MemoryDatabase::new();
        for k in ["app", "apple", "apt", "banana"] {
            db.set(k.as_bytes(), b"1", None).unwrap();
        }
        let hits: Vec<String> = db
            .match_prefix(b"ap", None)
            .into_iter()
            .map(|h| String::from_utf8(h.key).unwrap())
            .collect();
        assert_eq!(hits, vec!["app", "apple", "apt"]);
    }

    #[test]
    fn cursor_jump_and_step_visit_ascending_keys() {
        let db = Arc::new(MemoryDatabase::new());
        for i in 0..10u8 {
            db.set(&[i], b"v", None).unwrap();
        }
        let mut cur = db.clone().open_cursor();
        let CursorStep::Positioned { key, .. } = cur.jump(None) else {
            panic!("expected first record");
        };
        assert_eq!(key, vec![0u8]);
        let mut seen = vec![0u8];
        for _ in 1..10 {
            let CursorStep::Positioned { key, .. } = cur.step() else {
                panic!("expected record");
            };
            seen.push(key[0]);
        }
        assert_eq!(seen, (0u8..10).collect::<Vec<_>>());
        assert_eq!(cur.step(), CursorStep::NoRecord);
    }

    #[test]
    fn cursor_jump_back_after_exhausted_step_still_works() {
        let db = Arc::new(MemoryDatabase::new());
        for i in 0..3u8 {
            db.set(&[i], b"v", None).unwrap();
        }
        let mut cur = db.clone().open_cursor();
        cur.jump(None);
        while cur.step() != CursorStep::NoRecord {}
        let back = cur.jump_back(None).unwrap();
        assert!(matches!(back, CursorStep::Positioned { .. }));
    }

    #[test]
    fn match_similar_respects_distance() {
        let db = MemoryDatabase::new();
        for k in ["kitten", "sitting", "mittens"] {
            db.set(k.as_bytes(), b"1", None).unwrap();
        }
        let hits = db.match_similar(b"kitten", 3, None);
        let keys: Vec<String> =
            hits.into_iter().map(|h| String::from_utf8(h.key).unwrap()).collect();
        assert!(keys.contains(&"kitten".to_string()));
        assert!(keys.contains(&"sitting".to_string()));
    }
}
