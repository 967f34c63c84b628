// SPDX-License-Identifier: GPL-3.0-or-later

//! Spec §8 scenario 4: "MapReduce word count", run with the exact source
//! records and expected tallies from the spec (the unit suite in
//! `mapreduce::mod` covers the engine's internal mechanics more broadly;
//! this is the named scenario verbatim, run through the same public API
//! a caller outside the crate would use).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tycoondb::kv::Database;
use tycoondb::kv::memory::MemoryDatabase;
use tycoondb::mapreduce::{Emitter, MapReduceConfig, MapReduceHooks, MapReduceJob, ValueIterator};

#[test]
fn word_count_over_the_spec_example_yields_the_documented_tallies() {
    let source: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
    source.set(b"1", b"this is a pen", None).unwrap();
    source.set(b"2", b"what a beautiful pen this is", None).unwrap();
    source.set(b"3", b"she is beautiful", None).unwrap();

    let job = MapReduceJob::new(source, MapReduceConfig::default());

    let map = |_k: &[u8], v: &[u8], emitter: &Emitter| -> bool {
        for word in String::from_utf8_lossy(v).split_whitespace() {
            emitter.emit(word.as_bytes(), b"");
        }
        true
    };

    let tallies: Mutex<BTreeMap<String, u64>> = Mutex::new(BTreeMap::new());
    let reduce = |key: &[u8], values: ValueIterator| -> bool {
        let count = values.count() as u64;
        tallies.lock().unwrap().insert(String::from_utf8_lossy(key).into_owned(), count);
        true
    };

    job.run(MapReduceHooks::default(), &map, &reduce).unwrap();

    let tallies = tallies.into_inner().unwrap();
    let expected: BTreeMap<String, u64> = [
        ("a", 2),
        ("beautiful", 2),
        ("is", 3),
        ("pen", 2),
        ("she", 1),
        ("this", 2),
        ("what", 1),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    assert_eq!(tallies, expected);
}
