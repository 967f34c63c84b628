// SPDX-License-Identifier: GPL-3.0-or-later

//! Spec §8 scenario 6: "Cursor keep-alive" — one client, one cursor,
//! stepping through every record in ascending order over a persistent
//! connection, then confirming the cursor survives running off the end.

use std::sync::Arc;

use tycoondb::client::RemoteClient;

use super::common::TestHarness;

#[test]
fn jump_then_step_through_ten_records_in_order_then_runs_off_the_end() {
    let harness = TestHarness::start();
    let client = Arc::new(RemoteClient::new(harness.addr));

    for i in 0..10u32 {
        client.set(format!("k{i:02}").as_bytes(), format!("v{i}").as_bytes(), None).unwrap();
    }

    let cursor = client.open_cursor().unwrap();
    let mut seen = Vec::new();
    let first = cursor.get().unwrap();
    seen.push(first.key.clone());
    for _ in 1..10 {
        let record = cursor.step().unwrap();
        seen.push(record.key);
    }

    assert_eq!(seen.len(), 10);
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted, "keys must arrive in ascending comparator order");

    let past_end = cursor.step();
    let err = past_end.unwrap_err();
    assert!(err.is_no_record());

    // The cursor is still valid after running off the end: jump_back
    // repositions it at the last record rather than erroring.
    let last = cursor.jump_back(None).unwrap();
    assert_eq!(last.key, *seen.last().unwrap());
}
