// SPDX-License-Identifier: GPL-3.0-or-later

//! Spec §8 scenario 5: "Signal wait" — one client blocks on `WAIT`/
//! `WAITTIME` against a missing key; a second client's `set` with
//! `SIGNAL` wakes it well before its timeout expires.

use std::time::{Duration, Instant};

use tycoondb::client::RemoteClient;

use super::common::TestHarness;

#[test]
fn a_waiting_get_times_out_when_nobody_signals() {
    let harness = TestHarness::start();
    let client = RemoteClient::new(harness.addr);

    let start = Instant::now();
    let result = client.call("get", &[("key", b"missing".as_slice()), ("WAIT", b"q0"), ("WAITTIME", b"0.3")]);
    assert!(result.is_err());
    assert!(start.elapsed() >= Duration::from_millis(250));
}

#[test]
fn signal_wakes_a_waiting_client_before_its_timeout() {
    let harness = TestHarness::start();
    let waiter = RemoteClient::new(harness.addr);
    let setter = RemoteClient::new(harness.addr);

    let waiter_thread = std::thread::spawn(move || {
        let start = Instant::now();
        let outputs =
            waiter.call("get", &[("key", b"x".as_slice()), ("WAIT", b"q1"), ("WAITTIME", b"5")]).unwrap();
        (outputs.get("value").cloned(), start.elapsed())
    });

    std::thread::sleep(Duration::from_millis(150));
    setter.call("set", &[("key", b"x".as_slice()), ("value", b"v".as_slice()), ("SIGNAL", b"q1")]).unwrap();

    let (value, elapsed) = waiter_thread.join().unwrap();
    assert_eq!(value, Some(b"v".to_vec()));
    assert!(elapsed < Duration::from_secs(2), "signal should wake the waiter well before its 5s timeout");
}
