// SPDX-License-Identifier: GPL-3.0-or-later

//! Spec §8 scenario 2: "RPC set/get" over a real socket, driven by the
//! library's own [`RemoteClient`] rather than hand-rolled HTTP bytes.

use tycoondb::client::RemoteClient;

use super::common::TestHarness;

#[test]
fn set_then_get_round_trips_through_the_remote_client() {
    let harness = TestHarness::start();
    let client = RemoteClient::new(harness.addr);

    client.set(b"alpha", b"one", None).unwrap();
    let value = client.get(b"alpha").unwrap();
    assert_eq!(value, b"one");
}

#[test]
fn get_of_missing_key_is_reported_as_no_record() {
    let harness = TestHarness::start();
    let client = RemoteClient::new(harness.addr);

    let err = client.get(b"nope").unwrap_err();
    assert!(err.is_no_record());
}

#[test]
fn add_rejects_a_duplicate_key() {
    let harness = TestHarness::start();
    let client = RemoteClient::new(harness.addr);

    client.add(b"k", b"v1", None).unwrap();
    assert!(client.add(b"k", b"v2", None).is_err());
    assert_eq!(client.get(b"k").unwrap(), b"v1");
}

#[test]
fn cas_mismatch_is_a_logical_inconsistency() {
    let harness = TestHarness::start();
    let client = RemoteClient::new(harness.addr);

    client.set(b"k", b"v1", None).unwrap();
    let err = client.cas(b"k", Some(b"wrong"), Some(b"v2")).unwrap_err();
    assert!(matches!(err, tycoondb::client::ClientError::Rpc { status: 450, .. }));
    assert_eq!(client.get(b"k").unwrap(), b"v1");
}

#[test]
fn bulk_set_and_get_round_trip_multiple_keys() {
    let harness = TestHarness::start();
    let client = RemoteClient::new(harness.addr);

    let applied = client.set_bulk(&[(b"a".as_slice(), b"1".as_slice()), (b"b", b"2")], None).unwrap();
    assert_eq!(applied, 2);

    let fetched = client.get_bulk(&[b"a", b"b"]).unwrap();
    assert_eq!(fetched.get(b"a".as_slice()), Some(&b"1".to_vec()));
    assert_eq!(fetched.get(b"b".as_slice()), Some(&b"2".to_vec()));
}
