// SPDX-License-Identifier: GPL-3.0-or-later

//! Spec §8 scenario 3: "Binary set-bulk" over the same listening socket
//! HTTP/RPC shares, dispatched purely by first-byte magic (spec §4.6).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use tycoondb::binary::BulkRecordHeader;

use super::common::TestHarness;

const MAGIC_SET_BULK: u8 = 0xB8;
const MAGIC_GET_BULK: u8 = 0xBA;

fn record(key: &[u8], value: &[u8]) -> Vec<u8> {
    let header = BulkRecordHeader::new(0, key.len() as u32, value.len() as u32, -1);
    let mut out = header.as_wire_bytes().to_vec();
    out.extend_from_slice(key);
    out.extend_from_slice(value);
    out
}

#[test]
fn set_bulk_then_get_bulk_round_trips_two_records() {
    let harness = TestHarness::start();
    let mut stream = TcpStream::connect(harness.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let mut wire = vec![MAGIC_SET_BULK, 0x00];
    wire.extend_from_slice(&2u32.to_be_bytes());
    wire.extend_from_slice(&record(b"a", b"1"));
    wire.extend_from_slice(&record(b"b", b"2"));
    stream.write_all(&wire).unwrap();

    let mut reply = [0u8; 1 + 4];
    stream.read_exact(&mut reply).unwrap();
    assert_eq!(reply[0], MAGIC_SET_BULK);
    assert_eq!(u32::from_be_bytes(reply[1..].try_into().unwrap()), 2);

    // Same connection, second request: get-bulk for the two keys just set.
    let mut wire = vec![MAGIC_GET_BULK, 0x00];
    wire.extend_from_slice(&2u32.to_be_bytes());
    for key in [b"a".as_slice(), b"b"] {
        wire.extend_from_slice(&0u16.to_be_bytes());
        wire.extend_from_slice(&(key.len() as u32).to_be_bytes());
        stream.write_all(&wire).unwrap();
        wire.clear();
        stream.write_all(key).unwrap();
    }

    let mut header = [0u8; 1 + 4];
    stream.read_exact(&mut header).unwrap();
    assert_eq!(header[0], MAGIC_GET_BULK);
    let count = u32::from_be_bytes(header[1..].try_into().unwrap());
    assert_eq!(count, 2);

    let mut seen = std::collections::HashMap::new();
    for _ in 0..count {
        let mut rec_header = [0u8; BulkRecordHeader::WIRE_SIZE];
        stream.read_exact(&mut rec_header).unwrap();
        let parsed = BulkRecordHeader::parse(&rec_header).unwrap();
        let mut key = vec![0u8; parsed.key_size() as usize];
        stream.read_exact(&mut key).unwrap();
        let mut value = vec![0u8; parsed.value_size() as usize];
        stream.read_exact(&mut value).unwrap();
        seen.insert(key, value);
    }
    assert_eq!(seen.get(b"a".as_slice()), Some(&b"1".to_vec()));
    assert_eq!(seen.get(b"b".as_slice()), Some(&b"2".to_vec()));

    assert_eq!(harness.db.get(b"a").unwrap(), b"1");
}
