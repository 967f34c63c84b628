// SPDX-License-Identifier: GPL-3.0-or-later

//! Wire framing for one bulk record (spec §4.6 "Record framing for bulk
//! ops (per record): db-index (u16), key-size (u32), value-size (u32 for
//! set/get), expiration (i64 for set/get), key bytes, value bytes").
//! Grounded on the teacher's `control_block::read_capacity::Rc10Raw`/
//! `Rc16Raw` (zerocopy big-endian structs over raw SCSI parameter bytes)
//! and `models::data::common::DataOutFlags` (bitflags over a wire byte).

use std::time::Duration;

use zerocopy::byteorder::{BigEndian, I64, U32, U16};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::kv::Expiry;

bitflags::bitflags! {
    /// The global flag-word following the magic byte (spec §4.6). Only bit
    /// 0 is assigned; higher bits are reserved and ignored.
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BulkFlags: u8 {
        const NOREPLY = 0b0000_0001;
    }
}

/// Fixed 18-byte header preceding each record's key/value bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct BulkRecordHeader {
    db_index: U16<BigEndian>,
    key_size: U32<BigEndian>,
    value_size: U32<BigEndian>,
    expiration: I64<BigEndian>,
}

impl BulkRecordHeader {
    pub const WIRE_SIZE: usize = 18;

    /// `expiration < 0` means "no expiry" on the wire (spec leaves the
    /// representation open; this mirrors the RPC layer's `xt` convention).
    pub fn new(db_index: u16, key_size: u32, value_size: u32, expiration: i64) -> Self {
        BulkRecordHeader {
            db_index: U16::new(db_index),
            key_size: U32::new(key_size),
            value_size: U32::new(value_size),
            expiration: I64::new(expiration),
        }
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Self::read_from_bytes(bytes).ok()
    }

    pub fn as_wire_bytes(&self) -> &[u8] {
        self.as_bytes()
    }

    pub fn db_index(&self) -> u16 {
        self.db_index.get()
    }

    pub fn key_size(&self) -> u32 {
        self.key_size.get()
    }

    pub fn value_size(&self) -> u32 {
        self.value_size.get()
    }

    pub fn expiry(&self) -> Expiry {
        let raw = self.expiration.get();
        if raw < 0 { None } else { Some(Duration::from_secs(raw as u64)) }
    }
}
