// SPDX-License-Identifier: GPL-3.0-or-later

//! First-byte magic dispatch for the binary side-channel that shares the
//! listening socket with HTTP (spec §4.6). Record framing uses `zerocopy`
//! big-endian wire structs the same way the teacher's SCSI CDB parsers do
//! (`control_block::read_capacity`'s `Rc10Raw`/`Rc16Raw`); the flag word
//! uses `bitflags` the way `models::data::common::DataOutFlags` does.

mod record;
mod replication;

use std::time::Duration;

use tracing::{debug, warn};

pub use record::{BulkFlags, BulkRecordHeader};
pub use replication::{NullUpdateLogSource, UpdateLogSource};

use crate::error::KtError;
use crate::kv::Database;
use crate::net::{HandlerOutcome, RequestHandler, Session};
use std::sync::Arc;

pub const MAGIC_NOP: u8 = 0xB0;
pub const MAGIC_REPLICATION: u8 = 0xB1;
pub const MAGIC_PLAY_SCRIPT: u8 = 0xB4;
pub const MAGIC_SET_BULK: u8 = 0xB8;
pub const MAGIC_REMOVE_BULK: u8 = 0xB9;
pub const MAGIC_GET_BULK: u8 = 0xBA;
pub const MAGIC_ERROR: u8 = 0xBF;

/// How long the replication push loop waits for a new update-log entry
/// before sending a heartbeat (spec §6 "Replication stream").
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Handles every request whose first byte is a binary magic (spec §2's
/// "0x80..0xFE enter the binary dispatcher"). Non-magic bytes are never
/// seen here — the top-level dispatcher in `crate::dispatch` peeks the
/// byte and routes accordingly.
pub struct BinaryRequestHandler {
    pub db: Arc<dyn Database>,
    /// Feed for the replication push loop (spec §6). `None` accepts a
    /// replication handshake but immediately closes — there is nothing to
    /// stream — matching the "interfaces only" boundary for update-log
    /// shipping (spec §1).
    pub ulog: Option<Arc<dyn UpdateLogSource>>,
}

impl BinaryRequestHandler {
    pub fn new(db: Arc<dyn Database>) -> Self {
        BinaryRequestHandler { db, ulog: None }
    }

    pub fn with_ulog(db: Arc<dyn Database>, ulog: Arc<dyn UpdateLogSource>) -> Self {
        BinaryRequestHandler { db, ulog: Some(ulog) }
    }
}

impl RequestHandler for BinaryRequestHandler {
    fn handle(&self, session: &Session) -> HandlerOutcome {
        let Some(magic) = session.receive_byte() else {
            return HandlerOutcome::Close;
        };

        let outcome = match magic {
            MAGIC_NOP => self.handle_nop(session),
            MAGIC_SET_BULK => self.handle_set_bulk(session),
            MAGIC_REMOVE_BULK => self.handle_remove_bulk(session),
            MAGIC_GET_BULK => self.handle_get_bulk(session),
            MAGIC_REPLICATION => self.handle_replication(session),
            MAGIC_PLAY_SCRIPT => {
                let _ = send_error(session, &KtError::NotImplemented("play_script".into()));
                HandlerOutcome::Close
            },
            other => {
                warn!(magic = %format!("{other:#04x}"), "unknown binary magic byte");
                let _ = send_error(session, &KtError::Protocol(format!("unknown magic byte {other:#04x}")));
                HandlerOutcome::Close
            },
        };
        outcome
    }
}

impl BinaryRequestHandler {
    fn handle_nop(&self, session: &Session) -> HandlerOutcome {
        let Some(flags_byte) = session.receive_byte() else {
            return HandlerOutcome::Close;
        };
        let flags = BulkFlags::from_bits_truncate(flags_byte);
        debug!(?flags, "nop received");
        if !flags.contains(BulkFlags::NOREPLY) {
            session.send(&[MAGIC_NOP, flags_byte]);
        }
        HandlerOutcome::Keep
    }

    fn handle_set_bulk(&self, session: &Session) -> HandlerOutcome {
        let Some(flags) = read_flags(session) else {
            return HandlerOutcome::Close;
        };
        let Some(count) = read_u32(session) else {
            return HandlerOutcome::Close;
        };
        let mut applied = 0u32;
        for _ in 0..count {
            let Some(header) = read_header(session) else {
                return HandlerOutcome::Close;
            };
            let Some(key) = session.receive(header.key_size() as usize) else {
                return HandlerOutcome::Close;
            };
            let Some(value) = session.receive(header.value_size() as usize) else {
                return HandlerOutcome::Close;
            };
            let xt = header.expiry();
            if self.db.set(&key, &value, xt).is_ok() {
                applied += 1;
            }
        }
        if !flags.contains(BulkFlags::NOREPLY) {
            let mut out = vec![MAGIC_SET_BULK];
            out.extend_from_slice(&applied.to_be_bytes());
            session.send(&out);
        }
        HandlerOutcome::Keep
    }

    fn handle_remove_bulk(&self, session: &Session) -> HandlerOutcome {
        let Some(flags) = read_flags(session) else {
            return HandlerOutcome::Close;
        };
        let Some(count) = read_u32(session) else {
            return HandlerOutcome::Close;
        };
        let mut applied = 0u32;
        for _ in 0..count {
            let Some(header) = read_header(session) else {
                return HandlerOutcome::Close;
            };
            let Some(key) = session.receive(header.key_size() as usize) else {
                return HandlerOutcome::Close;
            };
            if self.db.remove(&key).is_ok() {
                applied += 1;
            }
        }
        if !flags.contains(BulkFlags::NOREPLY) {
            let mut out = vec![MAGIC_REMOVE_BULK];
            out.extend_from_slice(&applied.to_be_bytes());
            session.send(&out);
        }
        HandlerOutcome::Keep
    }

    fn handle_get_bulk(&self, session: &Session) -> HandlerOutcome {
        // get-bulk never suppresses its reply (there is nothing to echo
        // back to a NOREPLY caller), but the flag byte is still present on
        // the wire (spec §4.6 "a global flag-word follows the magic").
        let Some(_flags) = read_flags(session) else {
            return HandlerOutcome::Close;
        };
        let Some(count) = read_u32(session) else {
            return HandlerOutcome::Close;
        };
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let Some(db_index) = read_u16(session) else {
                return HandlerOutcome::Close;
            };
            let Some(key_size) = read_u32(session) else {
                return HandlerOutcome::Close;
            };
            let Some(key) = session.receive(key_size as usize) else {
                return HandlerOutcome::Close;
            };
            match self.db.get(&key) {
                Ok(value) => records.push((db_index, key, value)),
                Err(_) => continue,
            }
        }

        let mut out = vec![MAGIC_GET_BULK];
        out.extend_from_slice(&(records.len() as u32).to_be_bytes());
        for (db_index, key, value) in records {
            // `Database::get` doesn't surface a record's remaining TTL, so
            // expiration is always reported as -1 ("no expiry") here.
            let header = BulkRecordHeader::new(db_index, key.len() as u32, value.len() as u32, -1);
            out.extend_from_slice(header.as_wire_bytes());
            out.extend_from_slice(&key);
            out.extend_from_slice(&value);
        }
        session.send(&out);
        HandlerOutcome::Keep
    }

    /// Handshake + push loop for a replication client (spec §6
    /// "Replication stream"): read the client's `{flags:u32, ts:u64,
    /// sid:u16}`, ack with the bare magic byte, then stream either log
    /// entries (`0xB1 {ts:u64, msg-size:u32, msg-bytes}`) or heartbeats
    /// (`0xB0 {ts:u64}`, echoed back by the client as `0xB1`) until the
    /// connection drops.
    fn handle_replication(&self, session: &Session) -> HandlerOutcome {
        let Some(_flags) = read_u32(session) else {
            return HandlerOutcome::Close;
        };
        let Some(mut ts) = read_u64(session) else {
            return HandlerOutcome::Close;
        };
        let Some(_sid) = read_u16(session) else {
            return HandlerOutcome::Close;
        };
        session.send(&[MAGIC_REPLICATION]);

        let Some(ulog) = &self.ulog else {
            debug!("replication handshake accepted but no update-log source is configured");
            return HandlerOutcome::Close;
        };

        loop {
            match ulog.next_entry(ts, HEARTBEAT_INTERVAL) {
                Some((entry_ts, bytes)) => {
                    ts = entry_ts;
                    let mut out = vec![MAGIC_REPLICATION];
                    out.extend_from_slice(&entry_ts.to_be_bytes());
                    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                    out.extend_from_slice(&bytes);
                    if !session.send(&out) {
                        return HandlerOutcome::Close;
                    }
                },
                None => {
                    let mut out = vec![MAGIC_NOP];
                    out.extend_from_slice(&ts.to_be_bytes());
                    if !session.send(&out) {
                        return HandlerOutcome::Close;
                    }
                    // The client echoes 0xB1 after each heartbeat; a
                    // dropped connection surfaces here as a short read.
                    let Some(echo) = session.receive_byte() else {
                        return HandlerOutcome::Close;
                    };
                    if echo != MAGIC_REPLICATION {
                        return HandlerOutcome::Close;
                    }
                },
            }
        }
    }
}

fn read_flags(session: &Session) -> Option<BulkFlags> {
    session.receive_byte().map(BulkFlags::from_bits_truncate)
}

fn read_u16(session: &Session) -> Option<u16> {
    session.receive(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn read_u32(session: &Session) -> Option<u32> {
    session.receive(4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u64(session: &Session) -> Option<u64> {
    session.receive(8).map(|b| {
        u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    })
}

fn read_header(session: &Session) -> Option<BulkRecordHeader> {
    let bytes = session.receive(BulkRecordHeader::WIRE_SIZE)?;
    BulkRecordHeader::parse(&bytes)
}

fn send_error(session: &Session, err: &KtError) -> bool {
    let mut out = vec![MAGIC_ERROR, err.code() as u8];
    out.extend_from_slice(err.message().as_bytes());
    session.send(&out)
}
