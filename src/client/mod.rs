// SPDX-License-Identifier: GPL-3.0-or-later

//! The remote client (spec §4.7): a connection that owns one HTTP/RPC
//! socket with lazy reconnect, and cursor handles scoped to it.

mod connection;
mod cursor;

pub use connection::{ClientError, MatchHit, RemoteClient};
pub use cursor::{CursorRecord, RemoteCursor};
