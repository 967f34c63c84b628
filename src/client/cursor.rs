// SPDX-License-Identifier: GPL-3.0-or-later

//! The remote client's cursor handle (spec §4.7 "Cursor lifecycle"): a
//! server-assigned 63-bit ID plus a weak reference back to the owning
//! connection, so a cursor can detach cleanly if its database outlives it
//! or is torn down first. Grounded on the teacher's `SessionRef`
//! (`client/client.rs`), which holds a `Weak<Pool>` plus a small
//! identifying key for the same reason — reaching back into a shared
//! resource without keeping it alive.

use std::sync::Weak;

use super::connection::{ClientError, RemoteClient};

/// A cursor open on a [`RemoteClient`]'s database. Dropping it issues
/// `cur_delete` to free the server-side state, unless the client has
/// already been dropped (spec §4.7 "If the owning database object is
/// destroyed first, outstanding cursors are detached").
pub struct RemoteCursor {
    client: Weak<RemoteClient>,
    id: u64,
}

/// The result of a positioning call (`cur_jump`/`cur_step`/`cur_get`/...):
/// the record the cursor now sits on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl RemoteCursor {
    pub(super) fn new(client: Weak<RemoteClient>, id: u64) -> Self {
        RemoteCursor { client, id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn with_client<T>(&self, f: impl FnOnce(&RemoteClient) -> Result<T, ClientError>) -> Result<T, ClientError> {
        let client = self.client.upgrade().ok_or_else(|| {
            ClientError::Protocol("cursor's owning client has been dropped".into())
        })?;
        f(&client)
    }

    pub fn jump(&self, key: Option<&[u8]>) -> Result<CursorRecord, ClientError> {
        self.with_client(|client| {
            let id_text = self.id.to_string();
            let mut params = vec![("cur", id_text.as_bytes())];
            if let Some(key) = key {
                params.push(("key", key));
            }
            record_from(client.call("cur_jump", &params)?)
        })
    }

    pub fn jump_back(&self, key: Option<&[u8]>) -> Result<CursorRecord, ClientError> {
        self.with_client(|client| {
            let id_text = self.id.to_string();
            let mut params = vec![("cur", id_text.as_bytes())];
            if let Some(key) = key {
                params.push(("key", key));
            }
            record_from(client.call("cur_jump_back", &params)?)
        })
    }

    pub fn step(&self) -> Result<CursorRecord, ClientError> {
        self.with_client(|client| {
            let id_text = self.id.to_string();
            record_from(client.call("cur_step", &[("cur", id_text.as_bytes())])?)
        })
    }

    pub fn step_back(&self) -> Result<CursorRecord, ClientError> {
        self.with_client(|client| {
            let id_text = self.id.to_string();
            record_from(client.call("cur_step_back", &[("cur", id_text.as_bytes())])?)
        })
    }

    pub fn get(&self) -> Result<CursorRecord, ClientError> {
        self.with_client(|client| {
            let id_text = self.id.to_string();
            record_from(client.call("cur_get", &[("cur", id_text.as_bytes())])?)
        })
    }

    pub fn get_key(&self) -> Result<Vec<u8>, ClientError> {
        self.with_client(|client| {
            let id_text = self.id.to_string();
            let mut outputs = client.call("cur_get_key", &[("cur", id_text.as_bytes())])?;
            outputs
                .remove("key")
                .ok_or_else(|| ClientError::Protocol("cur_get_key response missing 'key'".into()))
        })
    }

    pub fn get_value(&self) -> Result<Vec<u8>, ClientError> {
        self.with_client(|client| {
            let id_text = self.id.to_string();
            let mut outputs = client.call("cur_get_value", &[("cur", id_text.as_bytes())])?;
            outputs
                .remove("value")
                .ok_or_else(|| ClientError::Protocol("cur_get_value response missing 'value'".into()))
        })
    }

    pub fn set_value(&self, value: &[u8]) -> Result<(), ClientError> {
        self.with_client(|client| {
            let id_text = self.id.to_string();
            client.call("cur_set_value", &[("cur", id_text.as_bytes()), ("value", value)])?;
            Ok(())
        })
    }

    pub fn remove(&self) -> Result<(), ClientError> {
        self.with_client(|client| {
            let id_text = self.id.to_string();
            client.call("cur_remove", &[("cur", id_text.as_bytes())])?;
            Ok(())
        })
    }

    pub fn seize(&self) -> Result<CursorRecord, ClientError> {
        self.with_client(|client| {
            let id_text = self.id.to_string();
            record_from(client.call("cur_seize", &[("cur", id_text.as_bytes())])?)
        })
    }
}

fn record_from(mut outputs: std::collections::HashMap<String, Vec<u8>>) -> Result<CursorRecord, ClientError> {
    let key = outputs.remove("key").ok_or_else(|| ClientError::Protocol("response missing 'key'".into()))?;
    let value = outputs.remove("value").ok_or_else(|| ClientError::Protocol("response missing 'value'".into()))?;
    Ok(CursorRecord { key, value })
}

impl Drop for RemoteCursor {
    fn drop(&mut self) {
        if let Some(client) = self.client.upgrade() {
            let id_text = self.id.to_string();
            let _ = client.call("cur_delete", &[("cur", id_text.as_bytes())]);
        }
    }
}
