// SPDX-License-Identifier: GPL-3.0-or-later

//! Error taxonomy shared by the storage boundary, the request layer, and the
//! remote client.
//!
//! [`KtError`] groups failures into the categories the wire protocols need to
//! tell apart (spec §7): a caller needs to know whether a failure is a
//! transient network hiccup, a malformed request, a logical "no such key",
//! storage exhaustion, an internal fault, or a deliberately unimplemented
//! procedure, because each maps to a different HTTP status and a different
//! retry policy.

use std::cell::RefCell;

use thiserror::Error;

/// The five-category failure taxonomy from spec §7, plus `NotImplemented`
/// for procedures accepted but intentionally unsupported (§4.11).
#[derive(Debug, Error, Clone)]
pub enum KtError {
    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no record")]
    NoRecord,

    #[error("logic error: {0}")]
    Logic(String),

    #[error("capacity error: {0}")]
    Capacity(String),

    #[error("system error: {0}")]
    System(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl KtError {
    /// Short machine-readable name, as reported in RPC error bodies.
    pub fn name(&self) -> &'static str {
        match self {
            KtError::Network(_) => "network error",
            KtError::Protocol(_) => "protocol error",
            KtError::NoRecord => "no record",
            KtError::Logic(_) => "logic error",
            KtError::Capacity(_) => "capacity error",
            KtError::System(_) => "system error",
            KtError::NotImplemented(_) => "not implemented",
        }
    }

    /// Numeric code, stable across releases, carried in RPC TSV bodies as
    /// `ERROR\tcode`.
    pub fn code(&self) -> i32 {
        match self {
            KtError::Network(_) => 1,
            KtError::Protocol(_) => 2,
            KtError::NoRecord => 3,
            KtError::Logic(_) => 4,
            KtError::Capacity(_) => 5,
            KtError::System(_) => 6,
            KtError::NotImplemented(_) => 7,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    /// HTTP status this error maps to, per spec §4.5's table.
    pub fn http_status(&self) -> u16 {
        match self {
            KtError::Network(_) => 503,
            KtError::Protocol(_) => 400,
            KtError::NoRecord => 404,
            KtError::Logic(_) => 450,
            KtError::Capacity(_) => 413,
            KtError::System(_) => 500,
            KtError::NotImplemented(_) => 501,
        }
    }
}

thread_local! {
    /// The thread-specific "last error" slot (spec §3's "TSD error"):
    /// `Database`/`RemoteClient` operations that return `Option`/`bool`
    /// instead of `Result` stash the failure reason here for a subsequent
    /// `last_error()` call, mirroring the original's per-thread `kc::TSD`
    /// error cell.
    static LAST_ERROR: RefCell<Option<KtError>> = const { RefCell::new(None) };
}

/// Record `err` as this thread's last error and return it, so call sites can
/// write `return set_last_error(KtError::NoRecord);`.
pub fn set_last_error(err: KtError) -> KtError {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some(err.clone()));
    err
}

/// Read back this thread's last recorded error, if any.
pub fn last_error() -> Option<KtError> {
    LAST_ERROR.with(|cell| cell.borrow().clone())
}

pub fn clear_last_error() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = None);
}
