// SPDX-License-Identifier: GPL-3.0-or-later

//! The update-log feed consumed by the replication push loop (spec §6
//! "Replication stream"). The core "neither interprets nor owns update
//! logs beyond passing them across the binary replication channel" (spec
//! §5 data model, "Update log (external)"), so this is deliberately a
//! thin opaque-message trait rather than a real log implementation.

use std::time::Duration;

/// A source of opaque, already-serialized update-log entries, each paired
/// with the server timestamp it was recorded at. Implementations decide
/// entirely on their own what an entry's bytes mean; this trait only
/// carries them across the wire.
pub trait UpdateLogSource: Send + Sync {
    /// Waits up to `timeout` for the first entry timestamped after `ts`.
    /// Returns `None` on timeout, which the push loop turns into a
    /// heartbeat.
    fn next_entry(&self, ts: u64, timeout: Duration) -> Option<(u64, Vec<u8>)>;
}

/// Reference implementation that never has anything to ship: every call
/// blocks for the timeout and returns `None`, so a connected replica sees
/// nothing but heartbeats. Stands in for update-log shipping, which this
/// crate does not implement (spec §1).
pub struct NullUpdateLogSource;

impl UpdateLogSource for NullUpdateLogSource {
    fn next_entry(&self, _ts: u64, timeout: Duration) -> Option<(u64, Vec<u8>)> {
        std::thread::sleep(timeout);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_source_always_times_out() {
        let source = NullUpdateLogSource;
        assert!(source.next_entry(0, Duration::from_millis(1)).is_none());
    }
}
