// SPDX-License-Identifier: GPL-3.0-or-later

//! The server-side representation of one TCP connection (spec §3
//! "Session"): a monotonically increasing ID, the worker currently
//! servicing it, a read-ahead scratch buffer backing `receive_line`/
//! `receive_byte`/`undo_receive_byte`, a per-session timeout, and a scoped
//! slot for opaque per-connection user data.
//!
//! Grounded on the teacher's `ClientConnection` (`client/client.rs`): a
//! socket behind a lock plus per-request scratch state, minus the async
//! machinery — reads and writes here block the calling worker thread
//! directly, per spec §5 "parallel OS threads throughout... no cooperative
//! scheduler".

use std::any::Any;
use std::io::{self, Read, Write};
use std::net::TcpStream as StdTcpStream;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use mio::net::TcpStream as MioTcpStream;
use parking_lot::Mutex;

const READ_CHUNK: usize = 4096;

/// Internal read-ahead buffer backing line/byte/exact-size reads. Bytes
/// already pulled off the wire but not yet consumed by the caller stay
/// here; `left_size()` (spec §4.3's pipelining check) reports how many.
struct ReadBuf {
    buf: Vec<u8>,
    pos: usize,
}

impl ReadBuf {
    fn new() -> Self {
        ReadBuf { buf: Vec::new(), pos: 0 }
    }

    fn left(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn fill(&mut self, stream: &mut StdTcpStream) -> io::Result<usize> {
        if self.left() > 0 {
            return Ok(self.left());
        }
        self.buf.clear();
        self.pos = 0;
        let mut tmp = [0u8; READ_CHUNK];
        let n = stream.read(&mut tmp)?;
        self.buf.extend_from_slice(&tmp[..n]);
        Ok(n)
    }

    fn take_byte(&mut self, stream: &mut StdTcpStream) -> io::Result<Option<u8>> {
        if self.fill(stream)? == 0 {
            return Ok(None);
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(Some(b))
    }

    fn push_back(&mut self, byte: u8) {
        if self.pos > 0 {
            self.pos -= 1;
            self.buf[self.pos] = byte;
        } else {
            self.buf.insert(0, byte);
        }
    }
}

/// Opaque per-session user data with scoped-release semantics (spec §3):
/// released deterministically via [`Session::release_user_data`] before
/// the session is dropped, rather than left to `Drop` ordering alone.
pub struct UserData(Option<Box<dyn Any + Send>>);

impl UserData {
    pub fn set<T: Any + Send>(&mut self, value: T) {
        self.0 = Some(Box::new(value));
    }

    pub fn get<T: Any + Send>(&self) -> Option<&T> {
        self.0.as_ref().and_then(|b| b.downcast_ref::<T>())
    }

    pub fn take(&mut self) -> Option<Box<dyn Any + Send>> {
        self.0.take()
    }
}

impl Default for UserData {
    fn default() -> Self {
        UserData(None)
    }
}

pub struct Session {
    id: u64,
    worker_idx: AtomicI64,
    io: Mutex<StdTcpStream>,
    read_buf: Mutex<ReadBuf>,
    user_data: Mutex<UserData>,
    request_count: AtomicU64,
}

impl Session {
    /// Wraps a freshly accepted socket. `timeout` bounds every blocking
    /// read/write this session performs (spec §4.1 "All blocking
    /// operations honor the session timeout and return failure rather than
    /// partial work").
    pub fn new(id: u64, stream: StdTcpStream, timeout: Duration) -> io::Result<Self> {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true).ok();
        Ok(Session {
            id,
            worker_idx: AtomicI64::new(-1),
            io: Mutex::new(stream),
            read_buf: Mutex::new(ReadBuf::new()),
            user_data: Mutex::new(UserData::default()),
            request_count: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn worker_index(&self) -> Option<usize> {
        let v = self.worker_idx.load(Ordering::Acquire);
        if v < 0 { None } else { Some(v as usize) }
    }

    pub fn set_worker_index(&self, idx: usize) {
        self.worker_idx.store(idx as i64, Ordering::Release);
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn note_request_served(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    /// A clone of the underlying socket suitable for `mio` registration
    /// with the poller, for readiness polling between requests.
    pub fn try_clone_mio(&self) -> io::Result<MioTcpStream> {
        let std_clone = self.io.lock().try_clone()?;
        Ok(MioTcpStream::from_std(std_clone))
    }

    /// Bytes already buffered but not yet consumed — spec §4.3's pipelining
    /// check: `left_size() > 0` means the next request's bytes already
    /// arrived and the worker should loop instead of returning to poll.
    pub fn left_size(&self) -> usize {
        self.read_buf.lock().left()
    }

    /// Reads one line, stripping a trailing CRLF or LF, up to `limit`
    /// bytes. Returns `None` on EOF/timeout/overlong line.
    pub fn receive_line(&self, limit: usize) -> Option<Vec<u8>> {
        let mut io = self.io.lock();
        let mut rb = self.read_buf.lock();
        let mut line = Vec::new();
        loop {
            match rb.take_byte(&mut io) {
                Ok(Some(b'\n')) => {
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    return Some(line);
                },
                Ok(Some(b)) => {
                    line.push(b);
                    if line.len() > limit {
                        return None;
                    }
                },
                Ok(None) => return None,
                Err(_) => return None,
            }
        }
    }

    /// Reads and returns one byte, or `None` on EOF/timeout.
    pub fn receive_byte(&self) -> Option<u8> {
        let mut io = self.io.lock();
        let mut rb = self.read_buf.lock();
        rb.take_byte(&mut io).ok().flatten()
    }

    /// Pushes one byte back so the next `receive_byte`/`receive_line` sees
    /// it again (used to peek the first-byte dispatch magic).
    pub fn undo_receive_byte(&self, byte: u8) {
        self.read_buf.lock().push_back(byte);
    }

    /// Reads exactly `n` bytes, or `None` on EOF/timeout before completion.
    pub fn receive(&self, n: usize) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        let mut io = self.io.lock();
        let mut rb = self.read_buf.lock();
        while out.len() < n {
            match rb.take_byte(&mut io) {
                Ok(Some(b)) => out.push(b),
                _ => return None,
            }
        }
        Some(out)
    }

    /// All-or-nothing write.
    pub fn send(&self, data: &[u8]) -> bool {
        self.io.lock().write_all(data).is_ok()
    }

    pub fn with_user_data<R>(&self, f: impl FnOnce(&mut UserData) -> R) -> R {
        f(&mut self.user_data.lock())
    }

    /// Explicit, deterministic release of per-session user data — called
    /// by the server before the session is dropped (spec §3 "user data is
    /// released deterministically before the session is freed").
    pub fn release_user_data(&self) {
        self.user_data.lock().take();
    }

    pub fn shutdown(&self) {
        let _ = self.io.lock().shutdown(std::net::Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::net::TcpListener;

    use super::*;

    fn pair() -> (Session, StdTcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdTcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (Session::new(1, server, Duration::from_secs(2)).unwrap(), client)
    }

    #[test]
    fn receive_line_strips_crlf() {
        let (session, mut client) = pair();
        client.write_all(b"GET / HTTP/1.1\r\n").unwrap();
        let line = session.receive_line(1024).unwrap();
        assert_eq!(line, b"GET / HTTP/1.1");
    }

    #[test]
    fn peek_byte_then_undo_replays_same_byte() {
        let (session, mut client) = pair();
        client.write_all(&[0xB8, 1, 2, 3]).unwrap();
        let magic = session.receive_byte().unwrap();
        assert_eq!(magic, 0xB8);
        session.undo_receive_byte(magic);
        assert_eq!(session.left_size(), 4);
        let replayed = session.receive(4).unwrap();
        assert_eq!(replayed, vec![0xB8, 1, 2, 3]);
    }

    #[test]
    fn receive_exact_n_bytes() {
        let (session, mut client) = pair();
        client.write_all(b"hello world").unwrap();
        let got = session.receive(5).unwrap();
        assert_eq!(got, b"hello");
        assert_eq!(session.left_size(), 6);
    }

    #[test]
    fn user_data_round_trips_and_releases() {
        let (session, _client) = pair();
        session.with_user_data(|ud| ud.set::<String>("hi".to_string()));
        session.with_user_data(|ud| assert_eq!(ud.get::<String>().unwrap(), "hi"));
        session.release_user_data();
        session.with_user_data(|ud| assert!(ud.get::<String>().is_none()));
    }
}
