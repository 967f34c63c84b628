// SPDX-License-Identifier: GPL-3.0-or-later

//! Readiness multiplexer (spec §4.1): `deposit`/`undo`/`withdraw`/`wait`/
//! `next`/`flush`/`abort`/`close` over `mio`. Grounded on
//! `other_examples/CycleChain-ignix`'s `mio::Poll` event loop — this module
//! generalizes its inline `Poll`/`Events` pair into a reusable type the
//! `TaskQueue`-driven [`super::server::ThreadedServer`] can share between
//! the accept loop and (indirectly, via tokens) worker threads.
//!
//! mio has no cross-platform one-shot readiness mode, so the "a ready
//! pollable is reported at most once per wait cycle, and not again until an
//! explicit `undo`" invariant (spec §4.1) is implemented here rather than
//! relied on from the OS: every token returned by [`Poller::next`] is
//! tracked as *pending* until [`Poller::undo`] (re-arm) or
//! [`Poller::withdraw`] (detach) clears it, and `wait` silently drops
//! readiness events for pending tokens instead of re-queuing them.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;

const WAKER_TOKEN: Token = Token(usize::MAX);

pub struct Poller {
    poll: Mutex<Poll>,
    registry: Registry,
    waker: Waker,
    next_token: AtomicUsize,
    interests: DashMap<Token, Interest>,
    pending: DashSet<Token>,
    ready: Mutex<VecDeque<Token>>,
    aborted: AtomicBool,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        Ok(Poller {
            poll: Mutex::new(poll),
            registry,
            waker,
            next_token: AtomicUsize::new(0),
            interests: DashMap::new(),
            pending: DashSet::new(),
            ready: Mutex::new(VecDeque::new()),
            aborted: AtomicBool::new(false),
        })
    }

    /// Allocates a fresh token, unique for the life of this poller.
    pub fn new_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Arms `source` under `token` with `interest` and starts tracking it.
    pub fn deposit<S: Source + ?Sized>(
        &self,
        token: Token,
        source: &mut S,
        interest: Interest,
    ) -> io::Result<()> {
        self.registry.register(source, token, interest)?;
        self.interests.insert(token, interest);
        Ok(())
    }

    /// Re-arms a pollable whose readiness was consumed via [`Self::next`]
    /// but which should remain tracked (spec §4.1: re-arming the listening
    /// socket after an accept, or a session after each request).
    pub fn undo<S: Source + ?Sized>(
        &self,
        token: Token,
        source: &mut S,
        interest: Interest,
    ) -> io::Result<()> {
        self.registry.reregister(source, token, interest)?;
        self.interests.insert(token, interest);
        self.pending.remove(&token);
        Ok(())
    }

    /// Detaches `token` for good: no further readiness will be reported.
    pub fn withdraw<S: Source + ?Sized>(&self, token: Token, source: &mut S) -> io::Result<()> {
        self.registry.deregister(source)?;
        self.interests.remove(&token);
        self.pending.remove(&token);
        Ok(())
    }

    /// Blocks up to `timeout` for readiness events, queuing each newly
    /// ready (and not-already-pending) token for [`Self::next`].
    pub fn wait(&self, timeout: Duration) -> io::Result<()> {
        let mut events = Events::with_capacity(256);
        {
            let mut poll = self.poll.lock();
            match poll.poll(&mut events, Some(timeout)) {
                Ok(()) => {},
                Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        let mut ready = self.ready.lock();
        for ev in events.iter() {
            let token = ev.token();
            if token == WAKER_TOKEN {
                continue;
            }
            if self.interests.contains_key(&token) && self.pending.insert(token) {
                ready.push_back(token);
            }
        }
        Ok(())
    }

    /// Pops one ready pollable, or `None` if the queue is empty.
    pub fn next(&self) -> Option<Token> {
        self.ready.lock().pop_front()
    }

    /// Drains and returns every remaining queued pollable (used during
    /// shutdown to close out whatever the poller still tracks).
    pub fn flush(&self) -> Vec<Token> {
        self.ready.lock().drain(..).collect()
    }

    /// All tokens currently registered, used by `finish` to enumerate and
    /// close sessions the poller still knows about.
    pub fn tracked_tokens(&self) -> Vec<Token> {
        self.interests.iter().map(|e| *e.key()).collect()
    }

    /// Unblocks any in-progress or future [`Self::wait`] promptly.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        let _ = self.waker.wake();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.ready.lock().clear();
        self.interests.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::SocketAddr;

    use mio::net::{TcpListener, TcpStream};

    use super::*;

    #[test]
    fn ready_pollable_is_reported_once_until_undo() {
        let poller = Poller::new().unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut listener = TcpListener::bind(addr).unwrap();
        let local_addr = listener.local_addr().unwrap();
        let token = poller.new_token();
        poller.deposit(token, &mut listener, Interest::READABLE).unwrap();

        let _client = std::net::TcpStream::connect(local_addr).unwrap();

        poller.wait(Duration::from_secs(2)).unwrap();
        assert_eq!(poller.next(), Some(token));
        assert_eq!(poller.next(), None);

        // Without `undo`, a second wait cycle must not re-report it even
        // though the listener is still readable at the OS level.
        poller.wait(Duration::from_millis(50)).unwrap();
        assert_eq!(poller.next(), None);

        poller.undo(token, &mut listener, Interest::READABLE).unwrap();
        poller.wait(Duration::from_secs(2)).unwrap();
        assert_eq!(poller.next(), Some(token));
    }

    #[test]
    fn abort_unblocks_wait_promptly() {
        use std::sync::Arc;
        use std::thread;

        let poller = Arc::new(Poller::new().unwrap());
        let waiter = {
            let poller = poller.clone();
            thread::spawn(move || poller.wait(Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(50));
        let start = std::time::Instant::now();
        poller.abort();
        waiter.join().unwrap().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(poller.is_aborted());
    }

    #[test]
    fn withdraw_stops_future_reports() {
        let poller = Poller::new().unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut listener = TcpListener::bind(addr).unwrap();
        let local_addr = listener.local_addr().unwrap();
        let token = poller.new_token();
        poller.deposit(token, &mut listener, Interest::READABLE).unwrap();
        let _client = std::net::TcpStream::connect(local_addr).unwrap();
        poller.wait(Duration::from_secs(2)).unwrap();
        poller.next();
        poller.withdraw(token, &mut listener).unwrap();
        poller.wait(Duration::from_millis(50)).unwrap();
        assert_eq!(poller.next(), None);
    }

    #[test]
    fn connection_socket_round_trip_via_poller() {
        let poller = Poller::new().unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = std::net::TcpListener::bind(addr).unwrap();
        let local_addr = listener.local_addr().unwrap();

        let mut client = std::net::TcpStream::connect(local_addr).unwrap();
        let (server_conn, _) = listener.accept().unwrap();
        let mut server_conn = TcpStream::from_std(server_conn);

        let token = poller.new_token();
        poller.deposit(token, &mut server_conn, Interest::READABLE).unwrap();
        client.write_all(b"ping").unwrap();

        poller.wait(Duration::from_secs(2)).unwrap();
        assert_eq!(poller.next(), Some(token));
        let mut buf = [0u8; 4];
        server_conn.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }
}
