// SPDX-License-Identifier: GPL-3.0-or-later

//! The accept loop, session table, idle/timer semaphores, and graceful
//! drain (spec §4.3). Grounded on `CycleChain-ignix`'s `run_shard` event
//! loop (listener token + per-connection tokens + worker dispatch),
//! restructured around this crate's [`Poller`] deposit/undo/withdraw cycle
//! and [`TaskQueue`] instead of ignix's single-purpose channel pair.

use std::io;
use std::net::{TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use mio::net::TcpListener as MioTcpListener;
use mio::{Interest, Token};
use tracing::{debug, info, warn};

use super::poller::Poller;
use super::session::Session;
use super::task_queue::{Task, TaskQueue};

const POLL_QUANTUM: Duration = Duration::from_millis(100);
const TIMER_EVERY_N_CYCLES: u64 = 256;

/// Outcome of handling one request on a session: whether the connection
/// should be kept open for another request or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Keep,
    Close,
}

/// The user-supplied per-request entry point. HTTP framing, RPC dispatch,
/// and binary dispatch are all implementations of this trait wired
/// together by one top-level dispatcher (see `crate::dispatch`).
pub trait RequestHandler: Send + Sync {
    fn handle(&self, session: &Session) -> HandlerOutcome;
}

/// Hooks run from idle/timer tasks (spec §4.3). Most servers use these to
/// age out expired records, reap unused condition-map entries, etc.
pub trait ServerHooks: Send + Sync {
    fn on_idle(&self) {}
    fn on_timer(&self) {}
}

impl ServerHooks for () {}

pub struct ServerConfigLite {
    pub worker_threads: usize,
    pub session_timeout: Duration,
}

/// The threaded TCP server substrate (spec §4.3).
pub struct ThreadedServer<H: RequestHandler + 'static, K: ServerHooks + 'static = ()> {
    poller: Arc<Poller>,
    listener: std::sync::Mutex<MioTcpListener>,
    listener_token: Token,
    sessions: Arc<DashMap<Token, Arc<Session>>>,
    task_queue: Arc<TaskQueue<Token>>,
    next_session_id: AtomicU64,
    run_flag: Arc<AtomicBool>,
    idle_flag: Arc<AtomicBool>,
    timer_flag: Arc<AtomicBool>,
    poll_cycles: AtomicU64,
    handler: Arc<H>,
    hooks: Arc<K>,
    session_timeout: Duration,
    worker_threads: usize,
}

impl<H: RequestHandler + 'static> ThreadedServer<H, ()> {
    pub fn bind(addr: std::net::SocketAddr, cfg: ServerConfigLite, handler: Arc<H>) -> io::Result<Self> {
        Self::bind_with_hooks(addr, cfg, handler, Arc::new(()))
    }
}

impl<H: RequestHandler + 'static, K: ServerHooks + 'static> ThreadedServer<H, K> {
    pub fn bind_with_hooks(
        addr: std::net::SocketAddr,
        cfg: ServerConfigLite,
        handler: Arc<H>,
        hooks: Arc<K>,
    ) -> io::Result<Self> {
        let std_listener = StdTcpListener::bind(addr)?;
        std_listener.set_nonblocking(true)?;
        let mut listener = MioTcpListener::from_std(std_listener);
        let poller = Arc::new(Poller::new()?);
        let listener_token = poller.new_token();
        poller.deposit(listener_token, &mut listener, Interest::READABLE)?;

        Ok(ThreadedServer {
            poller,
            listener: std::sync::Mutex::new(listener),
            listener_token,
            sessions: Arc::new(DashMap::new()),
            task_queue: Arc::new(TaskQueue::new()),
            next_session_id: AtomicU64::new(1),
            run_flag: Arc::new(AtomicBool::new(true)),
            idle_flag: Arc::new(AtomicBool::new(false)),
            timer_flag: Arc::new(AtomicBool::new(false)),
            poll_cycles: AtomicU64::new(0),
            handler,
            hooks,
            session_timeout: cfg.session_timeout,
            worker_threads: cfg.worker_threads,
        })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.lock().expect("listener mutex poisoned").local_addr()
    }

    /// Starts the worker pool, then runs the accept/poll loop until
    /// [`Self::stop`] is called from another thread. Blocks the calling
    /// thread.
    pub fn run(&self) {
        let poller = self.poller.clone();
        let sessions = self.sessions.clone();
        let handler = self.handler.clone();
        let hooks = self.hooks.clone();
        let idle_flag = self.idle_flag.clone();
        let timer_flag = self.timer_flag.clone();

        self.task_queue.start(
            self.worker_threads,
            |idx| debug!(worker = idx, "worker started"),
            |idx| debug!(worker = idx, "worker finished"),
            move |_idx, task| match task {
                Task::Session { payload: token, aborted } => {
                    let Some(session) = sessions.get(&token).map(|e| e.value().clone()) else {
                        return;
                    };
                    if aborted {
                        close_session(&poller, &sessions, token);
                        return;
                    }
                    let mut outcome;
                    loop {
                        outcome = handler.handle(&session);
                        session.note_request_served();
                        if outcome == HandlerOutcome::Keep && session.left_size() > 0 {
                            continue;
                        }
                        break;
                    }
                    match outcome {
                        HandlerOutcome::Keep => {
                            if let Ok(mut mio_stream) = session.try_clone_mio() {
                                let _ = poller.undo(token, &mut mio_stream, Interest::READABLE);
                            }
                        },
                        HandlerOutcome::Close => {
                            close_session(&poller, &sessions, token);
                        },
                    }
                },
                Task::Idle => {
                    hooks.on_idle();
                    // Cleared here, after the handler returns, so at most
                    // one idle task is ever outstanding (spec §4.3).
                    idle_flag.store(false, Ordering::Release);
                },
                Task::Timer => {
                    hooks.on_timer();
                    timer_flag.store(false, Ordering::Release);
                },
            },
        );

        info!(workers = self.worker_threads, "server accept loop starting");
        while self.run_flag.load(Ordering::Acquire) {
            if let Err(e) = self.poller.wait(POLL_QUANTUM) {
                warn!(error = %e, "poller wait failed");
                continue;
            }
            let mut saw_ready = false;
            while let Some(token) = self.poller.next() {
                saw_ready = true;
                if token == self.listener_token {
                    self.accept_loop();
                } else {
                    self.task_queue.add_task(token);
                }
            }

            self.poll_cycles.fetch_add(1, Ordering::Relaxed);
            if !saw_ready && self.idle_flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                self.task_queue.add_idle_task();
            } else if self.poll_cycles.load(Ordering::Relaxed) % TIMER_EVERY_N_CYCLES == 0
                && self.timer_flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
            {
                self.task_queue.add_timer_task();
            }
        }
    }

    fn accept_loop(&self) {
        loop {
            let accepted = self.listener.lock().expect("listener mutex poisoned").accept();
            match accepted {
                Ok((std_stream, _addr)) => {
                    self.spawn_session(std_stream);
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                },
            }
        }
        if let Ok(mut listener) = self.listener.lock() {
            let _ = self.poller.undo(self.listener_token, &mut *listener, Interest::READABLE);
        }
    }

    fn spawn_session(&self, std_stream: StdTcpStream) {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = match Session::new(id, std_stream, self.session_timeout) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                warn!(error = %e, "failed to wrap accepted socket");
                return;
            },
        };
        let token = self.poller.new_token();
        let Ok(mut mio_stream) = session.try_clone_mio() else {
            return;
        };
        if self.poller.deposit(token, &mut mio_stream, Interest::READABLE).is_err() {
            return;
        }
        self.sessions.insert(token, session);
        debug!(session_id = id, "session accepted");
    }

    /// Clears the run flag and wakes the accept loop. Does not itself wait
    /// for in-flight work — call [`Self::finish`] afterward for that.
    pub fn stop(&self) {
        self.run_flag.store(false, Ordering::Release);
        self.poller.abort();
    }

    /// Drains the task queue, closes every remaining session, and closes
    /// the poller and listening socket. After this returns, no sockets
    /// remain open and no worker threads remain running (spec §8).
    pub fn finish(&self) {
        self.task_queue.finish();
        for token in self.poller.tracked_tokens() {
            if let Some((_, session)) = self.sessions.remove(&token) {
                session.release_user_data();
                session.shutdown();
            }
        }
        self.poller.close();
        info!("server finished: all sessions closed, all workers joined");
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

fn close_session(poller: &Poller, sessions: &DashMap<Token, Arc<Session>>, token: Token) {
    if let Some((_, session)) = sessions.remove(&token) {
        if let Ok(mut mio_stream) = session.try_clone_mio() {
            let _ = poller.withdraw(token, &mut mio_stream);
        }
        session.release_user_data();
        session.shutdown();
    }
}
