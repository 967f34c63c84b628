// SPDX-License-Identifier: GPL-3.0-or-later

//! Shared harness for the end-to-end scenarios in spec §8: binds a real
//! [`ThreadedServer`] to an ephemeral port with the same dispatch stack
//! `main.rs` wires up, and tears it down cleanly on drop so a panicking
//! assertion never leaks a worker thread into the next test.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tycoondb::binary::BinaryRequestHandler;
use tycoondb::dispatch::DispatchHandler;
use tycoondb::http::{PrefixRouter, Request, Response, Router};
use tycoondb::kv::Database;
use tycoondb::kv::memory::MemoryDatabase;
use tycoondb::net::{ServerConfigLite, ThreadedServer};
use tycoondb::rpc::RpcRouter;

pub struct NotFound;

impl Router for NotFound {
    fn route(&self, _req: &Request) -> Response {
        Response::new(404)
    }
}

type TestServer = ThreadedServer<DispatchHandler<PrefixRouter>>;

/// A running server plus the database it was wired to, and the join handle
/// for its accept-loop thread. Dropping this stops and finishes the server
/// (spec §8 "After `ThreadedServer::finish`, no sockets remain open and no
/// threads remain running").
pub struct TestHarness {
    pub addr: SocketAddr,
    pub db: Arc<dyn Database>,
    server: Arc<TestServer>,
    run_thread: Option<std::thread::JoinHandle<()>>,
}

impl TestHarness {
    pub fn start() -> Self {
        Self::start_with_workers(4)
    }

    pub fn start_with_workers(worker_threads: usize) -> Self {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let rpc = RpcRouter::new("/rpc/", db.clone());
        let router = PrefixRouter { rpc_prefix: "/rpc/".into(), rpc: Box::new(rpc), fallback: Box::new(NotFound) };
        let binary = BinaryRequestHandler::new(db.clone());
        let handler = Arc::new(DispatchHandler::new(router, binary));

        let cfg = ServerConfigLite { worker_threads, session_timeout: Duration::from_secs(5) };
        let server = Arc::new(
            ThreadedServer::bind("127.0.0.1:0".parse().unwrap(), cfg, handler)
                .expect("failed to bind ephemeral test server"),
        );
        let addr = server.local_addr().expect("server has no local addr");

        let run_server = server.clone();
        let run_thread = std::thread::spawn(move || run_server.run());
        // Give the accept loop a moment to arm the listening socket before
        // the first client connects.
        std::thread::sleep(Duration::from_millis(50));

        TestHarness { addr, db, server, run_thread: Some(run_thread) }
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.server.stop();
        if let Some(t) = self.run_thread.take() {
            let _ = t.join();
        }
        self.server.finish();
    }
}
