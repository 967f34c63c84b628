// SPDX-License-Identifier: GPL-3.0-or-later

//! The socket/poller/task-queue/server substrate (spec §4.1–§4.3): the
//! non-blocking accept loop and per-connection session bookkeeping that
//! the HTTP, RPC, and binary dispatch layers all run on top of.

pub mod poller;
pub mod server;
pub mod session;
pub mod task_queue;

pub use poller::Poller;
pub use server::{HandlerOutcome, RequestHandler, ServerConfigLite, ServerHooks, ThreadedServer};
pub use session::Session;
pub use task_queue::TaskQueue;
