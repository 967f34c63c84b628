// SPDX-License-Identifier: GPL-3.0-or-later

//! The reference server binary: loads configuration, wires the HTTP/RPC/
//! binary dispatch stack onto the in-memory [`kv::memory::MemoryDatabase`],
//! and runs [`net::ThreadedServer`] until the process is killed.
//!
//! Command-line front ends are explicitly out of scope for the core (spec
//! §1) — this binary is a thin, uninteresting driver over the library, not
//! part of the specified surface.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tycoondb::binary::BinaryRequestHandler;
use tycoondb::cfg::cli::resolve_config_path;
use tycoondb::cfg::config::ServerConfig;
use tycoondb::cfg::logger::init_logger;
use tycoondb::concurrency::ConditionMap;
use tycoondb::dispatch::DispatchHandler;
use tycoondb::http::{PrefixRouter, Request, Response, Router, StaticFileRouter};
use tycoondb::kv::Database;
use tycoondb::kv::memory::MemoryDatabase;
use tycoondb::net::{ServerConfigLite, ServerHooks, ThreadedServer};
use tycoondb::rpc::RpcRouter;

/// Fallback router used when no `document_root` is configured: every
/// non-RPC path simply 404s (spec §6 static serving is optional).
struct NotFoundRouter;

impl Router for NotFoundRouter {
    fn route(&self, _req: &Request) -> Response {
        Response::new(404)
    }
}

/// Periodic housekeeping driven off the server's timer task (spec §4.3):
/// sweeping condition-map entries nobody is waiting on anymore so a
/// long-running server does not accumulate one entry per distinct `WAIT`
/// name ever used.
struct Housekeeping {
    conditions: Arc<ConditionMap>,
}

impl ServerHooks for Housekeeping {
    fn on_timer(&self) {
        self.conditions.reap_unused();
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "tycoondb",
    about = "Threaded KV database server: HTTP/RPC + binary protocols over a local KV store"
)]
struct Cli {
    /// Path to a YAML server config. Relative paths resolve against the
    /// current working directory. Missing file falls back to defaults.
    #[arg(short, long, default_value = "tycoondb.yaml")]
    config: String,

    /// Overrides `port` from the config file.
    #[arg(short, long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = resolve_config_path(&cli.config)
        .and_then(ServerConfig::load_from_file)
        .unwrap_or_default();
    if let Some(p) = cli.port {
        config.port = p;
    }
    config.validate_and_normalize().context("invalid server configuration")?;

    let _log_guard = init_logger(&config.log).context("failed to initialize logger")?;

    let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
    let rpc = RpcRouter::new(config.rpc_prefix.clone(), db.clone());
    let conditions = rpc.conditions.clone();

    let fallback: Box<dyn Router> = match &config.document_root {
        Some(root) => Box::new(StaticFileRouter { root: root.into() }),
        None => Box::new(NotFoundRouter),
    };
    let router = PrefixRouter { rpc_prefix: config.rpc_prefix.clone(), rpc: Box::new(rpc), fallback };
    let binary = BinaryRequestHandler::new(db.clone());
    let handler = Arc::new(DispatchHandler::new(router, binary));

    let addr = SocketAddr::new(config.listen_addr, config.port);
    let server_cfg =
        ServerConfigLite { worker_threads: config.worker_threads, session_timeout: config.session_timeout };
    let hooks = Arc::new(Housekeeping { conditions });
    let server = Arc::new(
        ThreadedServer::bind_with_hooks(addr, server_cfg, handler, hooks)
            .with_context(|| format!("failed to bind {addr}"))?,
    );

    info!(%addr, workers = config.worker_threads, "tycoondb listening");
    server.run();
    server.finish();
    Ok(())
}
