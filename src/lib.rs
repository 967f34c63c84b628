// SPDX-License-Identifier: GPL-3.0-or-later

//! A threaded key-value database server: a non-blocking TCP substrate, an
//! HTTP/1.1 + RPC + binary request layer sharing one listening socket, and
//! a local MapReduce engine over an ordered KV store.

pub mod binary;
pub mod cfg;
pub mod client;
pub mod concurrency;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod kv;
pub mod mapreduce;
pub mod net;
pub mod rpc;
pub mod varint;
