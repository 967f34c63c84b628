// SPDX-License-Identifier: GPL-3.0-or-later

//! Spec §8 scenario 1: "HTTP echo" — two keep-alive requests on one TCP
//! connection, each answered by a user-supplied [`Router`] (spec §2
//! "others fall through to a user-provided HTTP handler"), confirming
//! request/response ordering and keep-alive framing end to end.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use tycoondb::binary::BinaryRequestHandler;
use tycoondb::dispatch::DispatchHandler;
use tycoondb::http::{Request, Response, Router};
use tycoondb::kv::memory::MemoryDatabase;
use tycoondb::net::{ServerConfigLite, ThreadedServer};

struct EchoRouter;

impl Router for EchoRouter {
    fn route(&self, req: &Request) -> Response {
        Response::new(200).with_body(req.body.clone())
    }
}

#[test]
fn two_keep_alive_requests_on_one_connection_get_their_own_bodies_back_in_order() {
    let db = Arc::new(MemoryDatabase::new());
    let handler = Arc::new(DispatchHandler::new(EchoRouter, BinaryRequestHandler::new(db)));
    let cfg = ServerConfigLite { worker_threads: 2, session_timeout: Duration::from_secs(5) };
    let server = Arc::new(ThreadedServer::bind("127.0.0.1:0".parse().unwrap(), cfg, handler).unwrap());
    let addr = server.local_addr().unwrap();

    let run_server = server.clone();
    let run_thread = std::thread::spawn(move || run_server.run());
    std::thread::sleep(Duration::from_millis(50));

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    client.write_all(b"POST /foo HTTP/1.1\r\ncontent-length: 5\r\nconnection: keep-alive\r\n\r\nhello").unwrap();
    assert_eq!(read_body_after_headers(&mut client), b"hello");

    client.write_all(b"POST /foo HTTP/1.1\r\ncontent-length: 5\r\nconnection: close\r\n\r\nworld").unwrap();
    assert_eq!(read_body_after_headers(&mut client), b"world");

    // The server closed after "connection: close"; a further read returns EOF.
    let mut buf = [0u8; 1];
    assert_eq!(client.read(&mut buf).unwrap(), 0);

    server.stop();
    run_thread.join().unwrap();
    server.finish();
}

fn read_body_after_headers(stream: &mut TcpStream) -> Vec<u8> {
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).unwrap();
        raw.push(byte[0]);
        if raw.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    let header_text = String::from_utf8_lossy(&raw);
    let content_length: usize = header_text
        .lines()
        .find_map(|line| line.to_ascii_lowercase().starts_with("content-length:").then(|| line))
        .and_then(|line| line.split_once(':'))
        .map(|(_, v)| v.trim().parse().unwrap())
        .unwrap_or(0);
    let mut body = vec![0u8; content_length];
    stream.read_exact(&mut body).unwrap();
    body
}
