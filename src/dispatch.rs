// SPDX-License-Identifier: GPL-3.0-or-later

//! The top-level first-byte dispatcher (spec §2 "Flow": "Each worker peeks
//! one byte: values 0x80..0xFE enter the binary dispatcher... everything
//! else enters HTTP framing"). Sits in front of [`crate::http::HttpRequestHandler`]
//! and [`crate::binary::BinaryRequestHandler`], both of which already
//! implement [`RequestHandler`] on their own; this just peeks and routes.

use crate::binary::BinaryRequestHandler;
use crate::http::{HttpRequestHandler, Router};
use crate::net::{HandlerOutcome, RequestHandler, Session};

const BINARY_RANGE: std::ops::RangeInclusive<u8> = 0x80..=0xFE;

/// Routes each request on a session to the binary or HTTP handler by
/// peeking its first byte, without consuming it.
pub struct DispatchHandler<R: Router> {
    http: HttpRequestHandler<R>,
    binary: BinaryRequestHandler,
}

impl<R: Router> DispatchHandler<R> {
    pub fn new(router: R, binary: BinaryRequestHandler) -> Self {
        DispatchHandler { http: HttpRequestHandler { router }, binary }
    }
}

impl<R: Router> RequestHandler for DispatchHandler<R> {
    fn handle(&self, session: &Session) -> HandlerOutcome {
        let Some(magic) = session.receive_byte() else {
            return HandlerOutcome::Close;
        };
        session.undo_receive_byte(magic);

        if BINARY_RANGE.contains(&magic) {
            self.binary.handle(session)
        } else {
            self.http.handle(session)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::http::{Request, Response};
    use crate::kv::memory::MemoryDatabase;

    struct EchoRouter;
    impl Router for EchoRouter {
        fn route(&self, _req: &Request) -> Response {
            Response::new(200).with_body(b"http".to_vec())
        }
    }

    fn connected_pair() -> (Session, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (Session::new(1, server, Duration::from_secs(2)).unwrap(), client)
    }

    #[test]
    fn http_bytes_route_to_the_http_handler() {
        use std::io::{Read, Write};
        let (session, mut client) = connected_pair();
        let db = Arc::new(MemoryDatabase::new());
        let handler = DispatchHandler::new(EchoRouter, BinaryRequestHandler::new(db));
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(handler.handle(&session), HandlerOutcome::Keep);
        let mut buf = [0u8; 256];
        let n = client.read(&mut buf).unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).ends_with("http"));
    }

    #[test]
    fn binary_magic_routes_to_the_binary_handler() {
        use std::io::{Read, Write};
        let (session, mut client) = connected_pair();
        let db = Arc::new(MemoryDatabase::new());
        let handler = DispatchHandler::new(EchoRouter, BinaryRequestHandler::new(db));
        client.write_all(&[crate::binary::MAGIC_NOP, 0x00]).unwrap();
        assert_eq!(handler.handle(&session), HandlerOutcome::Keep);
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [crate::binary::MAGIC_NOP, 0x00]);
    }
}
