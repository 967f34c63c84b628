// SPDX-License-Identifier: GPL-3.0-or-later

//! Chunked transfer-encoding codec (spec §4.4, §9 "Chunked transfer and
//! variable-length integer emit/decode... must be implemented identically
//! on both client and server"). Decode only — this core never emits
//! chunked responses (spec §4.4's response assembly always sends a
//! `content-length`).

use crate::error::KtError;
use crate::net::Session;

const CRLF: &[u8] = b"\r\n";

/// Parses a chunk-size line (`"<hex size>[;ext]"`) into its byte count.
pub fn parse_chunk_size_line(line: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(line).ok()?;
    let size_part = text.split(';').next()?.trim();
    u64::from_str_radix(size_part, 16).ok()
}

/// Reads a full chunked body from `session`: repeat {hex size-line, that
/// many bytes, trailing CRLF} until a zero-size chunk terminates the
/// stream. Any malformed chunk is `KtError::Protocol` (spec §4.4
/// "malformed chunking yields a 400").
pub fn read_chunked_body(session: &Session, max_total: usize) -> Result<Vec<u8>, KtError> {
    let mut body = Vec::new();
    loop {
        let size_line = session
            .receive_line(64)
            .ok_or_else(|| KtError::Protocol("truncated chunk size line".into()))?;
        let size = parse_chunk_size_line(&size_line)
            .ok_or_else(|| KtError::Protocol("malformed chunk size".into()))?;
        if size == 0 {
            // consume the trailing CRLF after the terminating zero chunk
            let _ = session.receive_line(2);
            return Ok(body);
        }
        if body.len() + size as usize > max_total {
            return Err(KtError::Capacity("chunked body exceeds maximum size".into()));
        }
        let chunk = session
            .receive(size as usize)
            .ok_or_else(|| KtError::Protocol("truncated chunk body".into()))?;
        body.extend_from_slice(&chunk);
        let trailer = session.receive(2).ok_or_else(|| KtError::Protocol("missing chunk CRLF".into()))?;
        if trailer != CRLF {
            return Err(KtError::Protocol("malformed chunk terminator".into()));
        }
    }
}

/// Encodes `data` as a single chunk followed by the terminating zero
/// chunk — used only by tests and by the remote client's test harness to
/// exercise the decoder without a live socket.
pub fn encode_single_chunk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{:x}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(CRLF);
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    use super::*;

    fn session_with(bytes: &[u8]) -> Session {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        client.write_all(bytes).unwrap();
        Session::new(1, server, Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn parses_hex_size_with_extension() {
        assert_eq!(parse_chunk_size_line(b"1a;foo=bar"), Some(26));
        assert_eq!(parse_chunk_size_line(b"0"), Some(0));
        assert_eq!(parse_chunk_size_line(b"not-hex"), None);
    }

    #[test]
    fn decodes_multi_chunk_body() {
        let wire = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        let session = session_with(wire);
        let body = read_chunked_body(&session, 1024).unwrap();
        assert_eq!(body, b"hello world");
    }

    #[test]
    fn single_chunk_round_trips_through_encoder() {
        let wire = encode_single_chunk(b"payload");
        let session = session_with(&wire);
        let body = read_chunked_body(&session, 1024).unwrap();
        assert_eq!(body, b"payload");
    }

    #[test]
    fn rejects_body_over_max_size() {
        let wire = b"a\r\n0123456789\r\n0\r\n\r\n";
        let session = session_with(wire);
        assert!(matches!(read_chunked_body(&session, 5), Err(KtError::Capacity(_))));
    }

    #[test]
    fn rejects_malformed_chunk_terminator() {
        let wire = b"5\r\nhelloXX0\r\n\r\n";
        let session = session_with(wire);
        assert!(matches!(read_chunked_body(&session, 1024), Err(KtError::Protocol(_))));
    }
}
