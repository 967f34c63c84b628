// SPDX-License-Identifier: GPL-3.0-or-later

//! Request-line and header parsing, and body intake (spec §4.4).

use std::collections::HashMap;

use super::chunked::read_chunked_body;
use super::status::Method;
use crate::error::KtError;
use crate::net::Session;

/// Maximum accepted request body (spec §6 "Error byte-size limit").
pub const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;
const MAX_LINE_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub version_minor: u8,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub keep_alive: bool,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Parses one HTTP/1.x request off `session`. Returns `Ok(None)` if the
    /// peer closed the connection before sending a request line (a clean
    /// end-of-keep-alive, not an error).
    pub fn parse(session: &Session) -> Result<Option<Request>, KtError> {
        let Some(line) = session.receive_line(MAX_LINE_BYTES) else {
            return Ok(None);
        };
        if line.is_empty() {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&line).into_owned();
        let mut parts = line.splitn(3, ' ');
        let method_str = parts.next().ok_or_else(|| KtError::Protocol("missing method".into()))?;
        let target = parts.next().ok_or_else(|| KtError::Protocol("missing request target".into()))?;
        let version = parts.next().ok_or_else(|| KtError::Protocol("missing HTTP version".into()))?;

        let version_minor = parse_version_minor(version)?;
        let method = Method::parse(method_str);
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (target.to_string(), String::new()),
        };

        let headers = parse_headers(session)?;

        let mut keep_alive = version_minor >= 1;
        if let Some(conn) = headers.get("connection") {
            let conn = conn.to_ascii_lowercase();
            keep_alive = conn.contains("keep-alive") || (!conn.contains("close") && keep_alive);
            if conn.contains("close") {
                keep_alive = false;
            }
        }

        let body = if method.may_have_body() { read_body(session, &headers)? } else { Vec::new() };

        Ok(Some(Request { method, path, query, version_minor, headers, body, keep_alive }))
    }
}

fn parse_version_minor(version: &str) -> Result<u8, KtError> {
    match version {
        "HTTP/1.0" => Ok(0),
        "HTTP/1.1" => Ok(1),
        _ => Err(KtError::Protocol(format!("unsupported HTTP version: {version}"))),
    }
}

fn parse_headers(session: &Session) -> Result<HashMap<String, String>, KtError> {
    let mut headers = HashMap::new();
    loop {
        let line = session.receive_line(MAX_LINE_BYTES).ok_or_else(|| KtError::Protocol("truncated headers".into()))?;
        if line.is_empty() {
            break;
        }
        let line = String::from_utf8_lossy(&line).into_owned();
        let (name, value) =
            line.split_once(':').ok_or_else(|| KtError::Protocol(format!("invalid header line: {line}")))?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }
    Ok(headers)
}

fn read_body(session: &Session, headers: &HashMap<String, String>) -> Result<Vec<u8>, KtError> {
    if headers.get("transfer-encoding").map(|v| v.eq_ignore_ascii_case("chunked")).unwrap_or(false) {
        return read_chunked_body(session, MAX_BODY_BYTES);
    }
    let Some(len) = headers.get("content-length") else {
        return Ok(Vec::new());
    };
    let len: usize = len.trim().parse().map_err(|_| KtError::Protocol("invalid content-length".into()))?;
    if len > MAX_BODY_BYTES {
        return Err(KtError::Capacity("request body exceeds maximum size".into()));
    }
    session.receive(len).ok_or_else(|| KtError::Protocol("truncated request body".into()))
}
