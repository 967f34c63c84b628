// SPDX-License-Identifier: GPL-3.0-or-later

//! Response assembly (spec §4.4): status line, server date header,
//! `connection`/`content-length`, validated user headers, then the body
//! (omitted for HEAD/304).

use chrono::Utc;

use super::status::{Method, reason_phrase};
use crate::error::KtError;
use crate::net::Session;

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Response { status, headers: Vec::new(), body: Vec::new() }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Serializes this response for `method`, honoring `keep_alive`.
    /// Rejects any user header whose name contains `':'` or a space (spec
    /// §4.4 "validated against ':' and ' ' in names").
    pub fn serialize(&self, method: Method, keep_alive: bool) -> Result<Vec<u8>, KtError> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(
            format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status)).as_bytes(),
        );
        out.extend_from_slice(format!("date: {}\r\n", rfc1123_now()).as_bytes());
        if !keep_alive {
            out.extend_from_slice(b"connection: close\r\n");
        }
        let suppress_body = matches!(method, Method::Head) || self.status == 304;
        if !suppress_body {
            out.extend_from_slice(format!("content-length: {}\r\n", self.body.len()).as_bytes());
        }
        for (name, value) in &self.headers {
            if name.contains(':') || name.contains(' ') {
                return Err(KtError::Protocol(format!("invalid response header name: {name}")));
            }
            out.extend_from_slice(format!("{}: {}\r\n", name.to_ascii_lowercase(), value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        if !suppress_body {
            out.extend_from_slice(&self.body);
        }
        Ok(out)
    }

    pub fn send(&self, session: &Session, method: Method, keep_alive: bool) -> Result<bool, KtError> {
        let bytes = self.serialize(method, keep_alive)?;
        Ok(session.send(&bytes))
    }
}

fn rfc1123_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_response_omits_body_and_content_length() {
        let resp = Response::new(200).with_body(b"hello".to_vec());
        let bytes = resp.serialize(Method::Head, true).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("content-length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn get_response_includes_content_length_and_body() {
        let resp = Response::new(200).with_body(b"hello".to_vec());
        let bytes = resp.serialize(Method::Get, true).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("content-length: 5"));
        assert!(text.ends_with("hello"));
        assert!(!text.contains("connection: close"));
    }

    #[test]
    fn non_keep_alive_adds_connection_close() {
        let resp = Response::new(200);
        let bytes = resp.serialize(Method::Get, false).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("connection: close"));
    }

    #[test]
    fn rejects_invalid_header_name() {
        let resp = Response::new(200).with_header("bad:name", "x");
        assert!(matches!(resp.serialize(Method::Get, true), Err(KtError::Protocol(_))));
    }

    #[test]
    fn status_450_used_for_logical_inconsistency() {
        let resp = Response::new(450);
        let bytes = resp.serialize(Method::Get, true).unwrap();
        assert!(String::from_utf8(bytes).unwrap().starts_with("HTTP/1.1 450 Logical Inconsistency"));
    }
}
