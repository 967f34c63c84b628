// SPDX-License-Identifier: GPL-3.0-or-later

//! The remote client's connection (spec §4.7): one HTTP/RPC connection
//! with lazy reconnect on network error, grounded on the teacher's
//! `ClientConnection` (one socket, framed request/response, auto-retry on
//! a torn connection) with the `tokio` half-split reader/writer replaced
//! by a single blocking `TcpStream` behind a mutex, matching this crate's
//! synchronous, thread-per-connection model (see "Dropped teacher
//! dependencies" in DESIGN.md).

use std::collections::HashMap;
use std::io::{BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

use super::cursor::RemoteCursor;
use crate::rpc::colenc::ColEnc;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_STATUS_LINE_BYTES: usize = 4 * 1024;
const MAX_HEADER_BYTES: usize = 64 * 1024;
const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error talking to {0}: {1}")]
    Io(SocketAddr, std::io::Error),
    #[error("rpc call failed with status {status}: {message}")]
    Rpc { status: u16, message: String },
    #[error("malformed response from server: {0}")]
    Protocol(String),
}

impl ClientError {
    /// True for a `get`/`cur_*` call against a key or cursor the server
    /// has no record of (RV 450, spec §4.5's RV table folds `NoRecord`
    /// into `ELOGIC`), as opposed to a genuine protocol or network fault.
    pub fn is_no_record(&self) -> bool {
        matches!(self, ClientError::Rpc { status: 450, .. })
    }
}

/// One RPC connection to a server (spec §4.7). Connects lazily on first
/// use and transparently reconnects once after any I/O error — callers
/// never see a "not connected" error, only the underlying call's outcome.
pub struct RemoteClient {
    addr: SocketAddr,
    rpc_prefix: String,
    timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl RemoteClient {
    pub fn new(addr: SocketAddr) -> Self {
        RemoteClient { addr, rpc_prefix: "/rpc/".to_string(), timeout: DEFAULT_TIMEOUT, stream: Mutex::new(None) }
    }

    pub fn with_rpc_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.rpc_prefix = prefix.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Drops the underlying socket, if any. The next call reconnects
    /// lazily (spec §4.7 "open/close").
    pub fn close(&self) {
        *self.stream.lock().expect("client stream mutex poisoned") = None;
    }

    /// Calls RPC procedure `name` with `params`, returning the output
    /// fields keyed by name. A `NoRecord`/`Logic` outcome on the server
    /// surfaces as `ClientError::Rpc { status: 450, .. }` — check
    /// [`ClientError::is_no_record`] rather than matching the number.
    pub fn call(&self, name: &str, params: &[(&str, &[u8])]) -> Result<HashMap<String, Vec<u8>>, ClientError> {
        let body = encode_request_tsv(params);
        let mut guard = self.stream.lock().expect("client stream mutex poisoned");

        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        match self.call_on(guard.as_mut().expect("populated above"), name, &body) {
            Err(ClientError::Io(..)) => {
                // Stale or reset connection: reconnect once and retry the
                // same call before giving up (spec §4.7 "lazy reconnect
                // on network error").
                *guard = Some(self.connect()?);
                self.call_on(guard.as_mut().expect("populated above"), name, &body)
            },
            other => other,
        }
    }

    fn connect(&self) -> Result<TcpStream, ClientError> {
        let stream =
            TcpStream::connect_timeout(&self.addr, self.timeout).map_err(|e| ClientError::Io(self.addr, e))?;
        stream.set_nodelay(true).map_err(|e| ClientError::Io(self.addr, e))?;
        stream.set_read_timeout(Some(self.timeout)).map_err(|e| ClientError::Io(self.addr, e))?;
        stream.set_write_timeout(Some(self.timeout)).map_err(|e| ClientError::Io(self.addr, e))?;
        Ok(stream)
    }

    fn call_on(
        &self,
        stream: &mut TcpStream,
        name: &str,
        body: &[u8],
    ) -> Result<HashMap<String, Vec<u8>>, ClientError> {
        let mut request = Vec::with_capacity(160 + body.len());
        request.extend_from_slice(format!("POST {}{name} HTTP/1.1\r\n", self.rpc_prefix).as_bytes());
        request.extend_from_slice(format!("host: {}\r\n", self.addr).as_bytes());
        request.extend_from_slice(b"content-type: text/tab-separated-values; colenc=B\r\n");
        request.extend_from_slice(format!("content-length: {}\r\n", body.len()).as_bytes());
        request.extend_from_slice(b"connection: keep-alive\r\n\r\n");
        request.extend_from_slice(body);
        stream.write_all(&request).map_err(|e| ClientError::Io(self.addr, e))?;

        let mut reader = BufReader::new(&mut *stream);
        let (status, headers) = read_status_and_headers(&mut reader, self.addr)?;
        let content_length: usize = headers
            .get("content-length")
            .map(|v| v.trim().parse().unwrap_or(0))
            .unwrap_or(0);
        if content_length > MAX_BODY_BYTES {
            return Err(ClientError::Protocol("response body exceeds maximum size".into()));
        }
        let mut resp_body = vec![0u8; content_length];
        reader.read_exact(&mut resp_body).map_err(|e| ClientError::Io(self.addr, e))?;

        let colenc = headers
            .get("content-type")
            .and_then(|v| v.split(';').find_map(|attr| attr.trim().strip_prefix("colenc=")))
            .and_then(ColEnc::from_attribute);
        let outputs = decode_response_tsv(&resp_body, colenc)?;

        if !(200..300).contains(&status) {
            let message = outputs
                .get("ERROR")
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .unwrap_or_else(|| format!("rpc status {status}"));
            return Err(ClientError::Rpc { status, message });
        }
        Ok(outputs)
    }
}

/// One emitted match, in server-reported order (spec §4.7 "result
/// ordering preserved via an integer 'order' field").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchHit {
    pub order: u64,
    pub key: Vec<u8>,
}

impl RemoteClient {
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, ClientError> {
        let mut outputs = self.call("get", &[("key", key)])?;
        outputs.remove("value").ok_or_else(|| ClientError::Protocol("get response missing 'value'".into()))
    }

    pub fn set(&self, key: &[u8], value: &[u8], xt: Option<Duration>) -> Result<(), ClientError> {
        let mut params = vec![("key", key), ("value", value)];
        let xt_text = xt.map(|d| d.as_secs_f64().to_string());
        if let Some(xt_text) = &xt_text {
            params.push(("xt", xt_text.as_bytes()));
        }
        self.call("set", &params).map(drop)
    }

    pub fn add(&self, key: &[u8], value: &[u8], xt: Option<Duration>) -> Result<(), ClientError> {
        let xt_text = xt.map(|d| d.as_secs_f64().to_string());
        let mut params = vec![("key", key), ("value", value)];
        if let Some(xt_text) = &xt_text {
            params.push(("xt", xt_text.as_bytes()));
        }
        self.call("add", &params).map(drop)
    }

    pub fn replace(&self, key: &[u8], value: &[u8], xt: Option<Duration>) -> Result<(), ClientError> {
        let xt_text = xt.map(|d| d.as_secs_f64().to_string());
        let mut params = vec![("key", key), ("value", value)];
        if let Some(xt_text) = &xt_text {
            params.push(("xt", xt_text.as_bytes()));
        }
        self.call("replace", &params).map(drop)
    }

    pub fn append(&self, key: &[u8], value: &[u8], xt: Option<Duration>) -> Result<(), ClientError> {
        let xt_text = xt.map(|d| d.as_secs_f64().to_string());
        let mut params = vec![("key", key), ("value", value)];
        if let Some(xt_text) = &xt_text {
            params.push(("xt", xt_text.as_bytes()));
        }
        self.call("append", &params).map(drop)
    }

    pub fn cas(&self, key: &[u8], oval: Option<&[u8]>, nval: Option<&[u8]>) -> Result<(), ClientError> {
        let mut params = vec![("key", key)];
        if let Some(oval) = oval {
            params.push(("oval", oval));
        }
        if let Some(nval) = nval {
            params.push(("nval", nval));
        }
        self.call("cas", &params).map(drop)
    }

    pub fn remove(&self, key: &[u8]) -> Result<(), ClientError> {
        self.call("remove", &[("key", key)]).map(drop)
    }

    pub fn seize(&self, key: &[u8]) -> Result<Vec<u8>, ClientError> {
        let mut outputs = self.call("seize", &[("key", key)])?;
        outputs.remove("value").ok_or_else(|| ClientError::Protocol("seize response missing 'value'".into()))
    }

    pub fn check(&self, key: &[u8]) -> Result<u64, ClientError> {
        let outputs = self.call("check", &[("key", key)])?;
        parse_field(&outputs, "vsiz")
    }

    pub fn increment(&self, key: &[u8], delta: i64, xt: Option<Duration>) -> Result<i64, ClientError> {
        let delta_text = delta.to_string();
        let xt_text = xt.map(|d| d.as_secs_f64().to_string());
        let mut params = vec![("key", key), ("num", delta_text.as_bytes())];
        if let Some(xt_text) = &xt_text {
            params.push(("xt", xt_text.as_bytes()));
        }
        let outputs = self.call("increment", &params)?;
        parse_field(&outputs, "num")
    }

    pub fn increment_double(&self, key: &[u8], delta: f64, xt: Option<Duration>) -> Result<f64, ClientError> {
        let delta_text = delta.to_string();
        let xt_text = xt.map(|d| d.as_secs_f64().to_string());
        let mut params = vec![("key", key), ("num", delta_text.as_bytes())];
        if let Some(xt_text) = &xt_text {
            params.push(("xt", xt_text.as_bytes()));
        }
        let outputs = self.call("increment_double", &params)?;
        parse_field(&outputs, "num")
    }

    pub fn clear(&self) -> Result<(), ClientError> {
        self.call("clear", &[]).map(drop)
    }

    pub fn synchronize(&self) -> Result<(), ClientError> {
        self.call("synchronize", &[]).map(drop)
    }

    pub fn report(&self) -> Result<HashMap<String, Vec<u8>>, ClientError> {
        self.call("report", &[])
    }

    pub fn status(&self) -> Result<HashMap<String, Vec<u8>>, ClientError> {
        self.call("status", &[])
    }

    /// Always fails with a 501 `NotImplemented`-mapped [`ClientError::Rpc`]
    /// — the server only accepts replication-tuning frames over the
    /// binary channel (spec §6), not as RPC procedures.
    pub fn play_script(&self, name: &str, params: &[(&str, &[u8])]) -> Result<HashMap<String, Vec<u8>>, ClientError> {
        let mut all = vec![("name", name.as_bytes())];
        all.extend_from_slice(params);
        self.call("play_script", &all)
    }

    pub fn match_prefix(&self, prefix: &[u8], max: Option<usize>) -> Result<Vec<MatchHit>, ClientError> {
        let max_text = max.map(|m| m.to_string());
        let mut params = vec![("prefix", prefix)];
        if let Some(max_text) = &max_text {
            params.push(("max", max_text.as_bytes()));
        }
        match_hits_from(self.call("match_prefix", &params)?)
    }

    pub fn match_regex(&self, pattern: &str, max: Option<usize>) -> Result<Vec<MatchHit>, ClientError> {
        let max_text = max.map(|m| m.to_string());
        let mut params = vec![("regex", pattern.as_bytes())];
        if let Some(max_text) = &max_text {
            params.push(("max", max_text.as_bytes()));
        }
        match_hits_from(self.call("match_regex", &params)?)
    }

    pub fn match_similar(&self, origin: &[u8], range: u32, max: Option<usize>) -> Result<Vec<MatchHit>, ClientError> {
        let range_text = range.to_string();
        let max_text = max.map(|m| m.to_string());
        let mut params = vec![("origin", origin), ("range", range_text.as_bytes())];
        if let Some(max_text) = &max_text {
            params.push(("max", max_text.as_bytes()));
        }
        match_hits_from(self.call("match_similar", &params)?)
    }

    pub fn set_bulk(&self, records: &[(&[u8], &[u8])], xt: Option<Duration>) -> Result<u64, ClientError> {
        let xt_text = xt.map(|d| d.as_secs_f64().to_string());
        let mut params: Vec<(&str, &[u8])> = Vec::with_capacity(records.len() + 1);
        let keys: Vec<String> = records
            .iter()
            .map(|(k, _)| String::from_utf8_lossy(k).into_owned())
            .collect();
        for ((_, value), key) in records.iter().zip(keys.iter()) {
            params.push((key.as_str(), value));
        }
        if let Some(xt_text) = &xt_text {
            params.push(("xt", xt_text.as_bytes()));
        }
        let outputs = self.call("set_bulk", &params)?;
        parse_field(&outputs, "num")
    }

    pub fn remove_bulk(&self, keys: &[&[u8]]) -> Result<u64, ClientError> {
        let key_texts: Vec<String> = keys.iter().map(|k| String::from_utf8_lossy(k).into_owned()).collect();
        let params: Vec<(&str, &[u8])> =
            key_texts.iter().zip(keys.iter()).map(|(text, key)| (text.as_str(), *key)).collect();
        let outputs = self.call("remove_bulk", &params)?;
        parse_field(&outputs, "num")
    }

    pub fn get_bulk(&self, keys: &[&[u8]]) -> Result<HashMap<Vec<u8>, Vec<u8>>, ClientError> {
        let key_texts: Vec<String> = keys.iter().map(|k| String::from_utf8_lossy(k).into_owned()).collect();
        let params: Vec<(&str, &[u8])> =
            key_texts.iter().zip(keys.iter()).map(|(text, key)| (text.as_str(), *key)).collect();
        let outputs = self.call("get_bulk", &params)?;
        Ok(outputs
            .into_iter()
            .filter(|(k, _)| k != "num")
            .map(|(k, v)| (k.into_bytes(), v))
            .collect())
    }

    pub fn vacuum(&self) -> Result<(), ClientError> {
        self.call("vacuum", &[]).map(drop)
    }

    /// Opens a cursor positioned at the first record (spec §4.7 "cursor
    /// operations"). Requires `Arc<Self>` since the returned cursor holds
    /// only a [`Weak`](std::sync::Weak) reference back for its own
    /// `cur_delete` on drop (spec §4.7 "Cursor lifecycle").
    pub fn open_cursor(self: &Arc<Self>) -> Result<RemoteCursor, ClientError> {
        let outputs = self.call("cur_jump", &[])?;
        let id: u64 = parse_field(&outputs, "cur")?;
        Ok(RemoteCursor::new(Arc::downgrade(self), id))
    }
}

fn parse_field<T: std::str::FromStr>(outputs: &HashMap<String, Vec<u8>>, name: &str) -> Result<T, ClientError> {
    let raw = outputs.get(name).ok_or_else(|| ClientError::Protocol(format!("response missing '{name}'")))?;
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ClientError::Protocol(format!("response field '{name}' is not numeric")))
}

fn match_hits_from(outputs: HashMap<String, Vec<u8>>) -> Result<Vec<MatchHit>, ClientError> {
    let mut hits: Vec<MatchHit> = outputs
        .into_iter()
        .filter(|(k, _)| k != "num")
        .map(|(k, key)| {
            k.parse::<u64>().map(|order| MatchHit { order, key }).map_err(|_| {
                ClientError::Protocol(format!("match response key '{k}' is not a numeric order field"))
            })
        })
        .collect::<Result<_, _>>()?;
    hits.sort_by_key(|h| h.order);
    Ok(hits)
}

fn encode_request_tsv(params: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (key, value) in params {
        body.extend_from_slice(ColEnc::Base64.encode(key.as_bytes()).as_bytes());
        body.push(b'\t');
        body.extend_from_slice(ColEnc::Base64.encode(value).as_bytes());
        body.push(b'\n');
    }
    body
}

fn decode_response_tsv(body: &[u8], colenc: Option<ColEnc>) -> Result<HashMap<String, Vec<u8>>, ClientError> {
    let text = String::from_utf8_lossy(body);
    let mut outputs = HashMap::new();
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let (key_field, value_field) = line
            .split_once('\t')
            .ok_or_else(|| ClientError::Protocol(format!("malformed TSV response line: {line}")))?;
        let (key, value) = match colenc {
            Some(enc) => (
                enc.decode(key_field).map_err(|e| ClientError::Protocol(e.message()))?,
                enc.decode(value_field).map_err(|e| ClientError::Protocol(e.message()))?,
            ),
            None => (key_field.as_bytes().to_vec(), value_field.as_bytes().to_vec()),
        };
        outputs.insert(String::from_utf8_lossy(&key).into_owned(), value);
    }
    Ok(outputs)
}

fn read_status_and_headers(
    reader: &mut BufReader<&mut TcpStream>,
    addr: SocketAddr,
) -> Result<(u16, HashMap<String, String>), ClientError> {
    let status_line = read_line(reader, addr, MAX_STATUS_LINE_BYTES)?;
    let mut parts = status_line.splitn(3, ' ');
    let _version = parts.next().ok_or_else(|| ClientError::Protocol("missing HTTP version".into()))?;
    let status: u16 = parts
        .next()
        .ok_or_else(|| ClientError::Protocol("missing status code".into()))?
        .parse()
        .map_err(|_| ClientError::Protocol("non-numeric status code".into()))?;

    let mut headers = HashMap::new();
    let mut total = 0usize;
    loop {
        let line = read_line(reader, addr, MAX_HEADER_BYTES - total)?;
        total += line.len();
        if line.is_empty() {
            break;
        }
        let (name, value) =
            line.split_once(':').ok_or_else(|| ClientError::Protocol(format!("invalid header line: {line}")))?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }
    Ok((status, headers))
}

fn read_line(reader: &mut BufReader<&mut TcpStream>, addr: SocketAddr, max: usize) -> Result<String, ClientError> {
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if raw.len() >= max {
            return Err(ClientError::Protocol("response line too long".into()));
        }
        let n = reader.read(&mut byte).map_err(|e| ClientError::Io(addr, e))?;
        if n == 0 {
            return Err(ClientError::Io(addr, std::io::Error::from(std::io::ErrorKind::UnexpectedEof)));
        }
        if byte[0] == b'\n' {
            break;
        }
        raw.push(byte[0]);
    }
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    String::from_utf8(raw).map_err(|_| ClientError::Protocol("response line is not valid UTF-8".into()))
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::Arc;

    use super::*;
    use crate::http::{HttpRequestHandler, PrefixRouter, Router};
    use crate::kv::memory::MemoryDatabase;
    use crate::net::{ServerConfigLite, ThreadedServer};
    use crate::rpc::RpcRouter;

    struct NotFoundRouter;
    impl Router for NotFoundRouter {
        fn route(&self, _req: &crate::http::Request) -> crate::http::Response {
            crate::http::Response::new(404)
        }
    }

    fn spawn_server() -> (SocketAddr, Arc<ThreadedServer<HttpRequestHandler<PrefixRouter>>>) {
        let db: Arc<dyn crate::kv::Database> = Arc::new(MemoryDatabase::new());
        let rpc = RpcRouter::new("/rpc/", db);
        let router = PrefixRouter { rpc_prefix: "/rpc/".into(), rpc: Box::new(rpc), fallback: Box::new(NotFoundRouter) };
        let handler = HttpRequestHandler { router };
        let cfg = ServerConfigLite { worker_threads: 2, session_timeout: Duration::from_secs(2) };
        let server =
            Arc::new(ThreadedServer::bind("127.0.0.1:0".parse().unwrap(), cfg, Arc::new(handler)).unwrap());
        let addr = server.local_addr().unwrap();
        let run = server.clone();
        std::thread::spawn(move || run.run());
        std::thread::sleep(Duration::from_millis(100));
        (addr, server)
    }

    #[test]
    fn set_then_get_round_trips_through_a_real_server() {
        let (addr, server) = spawn_server();
        let client = RemoteClient::new(addr);

        client.call("set", &[("key", b"alpha"), ("value", b"one")]).unwrap();
        let outputs = client.call("get", &[("key", b"alpha")]).unwrap();
        assert_eq!(outputs.get("value").unwrap(), b"one");

        server.stop();
        server.finish();
    }

    #[test]
    fn missing_key_surfaces_as_no_record() {
        let (addr, server) = spawn_server();
        let client = RemoteClient::new(addr);

        let err = client.call("get", &[("key", b"nope")]).unwrap_err();
        assert!(err.is_no_record());

        server.stop();
        server.finish();
    }

    #[test]
    fn reconnects_after_the_connection_is_torn_down() {
        let (addr, server) = spawn_server();
        let client = RemoteClient::new(addr);
        client.call("set", &[("key", b"a"), ("value", b"1")]).unwrap();

        // Simulate a dead socket without the server knowing.
        if let Some(stream) = client.stream.lock().unwrap().as_ref() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }

        let outputs = client.call("get", &[("key", b"a")]).unwrap();
        assert_eq!(outputs.get("value").unwrap(), b"1");

        server.stop();
        server.finish();
    }

    #[test]
    fn bare_tcp_listener_yields_an_io_error_not_a_panic() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = RemoteClient::new(addr).with_timeout(Duration::from_millis(200));
        let err = client.call("get", &[("key", b"a")]).unwrap_err();
        assert!(matches!(err, ClientError::Io(..)));
    }
}
