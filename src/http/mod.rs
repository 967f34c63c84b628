// SPDX-License-Identifier: GPL-3.0-or-later

//! HTTP/1.1 framing (spec §4.4): request parsing, response assembly, and
//! static-file serving with directory listings, wired into the
//! [`crate::net::RequestHandler`] contract the [`crate::net::ThreadedServer`]
//! drives. RPC dispatch (spec §4.5) and any user application logic both
//! plug in as [`Router`] implementations; `HttpRequestHandler` itself only
//! knows how to frame requests/responses and route by path prefix.

pub mod chunked;
pub mod request;
pub mod response;
pub mod status;

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::warn;

pub use request::Request;
pub use response::Response;
pub use status::Method;

use crate::net::{HandlerOutcome, RequestHandler, Session};

/// Something that turns a parsed [`Request`] into a [`Response`]. RPC
/// dispatch and static-file serving are both routers; so is any
/// user-supplied application handler (spec §2 "others fall through to a
/// user-provided HTTP handler").
pub trait Router: Send + Sync {
    fn route(&self, req: &Request) -> Response;
}

/// Dispatches to `rpc` for any path under `rpc_prefix` (spec §4.5 "A
/// request whose path begins with the reserved prefix `/rpc/`"), else to
/// `fallback` (typically [`StaticFileRouter`] or a user handler).
pub struct PrefixRouter {
    pub rpc_prefix: String,
    pub rpc: Box<dyn Router>,
    pub fallback: Box<dyn Router>,
}

impl Router for PrefixRouter {
    fn route(&self, req: &Request) -> Response {
        if req.path.starts_with(&self.rpc_prefix) {
            self.rpc.route(req)
        } else {
            self.fallback.route(req)
        }
    }
}

/// Serves static files from a configured base directory (spec §6 "Static
/// content served from a configured base directory when no RPC prefix
/// matches; directory listings are generated HTML when the URL ends in
/// '/'").
pub struct StaticFileRouter {
    pub root: PathBuf,
}

impl Router for StaticFileRouter {
    fn route(&self, req: &Request) -> Response {
        if !matches!(req.method, Method::Get | Method::Head) {
            return Response::new(405);
        }
        let decoded = percent_encoding::percent_decode_str(&req.path).decode_utf8_lossy().into_owned();
        let relative = decoded.trim_start_matches('/');
        if Path::new(relative).components().any(|c| matches!(c, Component::ParentDir)) {
            return Response::new(403);
        }
        let full = self.root.join(relative);
        if decoded.ends_with('/') || full.is_dir() {
            return self.directory_listing(&full, &decoded);
        }
        match fs::read(&full) {
            Ok(body) => {
                let content_type = content_type_for(&full);
                Response::new(200).with_header("content-type", content_type).with_body(body)
            },
            Err(_) => Response::new(404),
        }
    }
}

impl StaticFileRouter {
    fn directory_listing(&self, dir: &Path, url_path: &str) -> Response {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => return Response::new(404),
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        let mut html = format!("<html><head><title>Index of {url_path}</title></head><body>\n");
        html.push_str(&format!("<h1>Index of {url_path}</h1>\n<ul>\n"));
        for name in names {
            html.push_str(&format!("<li><a href=\"{name}\">{name}</a></li>\n"));
        }
        html.push_str("</ul></body></html>\n");
        Response::new(200).with_header("content-type", "text/html").with_body(html.into_bytes())
    }
}

/// Fixed extension table for content-type autodetection (spec §4.4).
pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase().as_str() {
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

/// Adapts a [`Router`] to [`RequestHandler`]: parses one HTTP/1.x request
/// off the session, routes it, writes the response, and decides whether
/// the worker should loop for another request or close the connection.
pub struct HttpRequestHandler<R: Router> {
    pub router: R,
}

impl<R: Router> RequestHandler for HttpRequestHandler<R> {
    fn handle(&self, session: &Session) -> HandlerOutcome {
        let req = match Request::parse(session) {
            Ok(Some(req)) => req,
            Ok(None) => return HandlerOutcome::Close,
            Err(e) => {
                let _ = Response::new(e.http_status()).send(session, Method::Get, false);
                return HandlerOutcome::Close;
            },
        };

        let keep_alive = req.keep_alive;
        let response = self.router.route(&req);
        match response.send(session, req.method, keep_alive) {
            Ok(true) if keep_alive => HandlerOutcome::Keep,
            Ok(_) => HandlerOutcome::Close,
            Err(e) => {
                warn!(error = %e, "failed to serialize response");
                HandlerOutcome::Close
            },
        }
    }
}
