//! HTTP surface on `tiny_http`.
//!
//! A fixed pool of worker threads shares one `Server`. Each worker pulls a
//! request, routes it to the hub and answers with JSON on success or the
//! error's text with the mapped status code on failure.
//!
//! | Route | GET | POST |
//! |---|---|---|
//! | `/model[/<path>]` | resolved read | raw write |
//! | `/node/<alias>` | | fan-out write |
//! | `/config` | export | import + persist |
//! | `/cache/clear` | | clear the transformation cache |

use std::io::{Cursor, Read};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::{json, Value};
use tiny_http::{Header, Method, Request, Response, Server};

use crate::bus::WriteOrigin;
use crate::config::{ConfigDocument, Settings};
use crate::error::{Error, Result};
use crate::hub::Hub;
use crate::namespace::DocPath;


/// How long a worker blocks in `recv` before re-checking for shutdown.
const ACCEPT_POLL: Duration = Duration::from_millis(100);


pub struct Service {
    server: Arc<Server>,
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl Service {
    /// Bind with the listen address, worker count and body limit of `settings`.
    pub fn start(hub: Arc<Hub>, settings: &Settings) -> Result<Service> {
        Self::bind(hub, settings.listen, settings.workers, settings.body_limit)
    }

    pub fn bind(
        hub: Arc<Hub>,
        listen: SocketAddr,
        workers: usize,
        body_limit: usize,
    ) -> Result<Service> {
        let server = Server::http(listen)
            .map_err(|e| Error::Http(format!("cannot listen on {}: {}", listen, e)))?;
        let addr = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| Error::Http(format!("{} is not an IP listener", listen)))?;
        let server = Arc::new(server);
        let stop = Arc::new(AtomicBool::new(false));

        let count = workers.max(1);
        let mut handles = Vec::with_capacity(count);
        for n in 0..count {
            let server = Arc::clone(&server);
            let hub = Arc::clone(&hub);
            let stop = Arc::clone(&stop);
            let handle = thread::Builder::new()
                .name(format!("gator-http-{}", n))
                .spawn(move || worker_loop(&server, &hub, &stop, body_limit))?;
            handles.push(handle);
        }

        info!("listening on http://{} with {} worker(s)", addr, count);
        Ok(Service {
            server,
            addr,
            stop,
            workers: handles,
        })
    }

    /// Bound address; differs from the requested one when port 0 was asked for.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, let in-flight requests finish, join the workers.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.stop.store(true, Ordering::SeqCst);
        for _ in 0..self.workers.len() {
            self.server.unblock();
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("HTTP worker panicked");
            }
        }
        info!("HTTP service on {} stopped", self.addr);
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.shutdown();
    }
}


fn worker_loop(server: &Server, hub: &Hub, stop: &AtomicBool, body_limit: usize) {
    while !stop.load(Ordering::SeqCst) {
        match server.recv_timeout(ACCEPT_POLL) {
            Ok(Some(request)) => handle_request(request, hub, body_limit),
            Ok(None) => {}
            Err(e) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                warn!("HTTP accept failed: {}", e);
            }
        }
    }
}

fn handle_request(mut request: Request, hub: &Hub, body_limit: usize) {
    let method = request.method().clone();
    let url = request.url().to_string();

    let response = match dispatch(&mut request, hub, body_limit) {
        Ok(body) => {
            debug!("{} {} -> 200", method, url);
            json_response(&body)
        }
        Err(e) => {
            let status = status_for(&e);
            if status >= 500 {
                warn!("{} {} -> {}: {}", method, url, status, e);
            } else {
                debug!("{} {} -> {}: {}", method, url, status, e);
            }
            text_response(status, &e.to_string())
        }
    };

    if let Err(e) = request.respond(response) {
        debug!("response to {} {} not delivered: {}", method, url, e);
    }
}


#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Model(DocPath),
    Node(String),
    Config,
    CacheClear,
}

impl Route {
    fn parse(url: &str) -> Result<Route> {
        let path = url.split('?').next().unwrap_or("");
        let trimmed = path.trim_end_matches('/');

        if let Some(doc_path) = DocPath::from_url(path, "/model") {
            return Ok(Route::Model(doc_path));
        }
        if let Some(alias) = DocPath::from_url(path, "/node") {
            return match alias.tokens() {
                [single] => Ok(Route::Node(single.clone())),
                _ => Err(Error::BadRequest(
                    "node endpoint takes exactly one alias".into(),
                )),
            };
        }
        match trimmed {
            "/config" => Ok(Route::Config),
            "/cache/clear" => Ok(Route::CacheClear),
            _ => Err(Error::NoRoute(path.to_string())),
        }
    }
}

fn dispatch(request: &mut Request, hub: &Hub, body_limit: usize) -> Result<Value> {
    let route = Route::parse(request.url())?;
    let method = request.method().clone();

    match (method, route) {
        (Method::Get, Route::Model(path)) => hub.read_resolved(&path),
        (Method::Post, Route::Model(path)) => {
            let value = read_json(request, body_limit)?;
            hub.write(&path, value, WriteOrigin::Http)?;
            Ok(success())
        }
        (Method::Post, Route::Node(alias)) => {
            hub.require_node(&alias)?;
            let value = read_json(request, body_limit)?;
            hub.write_node(&alias, &value)?;
            Ok(success())
        }
        (Method::Get, Route::Config) => Ok(serde_json::to_value(hub.export_config()?)?),
        (Method::Post, Route::Config) => {
            let doc: ConfigDocument = serde_json::from_value(read_json(request, body_limit)?)?;
            hub.import_config(doc)?;
            Ok(success())
        }
        (Method::Post, Route::CacheClear) => {
            hub.clear_cache()?;
            Ok(success())
        }
        (method, _) => Err(Error::MethodNotAllowed(method.to_string())),
    }
}

/// Body of a POST: `application/json`, at most `limit` bytes, valid JSON.
fn read_json(request: &mut Request, limit: usize) -> Result<Value> {
    let content_type = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.as_str().to_string());
    match content_type {
        Some(ct) if is_json_media_type(&ct) => {}
        Some(ct) => return Err(Error::UnsupportedMediaType(ct)),
        None => return Err(Error::UnsupportedMediaType("none".into())),
    }

    if request.body_length().is_some_and(|len| len > limit) {
        return Err(Error::PayloadTooLarge { limit });
    }
    let mut body = Vec::new();
    request
        .as_reader()
        .take(limit as u64 + 1)
        .read_to_end(&mut body)?;
    if body.len() > limit {
        return Err(Error::PayloadTooLarge { limit });
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::BadRequest("empty request body".into()));
    }
    Ok(serde_json::from_slice(&body)?)
}

fn is_json_media_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|t| t.trim().eq_ignore_ascii_case("application/json"))
}

fn success() -> Value {
    json!({"status": "success"})
}

/// HTTP status for an error reaching the surface.
pub fn status_for(error: &Error) -> u16 {
    match error {
        Error::PathNotFound { .. } | Error::UnknownNode(_) | Error::NoRoute(_) => 404,
        Error::NotTraversable { .. }
        | Error::InvalidRootAssignment { .. }
        | Error::InvalidTransformationDefinition { .. }
        | Error::Json(_)
        | Error::BadRequest(_) => 400,
        Error::UnsupportedMediaType(_) => 415,
        Error::PayloadTooLarge { .. } => 413,
        Error::MethodNotAllowed(_) => 405,
        _ => 500,
    }
}

fn json_response(body: &Value) -> Response<Cursor<Vec<u8>>> {
    let response = Response::from_string(body.to_string());
    match Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        Ok(h) => response.with_header(h),
        Err(()) => response,
    }
}

fn text_response(status: u16, message: &str) -> Response<Cursor<Vec<u8>>> {
    let response = Response::from_string(message).with_status_code(status);
    match Header::from_bytes(&b"Content-Type"[..], &b"text/plain; charset=utf-8"[..]) {
        Ok(h) => response.with_header(h),
        Err(()) => response,
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
