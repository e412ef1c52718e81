//! Local control surface.
//!
//! A deliberately small HTTP server over `TcpListener`: operators start and
//! stop streams, read status, and page through results and alerts. It runs
//! on its own thread with a non-blocking accept loop and a cooperative
//! shutdown flag. Control operations carry no authentication; bind the
//! listener to loopback in any real deployment.
//!
//! Routes:
//! - `GET  /health`            -> status + available models
//! - `GET  /streams`           -> status snapshot
//! - `POST /streams/start`     -> `{"config": StreamConfig}`
//! - `POST /streams/stop`      -> `{"stream_id": "..."}`
//! - `GET  /results/{id}`      -> recent results (`?limit=N`, default 100)
//! - `GET  /alerts`            -> unresolved alerts
//! - `GET  /alerts/all`        -> all alerts
//! - `POST /alerts/resolve`    -> `{"alert_id": N}`

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::manager::StreamManager;
use crate::storage::{AlertSink, ResultSink, StreamStore};
use crate::StreamConfig;

const MAX_REQUEST_BYTES: usize = 64 * 1024;
const DEFAULT_RESULT_LIMIT: usize = 100;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8787".to_string(),
        }
    }
}

/// Everything a request handler needs, shared across the accept loop.
pub struct ApiContext {
    pub manager: Arc<StreamManager>,
    pub results: Arc<dyn ResultSink>,
    pub alerts: Arc<dyn AlertSink>,
    pub streams: Arc<dyn StreamStore>,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    ctx: ApiContext,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, ctx: ApiContext) -> Self {
        Self { cfg, ctx }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let ctx = self.ctx;
        let join = std::thread::Builder::new()
            .name("vms-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, ctx, shutdown_thread) {
                    log::error!("control api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

impl std::fmt::Debug for ApiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiContext").finish_non_exhaustive()
    }
}

fn run_api(listener: TcpListener, ctx: ApiContext, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &ctx) {
                    log::warn!("control api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    config: StreamConfig,
}

#[derive(Debug, Deserialize)]
struct StopRequest {
    stream_id: String,
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    alert_id: i64,
}

fn handle_connection(mut stream: TcpStream, ctx: &ApiContext) -> Result<()> {
    let request = read_request(&mut stream)?;

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => {
            let body = json!({
                "status": "ok",
                "models": ctx.manager.registry().available_models(),
            });
            write_json(&mut stream, 200, &body)
        }
        ("GET", "/streams") => {
            let body = json!({ "streams": ctx.manager.list_status() });
            write_json(&mut stream, 200, &body)
        }
        ("POST", "/streams/start") => {
            let req: StartRequest = match parse_body(&request) {
                Ok(req) => req,
                Err(err) => return bad_request(&mut stream, err),
            };
            if !ctx.manager.start(req.config.clone()) {
                return write_json(&mut stream, 400, &json!({"error": "stream_already_running"}));
            }
            if let Err(e) = ctx.streams.save_stream(&req.config) {
                log::warn!(
                    "failed to persist config for stream '{}': {}",
                    req.config.stream_id,
                    e
                );
            }
            write_json(&mut stream, 200, &json!({"ok": true}))
        }
        ("POST", "/streams/stop") => {
            let req: StopRequest = match parse_body(&request) {
                Ok(req) => req,
                Err(err) => return bad_request(&mut stream, err),
            };
            if !ctx.manager.stop(&req.stream_id) {
                return write_json(&mut stream, 404, &json!({"error": "stream_not_found"}));
            }
            if let Err(e) = ctx.streams.set_stream_status(&req.stream_id, "stopped") {
                log::warn!(
                    "failed to mark stream '{}' stopped: {}",
                    req.stream_id,
                    e
                );
            }
            write_json(&mut stream, 200, &json!({"ok": true}))
        }
        ("GET", path) if path.starts_with("/results/") => {
            let stream_id = &path["/results/".len()..];
            if stream_id.is_empty() {
                return write_json(&mut stream, 404, &json!({"error": "not_found"}));
            }
            let limit = request
                .query_param("limit")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(DEFAULT_RESULT_LIMIT);
            let results = ctx.results.recent_results(stream_id, limit)?;
            write_json(&mut stream, 200, &json!({ "results": results }))
        }
        ("GET", "/alerts") => {
            let alerts = ctx.alerts.alerts(Some(false))?;
            write_json(&mut stream, 200, &json!({ "alerts": alerts }))
        }
        ("GET", "/alerts/all") => {
            let alerts = ctx.alerts.alerts(None)?;
            write_json(&mut stream, 200, &json!({ "alerts": alerts }))
        }
        ("POST", "/alerts/resolve") => {
            let req: ResolveRequest = match parse_body(&request) {
                Ok(req) => req,
                Err(err) => return bad_request(&mut stream, err),
            };
            if !ctx.alerts.resolve_alert(req.alert_id)? {
                return write_json(&mut stream, 404, &json!({"error": "alert_not_found"}));
            }
            write_json(&mut stream, 200, &json!({"ok": true}))
        }
        ("GET", _) | ("POST", _) => write_json(&mut stream, 404, &json!({"error": "not_found"})),
        _ => write_json(&mut stream, 405, &json!({"error": "method_not_allowed"})),
    }
}

fn parse_body<T: for<'a> Deserialize<'a>>(request: &HttpRequest) -> Result<T> {
    serde_json::from_slice(&request.body).map_err(|e| anyhow!("invalid request body: {}", e))
}

fn bad_request(stream: &mut TcpStream, err: anyhow::Error) -> Result<()> {
    write_json(
        stream,
        400,
        &json!({"error": "invalid_request", "detail": err.to_string()}),
    )
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    // Accepted sockets can inherit the listener's non-blocking flag on some
    // platforms.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break data
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .ok_or_else(|| anyhow!("truncated request"))?;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .map(|raw| raw.parse())
        .transpose()
        .map_err(|_| anyhow!("invalid content-length"))?
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request body too large"));
    }

    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("truncated request body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        raw_path: raw_path.to_string(),
        body,
    })
}

fn write_json(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
        len = payload.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(&payload)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    raw_path: String,
    body: Vec<u8>,
}

impl HttpRequest {
    fn query_param(&self, name: &str) -> Option<&str> {
        let query = self.raw_path.split('?').nth(1)?;
        for pair in query.split('&') {
            if let Some((k, v)) = pair.split_once('=') {
                if k == name {
                    return Some(v);
                }
            }
        }
        None
    }
}
