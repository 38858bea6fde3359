//! HTTP interface.
//!
//! A small HTTP/1.1 server on `std::net::TcpListener`: the accept loop polls a
//! non-blocking listener and hands every connection to its own thread, so a
//! long-lived `/webcam` stream never blocks `/stop-webcam` or `/sensors`.
//! One request per connection; every response closes it.

pub mod multipart;

use std::collections::HashMap;
use std::fmt;
use std::io::{BufWriter, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::json;

use crate::detect::DetectionMode;
use crate::frame::Frame;
use crate::ingest::{open_source, SourceConfig};
use crate::pipeline::stream::MJPEG_BOUNDARY;
use crate::pipeline::{run_stream, Pipeline, PredictionRecord, StreamController};
use crate::sensor::{LinkMonitor, SensorCache};
use crate::sink::{record_predictions, ResultSink};

const MAX_HEADER_BYTES: usize = 16 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const STREAM_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_POLL: Duration = Duration::from_millis(50);

const ROUTES: [(&str, &str); 5] = [
    ("/predict", "POST"),
    ("/webcam", "GET"),
    ("/stop-webcam", "GET"),
    ("/sensors", "GET"),
    ("/health", "GET"),
];

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_upload_bytes: usize,
    /// Frame source opened for each `/webcam` session.
    pub camera: SourceConfig,
    pub jpeg_quality: u8,
    /// `source` column written to the result sink.
    pub sink_source: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
            camera: SourceConfig::default(),
            jpeg_quality: 85,
            sink_source: "upload".to_string(),
        }
    }
}

/// Everything a request handler can reach.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    sensors: Arc<SensorCache>,
    sensor_link: Option<LinkMonitor>,
    stream: StreamController,
    sink: Option<Arc<dyn ResultSink>>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, sensors: Arc<SensorCache>) -> Self {
        Self {
            pipeline,
            sensors,
            sensor_link: None,
            stream: StreamController::new(),
            sink: None,
        }
    }

    pub fn with_sensor_link(mut self, monitor: LinkMonitor) -> Self {
        self.sensor_link = Some(monitor);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn stream(&self) -> &StreamController {
        &self.stream
    }
}

pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    stream: StreamController,
}

impl ApiHandle {
    /// Stop accepting connections and ask any running stream to end.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown_now()
    }

    fn shutdown_now(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.stream.request_stop();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for ApiHandle {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown_now() {
            log::error!("{}", err);
        }
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: AppState) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid api address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind api listener on {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let stream = self.state.stream.clone();
        let cfg = Arc::new(self.cfg);
        let state = self.state;
        let join = std::thread::Builder::new()
            .name("api-accept".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, cfg, state, shutdown_thread) {
                    log::error!("api server stopped: {:#}", err);
                }
            })
            .context("spawn api accept thread")?;
        log::info!("api listening on http://{}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
            stream,
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: Arc<ApiConfig>,
    state: AppState,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let cfg = cfg.clone();
                let state = state.clone();
                let spawned = std::thread::Builder::new()
                    .name("api-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &cfg, &state) {
                            log::warn!("request from {} failed: {:#}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::error!("failed to spawn connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// A request that ends in a specific error status.
#[derive(Debug)]
struct HttpError {
    status: u16,
    detail: String,
}

impl HttpError {
    fn new(status: u16, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.detail)
    }
}

impl std::error::Error for HttpError {}

fn handle_connection(mut stream: TcpStream, cfg: &ApiConfig, state: &AppState) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let request = match read_request(&mut stream, cfg.max_upload_bytes) {
        Ok(request) => request,
        Err(err) => {
            if let Some(http) = err.downcast_ref::<HttpError>() {
                log::warn!("rejected request: {}", http);
                return write_error(&mut stream, http.status, &http.detail);
            }
            return Err(err);
        }
    };
    log::debug!("{} {}", request.method, request.path);

    let Some(&(_, method)) = ROUTES.iter().find(|(path, _)| *path == request.path) else {
        return write_error(&mut stream, 404, "Not Found");
    };
    if request.method == "OPTIONS" {
        return write_preflight(&mut stream);
    }
    if request.method != method {
        return write_error(&mut stream, 405, "Method Not Allowed");
    }

    match request.path.as_str() {
        "/predict" => handle_predict(&mut stream, &request, cfg, state),
        "/webcam" => handle_webcam(stream, cfg, state),
        "/stop-webcam" => {
            if state.stream.request_stop() {
                log::info!("Stopping webcam stream");
            }
            write_json(&mut stream, 200, &json!({"status": "stopped"}))
        }
        "/sensors" => write_json(&mut stream, 200, &state.sensors.snapshot()),
        "/health" => {
            let sensor_link = state
                .sensor_link
                .as_ref()
                .map(|monitor| monitor.state().as_str())
                .unwrap_or("disabled");
            let body = json!({
                "status": "healthy",
                "model_loaded": true,
                "sensor_data_available": state.sensors.has_data(),
                "sensor_link": sensor_link,
                "stream": state.stream.state().as_str(),
            });
            write_json(&mut stream, 200, &body)
        }
        _ => write_error(&mut stream, 404, "Not Found"),
    }
}

fn handle_predict(
    stream: &mut TcpStream,
    request: &HttpRequest,
    cfg: &ApiConfig,
    state: &AppState,
) -> Result<()> {
    let image = match upload_bytes(request) {
        Ok(image) => image,
        Err(err) => return write_error(stream, err.status, &err.detail),
    };
    let frame = match Frame::decode(image) {
        Ok(frame) => frame,
        Err(err) => {
            log::warn!("upload is not a decodable image: {:#}", err);
            return write_error(stream, 400, "Invalid image format");
        }
    };
    let result = match state.pipeline.predict(&frame, DetectionMode::OneShot) {
        Ok(result) => result,
        Err(err) => {
            log::error!("Prediction error: {:#}", err);
            return write_error(stream, 500, &format!("Processing failed: {:#}", err));
        }
    };
    write_json(stream, 200, &result)?;

    if let Some(sink) = &state.sink {
        spawn_sink_record(
            sink.clone(),
            cfg.sink_source.clone(),
            frame,
            result.predictions,
            cfg.jpeg_quality,
        );
    }
    Ok(())
}

/// The image bytes of a `/predict` request: a raw `image/*` body, or the
/// `image` part of a multipart form.
fn upload_bytes(request: &HttpRequest) -> std::result::Result<&[u8], HttpError> {
    let content_type = request.header("content-type").unwrap_or("");
    if let Some(boundary) = multipart::boundary(content_type) {
        let parts = multipart::parse(&request.body, &boundary)
            .map_err(|err| HttpError::new(400, format!("Malformed multipart body: {:#}", err)))?;
        let part = parts
            .into_iter()
            .find(|part| part.name.as_deref() == Some("image"))
            .ok_or_else(|| HttpError::new(400, "Missing form field 'image'"))?;
        if !is_image_type(part.content_type.as_deref().unwrap_or("")) {
            return Err(HttpError::new(400, "File must be an image"));
        }
        return Ok(part.data);
    }
    if !is_image_type(content_type) {
        return Err(HttpError::new(400, "File must be an image"));
    }
    Ok(&request.body)
}

fn is_image_type(content_type: &str) -> bool {
    content_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("image/")
}

fn spawn_sink_record(
    sink: Arc<dyn ResultSink>,
    source: String,
    frame: Frame,
    predictions: Vec<PredictionRecord>,
    jpeg_quality: u8,
) {
    if !predictions.iter().any(PredictionRecord::is_classified) {
        return;
    }
    let spawned = std::thread::Builder::new()
        .name("sink-record".to_string())
        .spawn(move || {
            let stored = frame
                .encode_jpeg(jpeg_quality)
                .and_then(|jpeg| record_predictions(sink.as_ref(), &source, &jpeg, &predictions));
            match stored {
                Ok(rows) => log::debug!("{} sink recorded {} detections", sink.name(), rows),
                Err(err) => log::warn!("{} sink failed to record detections: {:#}", sink.name(), err),
            }
        });
    if let Err(err) = spawned {
        log::warn!("failed to spawn sink thread: {}", err);
    }
}

fn handle_webcam(mut stream: TcpStream, cfg: &ApiConfig, state: &AppState) -> Result<()> {
    let session = match state.stream.start() {
        Ok(session) => session,
        Err(err) => {
            log::warn!("webcam request refused: {:#}", err);
            return write_error(&mut stream, 409, "Streaming session already active");
        }
    };
    let source = match open_source(&cfg.camera) {
        Ok(source) => source,
        Err(err) => {
            log::error!("Cannot open webcam {}: {:#}", cfg.camera.location, err);
            drop(session);
            return write_error(&mut stream, 503, "Cannot open webcam");
        }
    };
    log::info!("Starting webcam stream from {}", source.describe());

    stream.set_write_timeout(Some(STREAM_WRITE_TIMEOUT))?;
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        MJPEG_BOUNDARY
    );
    stream.write_all(header.as_bytes())?;

    let mut out = BufWriter::new(&mut stream);
    let summary = run_stream(&state.pipeline, source, session, &mut out, cfg.jpeg_quality);
    log::info!(
        "webcam stream finished: {} frames ({:?})",
        summary.frames,
        summary.end
    );
    Ok(())
}

fn read_request<R: Read>(reader: &mut R, max_body_bytes: usize) -> Result<HttpRequest> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(HttpError::new(400, "Request headers too large").into());
        }
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request headers"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| HttpError::new(400, "Missing method"))?
        .to_string();
    let raw_path = parts
        .next()
        .ok_or_else(|| HttpError::new(400, "Missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    if headers.contains_key("transfer-encoding") {
        return Err(HttpError::new(400, "Transfer-Encoding is not supported; send Content-Length").into());
    }
    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| HttpError::new(400, "Invalid Content-Length"))?,
        None => 0,
    };
    if content_length > max_body_bytes {
        return Err(HttpError::new(
            413,
            format!("Upload exceeds the {} byte limit", max_body_bytes),
        )
        .into());
    }

    let mut body = data.split_off(header_end + 4);
    body.truncate(content_length);
    while body.len() < content_length {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Err(HttpError::new(400, "Request body shorter than Content-Length").into());
        }
        let take = n.min(content_length - body.len());
        body.extend_from_slice(&buf[..take]);
    }

    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

fn write_json<W: Write, T: Serialize>(out: &mut W, status: u16, body: &T) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(out, status, "application/json", &payload)
}

fn write_error<W: Write>(out: &mut W, status: u16, detail: &str) -> Result<()> {
    write_json(out, status, &json!({ "detail": detail }))
}

fn write_preflight<W: Write>(out: &mut W) -> Result<()> {
    let header = "HTTP/1.1 204 No Content\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, POST, OPTIONS\r\nAccess-Control-Allow-Headers: *\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    out.write_all(header.as_bytes())?;
    out.flush()?;
    Ok(())
}

fn write_response<W: Write>(out: &mut W, status: u16, content_type: &str, body: &[u8]) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        413 => "HTTP/1.1 413 Payload Too Large",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    out.write_all(header.as_bytes())?;
    out.write_all(body)?;
    out.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}
