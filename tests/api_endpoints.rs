use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fruit_freshness::api::{ApiConfig, ApiHandle, ApiServer, AppState};
use fruit_freshness::classify::StubClassifierBackend;
use fruit_freshness::detect::StubDetectorBackend;
use fruit_freshness::ingest::SourceConfig;
use fruit_freshness::sensor::{
    parse_line, IngestionConfig, IngestionHandle, MemoryConnector, SensorCache, SensorIngestion,
};
use fruit_freshness::sink::SqliteSink;
use fruit_freshness::{BoundingBox, Detection, Detector, Frame, FreshnessClassifier, Pipeline};

fn pipeline() -> Pipeline {
    let targets = vec!["apple".to_string(), "banana".to_string()];
    let detector = Detector::new(
        StubDetectorBackend::new(vec![Detection::new(
            BoundingBox::new(4, 20, 30, 40),
            47,
            "apple",
            0.9,
        )]),
        &targets,
    )
    .expect("stub detector");
    Pipeline::new(
        detector,
        FreshnessClassifier::new(StubClassifierBackend::new([3.0, 0.0, 0.0, 0.0, 0.0, 0.0])),
    )
}

fn jpeg_fixture() -> Vec<u8> {
    let image = image::RgbImage::from_pixel(64, 48, image::Rgb([200, 40, 40]));
    Frame::from_rgb_image(image)
        .encode_jpeg(90)
        .expect("encode fixture")
}

struct TestApi {
    api_handle: Option<ApiHandle>,
    sensors: Arc<SensorCache>,
    _ingestion: Option<IngestionHandle>,
}

impl TestApi {
    fn new(camera: &str) -> Result<Self> {
        Self::with_state(camera, |state| Ok(state))
    }

    fn with_state(
        camera: &str,
        customize: impl FnOnce(AppState) -> Result<AppState>,
    ) -> Result<Self> {
        let sensors = Arc::new(SensorCache::new());
        let state = customize(AppState::new(Arc::new(pipeline()), sensors.clone()))?;
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            max_upload_bytes: 256 * 1024,
            camera: SourceConfig {
                location: camera.to_string(),
                width: 64,
                height: 48,
            },
            ..ApiConfig::default()
        };
        let api_handle = ApiServer::new(api_config, state).spawn()?;
        Ok(Self {
            api_handle: Some(api_handle),
            sensors,
            _ingestion: None,
        })
    }

    fn addr(&self) -> SocketAddr {
        self.api_handle.as_ref().map(|h| h.addr).expect("api running")
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            let _ = handle.stop();
        }
    }
}

fn send(addr: SocketAddr, head: &str, body: &[u8]) -> Result<(String, Vec<u8>)> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    stream.write_all(head.as_bytes())?;
    stream.write_all(body)?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response headers");
    let headers = String::from_utf8_lossy(&response[..split]).to_string();
    Ok((headers, response[split + 4..].to_vec()))
}

fn get(addr: SocketAddr, path: &str) -> Result<(String, Value)> {
    let (headers, body) = send(
        addr,
        &format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path),
        b"",
    )?;
    Ok((headers, serde_json::from_slice(&body)?))
}

fn post_image(addr: SocketAddr, content_type: &str, body: &[u8]) -> Result<(String, Value)> {
    let head = format!(
        "POST /predict HTTP/1.1\r\nHost: localhost\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        content_type,
        body.len()
    );
    let (headers, body) = send(addr, &head, body)?;
    Ok((headers, serde_json::from_slice(&body)?))
}

#[test]
fn predict_accepts_raw_image_body() -> Result<()> {
    let api = TestApi::new("stub://cam")?;
    let (headers, json) = post_image(api.addr(), "image/jpeg", &jpeg_fixture())?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert!(headers.contains("Access-Control-Allow-Origin: *"));
    assert_eq!(json["total_detections"], 1);
    let record = &json["predictions"][0];
    assert_eq!(record["bbox"], serde_json::json!([4, 20, 30, 40]));
    assert_eq!(record["label"], "apple_fresh");
    assert_eq!(record["confidence"], 0.801);
    assert_eq!(record["detected_object"], "apple");
    Ok(())
}

#[test]
fn predict_accepts_multipart_upload() -> Result<()> {
    let api = TestApi::new("stub://cam")?;
    let mut body = Vec::new();
    body.extend_from_slice(b"--fruitboundary\r\n");
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"image\"; filename=\"apple.jpg\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    body.extend_from_slice(&jpeg_fixture());
    body.extend_from_slice(b"\r\n--fruitboundary--\r\n");

    let (headers, json) = post_image(
        api.addr(),
        "multipart/form-data; boundary=fruitboundary",
        &body,
    )?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(json["predictions"][0]["label"], "apple_fresh");
    Ok(())
}

#[test]
fn predict_rejects_client_errors() -> Result<()> {
    let api = TestApi::new("stub://cam")?;

    let (headers, json) = post_image(api.addr(), "text/plain", b"hello")?;
    assert!(headers.starts_with("HTTP/1.1 400"));
    assert_eq!(json["detail"], "File must be an image");

    let (headers, json) = post_image(api.addr(), "image/jpeg", b"definitely not a jpeg")?;
    assert!(headers.starts_with("HTTP/1.1 400"));
    assert_eq!(json["detail"], "Invalid image format");

    let huge = vec![0u8; 300 * 1024];
    let (headers, _) = post_image(api.addr(), "image/jpeg", &huge)?;
    assert!(headers.starts_with("HTTP/1.1 413"));
    Ok(())
}

#[test]
fn unknown_routes_and_methods() -> Result<()> {
    let api = TestApi::new("stub://cam")?;
    let (headers, _) = get(api.addr(), "/nope")?;
    assert!(headers.starts_with("HTTP/1.1 404"));
    let (headers, _) = get(api.addr(), "/predict")?;
    assert!(headers.starts_with("HTTP/1.1 405"));

    let (headers, body) = send(
        api.addr(),
        "OPTIONS /predict HTTP/1.1\r\nHost: localhost\r\nOrigin: http://dashboard\r\n\r\n",
        b"",
    )?;
    assert!(headers.starts_with("HTTP/1.1 204"));
    assert!(headers.contains("Access-Control-Allow-Methods: GET, POST, OPTIONS"));
    assert!(body.is_empty());
    Ok(())
}

#[test]
fn sensors_report_no_data_then_latest_reading() -> Result<()> {
    let api = TestApi::new("stub://cam")?;
    let (_, json) = get(api.addr(), "/sensors")?;
    assert_eq!(json["error"], "No sensor data available yet.");
    assert!(json["sensor_id"].is_null());

    let line = r#"{"timestamp":1000,"sensor_id":"A1","dht22":{"temperature_c":22.5},"mq2":{"ppm":120},"air_quality":"good"}"#;
    api.sensors.publish(parse_line(line)?.expect("reading"));
    let (_, json) = get(api.addr(), "/sensors")?;
    assert_eq!(json["timestamp"], 1000);
    assert_eq!(json["sensor_id"], "A1");
    assert_eq!(json["dht22"]["temperature_c"], 22.5);
    assert_eq!(json["mq2"]["ppm"], 120);
    assert_eq!(json["air_quality"], "good");
    assert!(json["error"].is_null());
    Ok(())
}

#[test]
fn health_reports_sensor_link_and_stream_state() -> Result<()> {
    let api = TestApi::new("stub://cam")?;
    let (_, json) = get(api.addr(), "/health")?;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["model_loaded"], true);
    assert_eq!(json["sensor_data_available"], false);
    assert_eq!(json["sensor_link"], "disabled");
    assert_eq!(json["stream"], "idle");

    let connector = MemoryConnector::new();
    let mut ingestion = None;
    let mut api = TestApi::with_state("stub://cam", |state| {
        let handle = SensorIngestion::spawn(
            Box::new(connector.clone()),
            Arc::new(SensorCache::new()),
            IngestionConfig {
                settle: Duration::from_millis(0),
                backoff: Duration::from_millis(20),
            },
        )?;
        let state = state.with_sensor_link(handle.monitor());
        ingestion = Some(handle);
        Ok(state)
    })?;
    api._ingestion = ingestion;

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let (_, json) = get(api.addr(), "/health")?;
        if json["sensor_link"] == "connected" {
            break;
        }
        assert!(Instant::now() < deadline, "sensor link never connected");
        std::thread::sleep(Duration::from_millis(20));
    }
    Ok(())
}

fn read_until_parts(stream: &mut TcpStream, parts: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    while data.windows(7).filter(|w| *w == b"--frame").count() < parts {
        let n = stream.read(&mut buf)?;
        assert!(n > 0, "stream closed early");
        data.extend_from_slice(&buf[..n]);
    }
    Ok(data)
}

#[test]
fn webcam_streams_until_stopped_and_refuses_second_session() -> Result<()> {
    let api = TestApi::new("stub://cam")?;
    let mut stream = TcpStream::connect(api.addr())?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    stream.write_all(b"GET /webcam HTTP/1.1\r\nHost: localhost\r\n\r\n")?;

    let data = read_until_parts(&mut stream, 2)?;
    let text = String::from_utf8_lossy(&data);
    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert!(text.contains("Content-Type: multipart/x-mixed-replace; boundary=frame"));
    assert!(text.contains("--frame\r\nContent-Type: image/jpeg\r\n\r\n"));

    let (headers, json) = get(api.addr(), "/webcam")?;
    assert!(headers.starts_with("HTTP/1.1 409"));
    assert_eq!(json["detail"], "Streaming session already active");

    let (_, json) = get(api.addr(), "/stop-webcam")?;
    assert_eq!(json["status"], "stopped");

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest)?;

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let (_, json) = get(api.addr(), "/health")?;
        if json["stream"] == "idle" {
            break;
        }
        assert!(Instant::now() < deadline, "stream never returned to idle");
        std::thread::sleep(Duration::from_millis(20));
    }
    Ok(())
}

#[test]
fn webcam_reports_unavailable_camera() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let missing = dir.path().join("no-such-camera.jpg");
    let api = TestApi::new(&missing.to_string_lossy())?;
    let (headers, json) = get(api.addr(), "/webcam")?;
    assert!(headers.starts_with("HTTP/1.1 503"));
    assert_eq!(json["detail"], "Cannot open webcam");

    let (_, json) = get(api.addr(), "/health")?;
    assert_eq!(json["stream"], "idle");
    Ok(())
}

#[test]
fn predictions_are_recorded_to_sink() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let sink = Arc::new(SqliteSink::open(dir.path().join("detections.db"))?);
    let api = TestApi::with_state("stub://cam", |state| Ok(state.with_sink(sink.clone())))?;
    let (headers, _) = post_image(api.addr(), "image/jpeg", &jpeg_fixture())?;
    assert!(headers.starts_with("HTTP/1.1 200 OK"));

    let deadline = Instant::now() + Duration::from_secs(5);
    let rows = loop {
        let rows = sink.recent(10)?;
        if !rows.is_empty() || Instant::now() > deadline {
            break rows;
        }
        std::thread::sleep(Duration::from_millis(20));
    };
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].label, "apple_fresh");
    assert_eq!(rows[0].source, "upload");
    assert!(rows[0].image_url.starts_with("file://"));
    assert!(!rows[0].used);
    Ok(())
}
