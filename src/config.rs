use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::DetectorSettings;
use crate::labels::coco_class_id;
#[cfg(feature = "sink-rest")]
use crate::sink::RestSinkConfig;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_DETECTOR_MODEL: &str = "models/yolov8n.onnx";
const DEFAULT_CLASSIFIER_MODEL: &str = "models/fruit_freshness_mobilenet_v2.onnx";
const DEFAULT_DETECTOR_INPUT: u32 = 640;
const DEFAULT_TARGET_CLASSES: [&str; 3] = ["apple", "banana", "orange"];
const DEFAULT_CAMERA: &str = "/dev/video0";
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;
const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_SERIAL_BAUD: u32 = 9600;
const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 1000;
const DEFAULT_SERIAL_SETTLE_MS: u64 = 2000;
const DEFAULT_SERIAL_BACKOFF_SECS: u64 = 5;
const DEFAULT_SINK_SOURCE: &str = "upload";

#[derive(Debug, Deserialize, Default)]
struct FreshdConfigFile {
    api: Option<ApiConfigFile>,
    models: Option<ModelsConfigFile>,
    detection: Option<DetectionConfigFile>,
    camera: Option<CameraConfigFile>,
    sensor: Option<SensorConfigFile>,
    sink: Option<SinkConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_upload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelsConfigFile {
    detector: Option<PathBuf>,
    classifier: Option<PathBuf>,
    detector_input: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    target_classes: Option<Vec<String>>,
    one_shot: Option<DetectorSettings>,
    streaming: Option<DetectorSettings>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct SensorConfigFile {
    device: Option<String>,
    baud: Option<u32>,
    read_timeout_ms: Option<u64>,
    settle_ms: Option<u64>,
    backoff_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SinkConfigFile {
    sqlite_path: Option<PathBuf>,
    #[cfg(feature = "sink-rest")]
    rest: Option<RestSinkConfig>,
    source_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FreshdConfig {
    pub api_addr: String,
    pub max_upload_bytes: usize,
    pub models: ModelSettings,
    pub detection: DetectionSettings,
    pub camera: CameraSettings,
    pub sensor: SensorSettings,
    pub sink: SinkSettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub detector: PathBuf,
    pub classifier: PathBuf,
    pub detector_input: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub target_classes: Vec<String>,
    pub one_shot: DetectorSettings,
    pub streaming: DetectorSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct SensorSettings {
    /// No ingestion thread runs when unset.
    pub device: Option<String>,
    pub baud: u32,
    pub read_timeout: Duration,
    pub settle: Duration,
    pub backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub sqlite_path: Option<PathBuf>,
    #[cfg(feature = "sink-rest")]
    pub rest: Option<RestSinkConfig>,
    pub source_name: String,
}

impl FreshdConfig {
    /// Defaults, then the file named by `FRESHD_CONFIG`, then `FRESHD_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FRESHD_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FreshdConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let models = file.models.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let sensor = file.sensor.unwrap_or_default();
        let sink = file.sink.unwrap_or_default();

        Self {
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_upload_bytes: api.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            models: ModelSettings {
                detector: models
                    .detector
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DETECTOR_MODEL)),
                classifier: models
                    .classifier
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CLASSIFIER_MODEL)),
                detector_input: models.detector_input.unwrap_or(DEFAULT_DETECTOR_INPUT),
            },
            detection: DetectionSettings {
                target_classes: detection.target_classes.unwrap_or_else(|| {
                    DEFAULT_TARGET_CLASSES
                        .iter()
                        .map(|c| c.to_string())
                        .collect()
                }),
                one_shot: detection.one_shot.unwrap_or(DetectorSettings::ONE_SHOT),
                streaming: detection.streaming.unwrap_or(DetectorSettings::STREAMING),
            },
            camera: CameraSettings {
                source: camera.source.unwrap_or_else(|| DEFAULT_CAMERA.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                jpeg_quality: camera.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            sensor: SensorSettings {
                device: sensor.device.filter(|d| !d.trim().is_empty()),
                baud: sensor.baud.unwrap_or(DEFAULT_SERIAL_BAUD),
                read_timeout: Duration::from_millis(
                    sensor.read_timeout_ms.unwrap_or(DEFAULT_SERIAL_TIMEOUT_MS),
                ),
                settle: Duration::from_millis(sensor.settle_ms.unwrap_or(DEFAULT_SERIAL_SETTLE_MS)),
                backoff: Duration::from_secs(
                    sensor.backoff_secs.unwrap_or(DEFAULT_SERIAL_BACKOFF_SECS),
                ),
            },
            sink: SinkSettings {
                sqlite_path: sink.sqlite_path,
                #[cfg(feature = "sink-rest")]
                rest: sink.rest,
                source_name: sink
                    .source_name
                    .unwrap_or_else(|| DEFAULT_SINK_SOURCE.to_string()),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("FRESHD_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(path) = non_empty_env("FRESHD_DETECTOR_MODEL") {
            self.models.detector = PathBuf::from(path);
        }
        if let Some(path) = non_empty_env("FRESHD_CLASSIFIER_MODEL") {
            self.models.classifier = PathBuf::from(path);
        }
        if let Some(device) = non_empty_env("FRESHD_SERIAL_DEVICE") {
            self.sensor.device = Some(device);
        }
        if let Some(baud) = non_empty_env("FRESHD_SERIAL_BAUD") {
            self.sensor.baud = baud
                .parse()
                .map_err(|_| anyhow!("FRESHD_SERIAL_BAUD must be an integer baud rate"))?;
        }
        if let Some(camera) = non_empty_env("FRESHD_CAMERA") {
            self.camera.source = camera;
        }
        if let Ok(classes) = std::env::var("FRESHD_TARGET_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.detection.target_classes = parsed;
            }
        }
        if let Some(path) = non_empty_env("FRESHD_SINK_DB") {
            self.sink.sqlite_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        for (name, settings) in [
            ("one_shot", &self.detection.one_shot),
            ("streaming", &self.detection.streaming),
        ] {
            if !(0.0..=1.0).contains(&settings.confidence) || !(0.0..=1.0).contains(&settings.iou) {
                return Err(anyhow!(
                    "detection.{} thresholds must be within [0, 1]",
                    name
                ));
            }
        }

        if self.detection.target_classes.is_empty() {
            return Err(anyhow!("detection.target_classes must not be empty"));
        }
        for class in self.detection.target_classes.iter_mut() {
            *class = class.trim().to_lowercase();
            if coco_class_id(class).is_none() {
                return Err(anyhow!("unknown detection target class '{}'", class));
            }
        }
        self.detection.target_classes.dedup();

        if self.models.detector_input == 0 || self.models.detector_input % 32 != 0 {
            return Err(anyhow!("models.detector_input must be a positive multiple of 32"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be greater than zero"));
        }
        if !(1..=100).contains(&self.camera.jpeg_quality) {
            return Err(anyhow!("camera.jpeg_quality must be within 1..=100"));
        }
        if self.sensor.baud == 0 {
            return Err(anyhow!("sensor.baud must be greater than zero"));
        }
        if self.sensor.backoff.is_zero() {
            return Err(anyhow!("sensor.backoff_secs must be greater than zero"));
        }
        if self.max_upload_bytes == 0 {
            return Err(anyhow!("api.max_upload_bytes must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<FreshdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
