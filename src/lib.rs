//! Fruit freshness service
//!
//! Detects apples, bananas and oranges in images or a live camera feed,
//! classifies each detected region as fresh or rotten, and keeps the latest
//! reading from an environmental sensor board.
//!
//! # Architecture
//!
//! Everything is synchronous and thread-based:
//!
//! 1. **Detect**: a YOLO-style detector finds target fruit and returns boxes
//!    in detector order.
//! 2. **Extract**: each box is clipped, cropped, resized to 224x224 and
//!    normalized.
//! 3. **Classify**: a six-way classifier maps the crop to a freshness label.
//!    Failures stay local to the region that caused them.
//! 4. **Serve**: the HTTP surface runs one-shot predictions, streams annotated
//!    MJPEG, and reports the latest sensor reading from a background
//!    ingestion thread.
//!
//! # Module Structure
//!
//! - `labels`: freshness label table and COCO class names
//! - `frame`: pixel buffers and bounding boxes
//! - `ingest`: frame sources (image files, V4L2, MJPEG over HTTP, synthetic)
//! - `detect` / `classify`: model backends and their post-processing
//! - `pipeline`: per-frame orchestration, annotation, streaming sessions
//! - `sensor`: telemetry parsing, latest-reading cache, ingestion loop
//! - `sink`: detection result storage
//! - `api`, `config`: the `freshd` service surface

pub mod api;
pub mod cancel;
pub mod classify;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod labels;
pub mod pipeline;
pub mod sensor;
pub mod sink;

pub use api::{ApiConfig, ApiHandle, ApiServer, AppState};
pub use cancel::CancelToken;
pub use classify::{Classification, ClassifierBackend, FreshnessClassifier};
pub use config::FreshdConfig;
pub use detect::{Detection, DetectionMode, Detector, DetectorBackend, DetectorSettings};
pub use frame::{BoundingBox, ChannelOrder, Frame};
pub use labels::{FreshnessLabel, Fruit};
pub use pipeline::{FramePredictions, Pipeline, PredictionRecord};
pub use sensor::{SensorCache, SensorReading};
pub use sink::{DetectionRecord, ResultSink};
