//! Detection result sinks.
//!
//! A sink stores an image blob, returns a reference URL for it, and records
//! one detection row per classified region. Sinks sit outside the request
//! path: callers log their failures and carry on.

#[cfg(feature = "sink-rest")]
pub mod rest;
pub mod sqlite;

#[cfg(feature = "sink-rest")]
pub use rest::{RestSink, RestSinkConfig};
pub use sqlite::SqliteSink;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::pipeline::PredictionRecord;

/// One stored detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub source: String,
    pub label: String,
    pub confidence: f32,
    pub image_url: String,
    pub detected_at: DateTime<Utc>,
    pub used: bool,
    pub expiry_estimate: Option<DateTime<Utc>>,
}

impl DetectionRecord {
    pub fn new(source: &str, label: &str, confidence: f32, image_url: &str) -> Self {
        Self {
            source: source.to_string(),
            label: label.to_string(),
            confidence,
            image_url: image_url.to_string(),
            detected_at: Utc::now(),
            used: false,
            expiry_estimate: None,
        }
    }
}

pub trait ResultSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Store `jpeg` under `name` and return a URL that refers to it.
    fn upload_image(&self, name: &str, jpeg: &[u8]) -> Result<String>;

    fn record_detection(&self, record: &DetectionRecord) -> Result<()>;
}

/// Content-addressed blob name for `jpeg`.
pub fn image_name(jpeg: &[u8]) -> String {
    format!("{}.jpg", hex::encode(Sha256::digest(jpeg)))
}

/// Upload `jpeg` once and record every classified prediction against it.
///
/// Failed records are skipped. Returns the number of rows written.
pub fn record_predictions(
    sink: &dyn ResultSink,
    source: &str,
    jpeg: &[u8],
    predictions: &[PredictionRecord],
) -> Result<usize> {
    let classified: Vec<_> = predictions
        .iter()
        .filter_map(|record| match record {
            PredictionRecord::Classified {
                label, confidence, ..
            } => Some((*label, *confidence)),
            PredictionRecord::Failed { .. } => None,
        })
        .collect();
    if classified.is_empty() {
        return Ok(0);
    }

    let image_url = sink.upload_image(&image_name(jpeg), jpeg)?;
    for (label, confidence) in &classified {
        let record = DetectionRecord::new(source, label.as_str(), *confidence, &image_url);
        sink.record_detection(&record)?;
    }
    log::debug!(
        "{} sink stored {} detections for {}",
        sink.name(),
        classified.len(),
        image_url
    );
    Ok(classified.len())
}
