//! Detection-to-classification pipeline.
//!
//! One `predict` call per frame: detect, drop degenerate boxes, extract and
//! classify each surviving region. A region whose classification fails turns
//! into a `PredictionRecord::Failed` and never stops its siblings.

pub mod annotate;
pub mod stream;

pub use stream::{run_stream, StreamController, StreamEnd, StreamSession, StreamState, StreamSummary};

use anyhow::Result;
use serde::{Serialize, Serializer};

use crate::classify::{extract_region, FreshnessClassifier};
use crate::config::FreshdConfig;
use crate::detect::{Detection, DetectionMode, Detector};
use crate::frame::{BoundingBox, Frame};
use crate::labels::FreshnessLabel;

/// Outcome for one detected region, in detector output order.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PredictionRecord {
    Classified {
        bbox: BoundingBox,
        label: FreshnessLabel,
        #[serde(serialize_with = "three_decimals")]
        confidence: f32,
        detected_object: String,
        #[serde(skip)]
        detector_confidence: f32,
    },
    Failed {
        bbox: BoundingBox,
        error: String,
        #[serde(skip)]
        detected_object: String,
        #[serde(skip)]
        detector_confidence: f32,
    },
}

impl PredictionRecord {
    pub fn bbox(&self) -> BoundingBox {
        match self {
            PredictionRecord::Classified { bbox, .. } | PredictionRecord::Failed { bbox, .. } => *bbox,
        }
    }

    pub fn label(&self) -> Option<FreshnessLabel> {
        match self {
            PredictionRecord::Classified { label, .. } => Some(*label),
            PredictionRecord::Failed { .. } => None,
        }
    }

    pub fn detected_object(&self) -> &str {
        match self {
            PredictionRecord::Classified {
                detected_object, ..
            }
            | PredictionRecord::Failed {
                detected_object, ..
            } => detected_object,
        }
    }

    pub fn detector_confidence(&self) -> f32 {
        match self {
            PredictionRecord::Classified {
                detector_confidence,
                ..
            }
            | PredictionRecord::Failed {
                detector_confidence,
                ..
            } => *detector_confidence,
        }
    }

    pub fn is_classified(&self) -> bool {
        matches!(self, PredictionRecord::Classified { .. })
    }
}

fn three_decimals<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64((f64::from(*value) * 1000.0).round() / 1000.0)
}

/// Every record produced for one frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FramePredictions {
    pub predictions: Vec<PredictionRecord>,
    pub total_detections: usize,
}

impl FramePredictions {
    fn new(predictions: Vec<PredictionRecord>) -> Self {
        Self {
            total_detections: predictions.len(),
            predictions,
        }
    }
}

pub struct Pipeline {
    detector: Detector,
    classifier: FreshnessClassifier,
}

impl Pipeline {
    pub fn new(detector: Detector, classifier: FreshnessClassifier) -> Self {
        Self {
            detector,
            classifier,
        }
    }

    /// Load both models named in `config`. Any failure here is fatal to startup.
    #[cfg(feature = "backend-tract")]
    pub fn from_config(config: &FreshdConfig) -> Result<Self> {
        use crate::classify::TractClassifierBackend;
        use crate::detect::TractDetectorBackend;
        use anyhow::Context;

        let models = &config.models;
        let detector_backend = TractDetectorBackend::new(&models.detector, models.detector_input)
            .with_context(|| format!("load detector model {}", models.detector.display()))?;
        let detector = Detector::new(detector_backend, &config.detection.target_classes)?
            .with_settings(DetectionMode::OneShot, config.detection.one_shot)
            .with_settings(DetectionMode::Streaming, config.detection.streaming);
        detector.warm_up()?;

        let classifier_backend = TractClassifierBackend::new(&models.classifier)
            .with_context(|| format!("load classifier model {}", models.classifier.display()))?;
        log::info!(
            "models loaded: detector={} classifier={}",
            models.detector.display(),
            models.classifier.display()
        );
        Ok(Self::new(detector, FreshnessClassifier::new(classifier_backend)))
    }

    #[cfg(not(feature = "backend-tract"))]
    pub fn from_config(_config: &FreshdConfig) -> Result<Self> {
        anyhow::bail!("no model backend compiled in; rebuild with --features backend-tract")
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn classifier(&self) -> &FreshnessClassifier {
        &self.classifier
    }

    /// Run the full pipeline on one frame.
    ///
    /// Only a detector failure is an error; per-region problems are either
    /// dropped with a warning or reported as `Failed` records.
    pub fn predict(&self, frame: &Frame, mode: DetectionMode) -> Result<FramePredictions> {
        let detections = self.detector.detect(frame, mode)?;
        Ok(FramePredictions::new(self.classify_detections(frame, &detections)))
    }

    /// Classify already-detected regions of `frame`, preserving their order.
    pub fn classify_detections(&self, frame: &Frame, detections: &[Detection]) -> Vec<PredictionRecord> {
        let mut records = Vec::with_capacity(detections.len());
        for detection in detections {
            if !self.detector.is_target(detection) {
                log::debug!("dropping non-target detection '{}'", detection.category);
                continue;
            }
            if let Some(record) = self.classify_region(frame, detection) {
                records.push(record);
            }
        }
        records
    }

    fn classify_region(&self, frame: &Frame, detection: &Detection) -> Option<PredictionRecord> {
        let bbox = detection.bbox.clipped(frame.width, frame.height);
        if bbox.is_degenerate() {
            log::warn!("Invalid bounding box: {:?}", <[i32; 4]>::from(detection.bbox));
            return None;
        }
        let tensor = match extract_region(frame, &bbox) {
            Ok(tensor) => tensor,
            Err(err) => {
                log::warn!("Empty crop detected, skipping: {:#}", err);
                return None;
            }
        };
        let record = match self.classifier.classify(&tensor) {
            Ok(classification) => PredictionRecord::Classified {
                bbox,
                label: classification.label,
                confidence: classification.confidence,
                detected_object: detection.category.clone(),
                detector_confidence: detection.confidence,
            },
            Err(err) => {
                log::error!("Classification error: {:#}", err);
                PredictionRecord::Failed {
                    bbox,
                    error: format!("Classification failed: {:#}", err),
                    detected_object: detection.category.clone(),
                    detector_confidence: detection.confidence,
                }
            }
        };
        Some(record)
    }

    /// Draw boxes and labels for `records` onto `frame`.
    pub fn annotate(&self, frame: &mut Frame, records: &[PredictionRecord]) {
        annotate::draw_predictions(frame, records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::StubClassifierBackend;
    use crate::detect::StubDetectorBackend;
    use crate::frame::ChannelOrder;

    fn targets() -> Vec<String> {
        ["apple", "banana", "orange"].iter().map(|s| s.to_string()).collect()
    }

    fn frame() -> Frame {
        Frame::new(vec![90u8; 200 * 100 * 3], 200, 100, ChannelOrder::Bgr).unwrap()
    }

    fn pipeline(detections: Vec<Detection>, classifier: StubClassifierBackend) -> Pipeline {
        let detector = Detector::new(StubDetectorBackend::new(detections), &targets()).unwrap();
        Pipeline::new(detector, FreshnessClassifier::new(classifier))
    }

    #[test]
    fn empty_scene_yields_no_predictions() {
        let pipeline = pipeline(Vec::new(), StubClassifierBackend::new([0.0; 6]));
        let result = pipeline.predict(&frame(), DetectionMode::OneShot).unwrap();
        assert!(result.predictions.is_empty());
        assert_eq!(result.total_detections, 0);
    }

    #[test]
    fn degenerate_boxes_are_skipped() {
        let pipeline = pipeline(
            vec![
                Detection::new(BoundingBox::new(50, 10, 50, 60), 47, "apple", 0.9),
                Detection::new(BoundingBox::new(10, 60, 40, 20), 46, "banana", 0.8),
                Detection::new(BoundingBox::new(10, 10, 40, 40), 49, "orange", 0.7),
            ],
            StubClassifierBackend::new([0.0, 0.0, 0.0, 0.0, 5.0, 0.0]),
        );
        let result = pipeline.predict(&frame(), DetectionMode::OneShot).unwrap();
        assert_eq!(result.total_detections, 1);
        assert_eq!(result.predictions[0].bbox(), BoundingBox::new(10, 10, 40, 40));
        assert_eq!(result.predictions[0].label(), Some(FreshnessLabel::OrangeFresh));
    }

    #[test]
    fn classifier_failure_is_isolated_per_region() {
        let pipeline = pipeline(
            vec![
                Detection::new(BoundingBox::new(0, 0, 20, 20), 47, "apple", 0.9),
                Detection::new(BoundingBox::new(30, 30, 60, 60), 46, "banana", 0.8),
            ],
            StubClassifierBackend::failing("tensor shape mismatch"),
        );
        let result = pipeline.predict(&frame(), DetectionMode::OneShot).unwrap();
        assert_eq!(result.total_detections, 2);
        for record in &result.predictions {
            match record {
                PredictionRecord::Failed { error, .. } => {
                    assert_eq!(error, "Classification failed: tensor shape mismatch");
                }
                other => panic!("expected failure record, got {:?}", other),
            }
        }
        assert_eq!(result.predictions[1].detected_object(), "banana");
    }

    #[test]
    fn records_serialize_in_wire_shape() {
        let classified = PredictionRecord::Classified {
            bbox: BoundingBox::new(1, 2, 3, 4),
            label: FreshnessLabel::AppleFresh,
            confidence: 0.91234,
            detected_object: "apple".to_string(),
            detector_confidence: 0.8,
        };
        let failed = PredictionRecord::Failed {
            bbox: BoundingBox::new(5, 6, 7, 8),
            error: "Classification failed: boom".to_string(),
            detected_object: "banana".to_string(),
            detector_confidence: 0.6,
        };
        let json = serde_json::to_value(FramePredictions::new(vec![classified, failed])).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "predictions": [
                    {"bbox": [1, 2, 3, 4], "label": "apple_fresh", "confidence": 0.912, "detected_object": "apple"},
                    {"bbox": [5, 6, 7, 8], "error": "Classification failed: boom"}
                ],
                "total_detections": 2
            })
        );
    }

    #[test]
    fn detector_order_is_preserved() {
        let pipeline = pipeline(
            vec![
                Detection::new(BoundingBox::new(100, 10, 150, 60), 46, "banana", 0.6),
                Detection::new(BoundingBox::new(0, 0, 40, 40), 47, "apple", 0.9),
            ],
            StubClassifierBackend::new([1.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        );
        let result = pipeline.predict(&frame(), DetectionMode::Streaming).unwrap();
        let objects: Vec<_> = result.predictions.iter().map(|r| r.detected_object()).collect();
        assert_eq!(objects, vec!["banana", "apple"]);
    }
}
