use anyhow::{anyhow, Result};

use crate::detect::backend::{DetectorBackend, DetectorSettings};
use crate::detect::result::Detection;
use crate::frame::Frame;
use crate::labels::COCO_CLASSES;

/// Stub backend for testing. Replays a fixed detection list for every frame.
///
/// Boxes are clipped to each frame and the confidence threshold is applied,
/// as a real backend would do.
pub struct StubDetectorBackend {
    detections: Vec<Detection>,
    failure: Option<String>,
    frames_seen: u64,
}

impl StubDetectorBackend {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            failure: None,
            frames_seen: 0,
        }
    }

    /// A backend whose every `detect` call fails.
    pub fn failing(message: &str) -> Self {
        Self {
            detections: Vec::new(),
            failure: Some(message.to_string()),
            frames_seen: 0,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl Default for StubDetectorBackend {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl DetectorBackend for StubDetectorBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn class_names(&self) -> Vec<String> {
        COCO_CLASSES.iter().map(|c| c.to_string()).collect()
    }

    fn detect(&mut self, frame: &Frame, settings: &DetectorSettings) -> Result<Vec<Detection>> {
        self.frames_seen += 1;
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }
        Ok(self
            .detections
            .iter()
            .filter(|d| d.confidence >= settings.confidence)
            .map(|d| Detection {
                bbox: d.bbox.clipped(frame.width, frame.height),
                ..d.clone()
            })
            .collect())
    }
}
