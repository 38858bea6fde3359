use anyhow::Result;
use serde::Deserialize;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Thresholds applied by a detector backend.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct DetectorSettings {
    /// Minimum class confidence for a candidate to survive.
    pub confidence: f32,
    /// IoU above which overlapping same-class candidates are suppressed.
    pub iou: f32,
}

impl DetectorSettings {
    /// Precision-oriented thresholds for single uploaded images.
    pub const ONE_SHOT: DetectorSettings = DetectorSettings {
        confidence: 0.5,
        iou: 0.45,
    };

    /// Detector library defaults, used for live streaming.
    pub const STREAMING: DetectorSettings = DetectorSettings {
        confidence: 0.25,
        iou: 0.7,
    };
}

/// Which caller a detection run serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionMode {
    OneShot,
    Streaming,
}

/// Detector backend trait.
///
/// A backend is a pure function of the frame and its loaded model. It returns
/// every class it recognizes; target-category filtering happens in `Detector`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Class names indexed by class id.
    fn class_names(&self) -> Vec<String>;

    /// Run detection on a frame.
    ///
    /// Boxes must be in frame pixel coordinates and clipped to the frame.
    /// Output order is the backend's ranking and is preserved downstream.
    fn detect(&mut self, frame: &Frame, settings: &DetectorSettings) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
