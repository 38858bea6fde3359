use serde::Serialize;

use crate::frame::BoundingBox;

/// A located candidate object.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    /// Pixel box, clipped to the frame it was detected in.
    pub bbox: BoundingBox,
    /// Detector class id (COCO ordinal for YOLO models).
    pub class_id: usize,
    /// Detector class name, e.g. "apple".
    pub category: String,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, class_id: usize, category: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            category: category.into(),
            confidence,
        }
    }
}
