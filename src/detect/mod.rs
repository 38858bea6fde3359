//! Fruit detection.
//!
//! `Detector` owns one backend behind a mutex, so concurrent one-shot and
//! streaming requests serialize on the model, and restricts backend output to
//! the configured target categories.

mod backend;
mod backends;
mod result;
pub mod yolo;

pub use backend::{DetectionMode, DetectorBackend, DetectorSettings};
pub use backends::StubDetectorBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractDetectorBackend;
pub use result::Detection;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub struct Detector {
    backend: Arc<Mutex<dyn DetectorBackend>>,
    backend_name: &'static str,
    target_ids: BTreeSet<usize>,
    one_shot: DetectorSettings,
    streaming: DetectorSettings,
}

impl Detector {
    /// Wrap a backend, resolving `target_classes` against its class names.
    ///
    /// Every target must be known to the backend; an unknown name means the
    /// model and configuration disagree, which is a startup error.
    pub fn new<B: DetectorBackend + 'static>(backend: B, target_classes: &[String]) -> Result<Self> {
        let names = backend.class_names();
        let mut target_ids = BTreeSet::new();
        for target in target_classes {
            let id = names
                .iter()
                .position(|name| name == target)
                .ok_or_else(|| {
                    anyhow!(
                        "target class '{}' is not produced by detector backend '{}'",
                        target,
                        backend.name()
                    )
                })?;
            target_ids.insert(id);
        }
        if target_ids.is_empty() {
            return Err(anyhow!("detector needs at least one target class"));
        }
        log::info!(
            "detector backend '{}' ready; target ids {:?}",
            backend.name(),
            target_ids
        );
        Ok(Self {
            backend_name: backend.name(),
            backend: Arc::new(Mutex::new(backend)),
            target_ids,
            one_shot: DetectorSettings::ONE_SHOT,
            streaming: DetectorSettings::STREAMING,
        })
    }

    /// Override thresholds for one mode.
    pub fn with_settings(mut self, mode: DetectionMode, settings: DetectorSettings) -> Self {
        match mode {
            DetectionMode::OneShot => self.one_shot = settings,
            DetectionMode::Streaming => self.streaming = settings,
        }
        self
    }

    pub fn settings(&self, mode: DetectionMode) -> DetectorSettings {
        match mode {
            DetectionMode::OneShot => self.one_shot,
            DetectionMode::Streaming => self.streaming,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    pub fn is_target(&self, detection: &Detection) -> bool {
        self.target_ids.contains(&detection.class_id)
    }

    pub fn warm_up(&self) -> Result<()> {
        let mut guard = self
            .backend
            .lock()
            .map_err(|_| anyhow!("detector backend lock poisoned"))?;
        guard.warm_up()
    }

    /// Detect target-category objects in `frame`, in backend output order.
    pub fn detect(&self, frame: &Frame, mode: DetectionMode) -> Result<Vec<Detection>> {
        let settings = self.settings(mode);
        let detections = {
            let mut guard = self
                .backend
                .lock()
                .map_err(|_| anyhow!("detector backend lock poisoned"))?;
            guard.detect(frame, &settings)?
        };
        Ok(detections
            .into_iter()
            .filter(|d| self.is_target(d))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{BoundingBox, ChannelOrder};

    fn targets() -> Vec<String> {
        ["apple", "banana", "orange"].iter().map(|s| s.to_string()).collect()
    }

    fn blank_frame() -> Frame {
        Frame::new(vec![0u8; 100 * 100 * 3], 100, 100, ChannelOrder::Bgr).unwrap()
    }

    #[test]
    fn non_target_categories_are_filtered_in_order() {
        let backend = StubDetectorBackend::new(vec![
            Detection::new(BoundingBox::new(0, 0, 10, 10), 0, "person", 0.95),
            Detection::new(BoundingBox::new(10, 10, 30, 30), 49, "orange", 0.9),
            Detection::new(BoundingBox::new(40, 40, 60, 60), 41, "cup", 0.8),
            Detection::new(BoundingBox::new(50, 50, 70, 70), 47, "apple", 0.7),
        ]);
        let detector = Detector::new(backend, &targets()).unwrap();
        let dets = detector.detect(&blank_frame(), DetectionMode::OneShot).unwrap();
        let categories: Vec<&str> = dets.iter().map(|d| d.category.as_str()).collect();
        assert_eq!(categories, vec!["orange", "apple"]);
    }

    #[test]
    fn unknown_target_class_is_a_startup_error() {
        let result = Detector::new(StubDetectorBackend::default(), &["durian".to_string()]);
        assert!(result.is_err());
        assert!(Detector::new(StubDetectorBackend::default(), &[]).is_err());
    }

    #[test]
    fn modes_use_their_own_thresholds() {
        let backend = StubDetectorBackend::new(vec![Detection::new(
            BoundingBox::new(0, 0, 10, 10),
            46,
            "banana",
            0.3,
        )]);
        let detector = Detector::new(backend, &targets()).unwrap();
        assert!(detector
            .detect(&blank_frame(), DetectionMode::OneShot)
            .unwrap()
            .is_empty());
        assert_eq!(
            detector
                .detect(&blank_frame(), DetectionMode::Streaming)
                .unwrap()
                .len(),
            1
        );

        let strict = DetectorSettings {
            confidence: 0.9,
            iou: 0.5,
        };
        let detector = detector.with_settings(DetectionMode::Streaming, strict);
        assert_eq!(detector.settings(DetectionMode::Streaming), strict);
        assert!(detector
            .detect(&blank_frame(), DetectionMode::Streaming)
            .unwrap()
            .is_empty());
    }
}
