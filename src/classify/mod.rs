//! Freshness classification of detected regions.
//!
//! `extract_region` turns a crop into the fixed classifier input;
//! `FreshnessClassifier` runs a backend and maps its logits onto
//! `FreshnessLabel` through the ordinal table in `labels`.

mod backends;
pub mod extract;

pub use backends::StubClassifierBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractClassifierBackend;
pub use extract::{extract_region, CropTensor, CROP_SIZE};

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::labels::{FreshnessLabel, NUM_FRESHNESS_LABELS};

/// Classifier backend trait.
///
/// Backends return raw logits, one per entry of `FreshnessLabel::ALL`.
/// Inference must be deterministic: no dropout or batch statistics updates.
pub trait ClassifierBackend: Send {
    fn name(&self) -> &'static str;

    fn logits(&mut self, input: &CropTensor) -> Result<Vec<f32>>;
}

/// Winning label for one region.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub label: FreshnessLabel,
    /// Softmax probability of `label`.
    pub confidence: f32,
    /// Softmax distribution over `FreshnessLabel::ALL`.
    pub probabilities: [f32; NUM_FRESHNESS_LABELS],
}

impl Classification {
    /// Build from raw logits.
    pub fn from_logits(logits: &[f32]) -> Result<Self> {
        if logits.len() != NUM_FRESHNESS_LABELS {
            return Err(anyhow!(
                "classifier produced {} scores, expected {}",
                logits.len(),
                NUM_FRESHNESS_LABELS
            ));
        }
        if logits.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("classifier produced non-finite scores"));
        }
        let probabilities = softmax(logits);
        let (index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            });
        let label = FreshnessLabel::from_index(index)
            .ok_or_else(|| anyhow!("classifier index {} out of range", index))?;
        Ok(Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            probabilities,
        })
    }
}

fn softmax(logits: &[f32]) -> [f32; NUM_FRESHNESS_LABELS] {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut out = [0.0f32; NUM_FRESHNESS_LABELS];
    let mut sum = 0.0;
    for (slot, logit) in out.iter_mut().zip(logits) {
        *slot = (logit - max).exp();
        sum += *slot;
    }
    for slot in out.iter_mut() {
        *slot /= sum;
    }
    out
}

pub struct FreshnessClassifier {
    backend: Arc<Mutex<dyn ClassifierBackend>>,
    backend_name: &'static str,
}

impl FreshnessClassifier {
    pub fn new<B: ClassifierBackend + 'static>(backend: B) -> Self {
        log::info!("classifier backend '{}' ready", backend.name());
        Self {
            backend_name: backend.name(),
            backend: Arc::new(Mutex::new(backend)),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    pub fn classify(&self, input: &CropTensor) -> Result<Classification> {
        let logits = {
            let mut guard = self
                .backend
                .lock()
                .map_err(|_| anyhow!("classifier backend lock poisoned"))?;
            guard.logits(input)?
        };
        Classification::from_logits(&logits)
    }
}
