use anyhow::{anyhow, Result};

use crate::classify::{ClassifierBackend, CropTensor};
use crate::labels::NUM_FRESHNESS_LABELS;

/// Stub backend for testing. Returns the same logits for every input.
pub struct StubClassifierBackend {
    logits: [f32; NUM_FRESHNESS_LABELS],
    failure: Option<String>,
}

impl StubClassifierBackend {
    pub fn new(logits: [f32; NUM_FRESHNESS_LABELS]) -> Self {
        Self {
            logits,
            failure: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            logits: [0.0; NUM_FRESHNESS_LABELS],
            failure: Some(message.to_string()),
        }
    }
}

impl ClassifierBackend for StubClassifierBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn logits(&mut self, _input: &CropTensor) -> Result<Vec<f32>> {
        match &self.failure {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(self.logits.to_vec()),
        }
    }
}
