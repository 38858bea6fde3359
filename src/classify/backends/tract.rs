#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::classify::{ClassifierBackend, CropTensor};
use crate::labels::NUM_FRESHNESS_LABELS;

/// Tract-based freshness classifier (MobileNetV2 ONNX export, eval mode).
pub struct TractClassifierBackend {
    model: TypedRunnableModel<TypedModel>,
}

impl TractClassifierBackend {
    /// Load an ONNX model from disk and check it emits one score per label.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let shape = CropTensor::SHAPE;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(shape[0], shape[1], shape[2], shape[3]),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let mut backend = Self { model };
        let probe = CropTensor::from_chw(vec![0.0; shape[1] * shape[2] * shape[3]])?;
        let scores = backend
            .logits(&probe)
            .context("classifier model failed probe inference")?;
        if scores.len() != NUM_FRESHNESS_LABELS {
            return Err(anyhow!(
                "classifier model {} emits {} classes, expected {}",
                model_path.display(),
                scores.len(),
                NUM_FRESHNESS_LABELS
            ));
        }
        Ok(backend)
    }
}

impl ClassifierBackend for TractClassifierBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn logits(&mut self, input: &CropTensor) -> Result<Vec<f32>> {
        let tensor = Tensor::from_shape(&CropTensor::SHAPE, input.as_slice())
            .context("failed to build classifier input tensor")?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX classifier inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("classifier produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("classifier output tensor was not f32")?;
        Ok(scores.iter().copied().collect())
    }
}
