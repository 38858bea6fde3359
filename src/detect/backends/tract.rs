#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectorBackend, DetectorSettings};
use crate::detect::result::Detection;
use crate::detect::yolo::{decode_yolo_output, Letterbox};
use crate::frame::Frame;
use crate::labels::COCO_CLASSES;

/// Tract-based YOLO detector.
///
/// Loads a local ONNX export (e.g. `yolov8n.onnx`) with a fixed square input
/// and COCO class ordering.
pub struct TractDetectorBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    class_names: Vec<String>,
}

impl TractDetectorBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            class_names: COCO_CLASSES.iter().map(|c| c.to_string()).collect(),
        })
    }

    fn build_input(&self, letterbox: &Letterbox, frame: &Frame) -> Tensor {
        let image = letterbox.apply(frame);
        let size = self.input_size as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            image.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        })
        .into_tensor()
    }
}

impl DetectorBackend for TractDetectorBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn class_names(&self) -> Vec<String> {
        self.class_names.clone()
    }

    fn detect(&mut self, frame: &Frame, settings: &DetectorSettings) -> Result<Vec<Detection>> {
        let letterbox = Letterbox::for_frame(frame.width, frame.height, self.input_size);
        let input = self.build_input(&letterbox, frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX detector inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("detector produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("detector output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let data: Vec<f32> = view.iter().copied().collect();
        decode_yolo_output(
            &data,
            &shape,
            &letterbox,
            frame.width,
            frame.height,
            settings,
            &self.class_names,
        )
    }

    fn warm_up(&mut self) -> Result<()> {
        let size = self.input_size;
        let blank = Frame::new(
            vec![0u8; (size as usize) * (size as usize) * 3],
            size,
            size,
            crate::frame::ChannelOrder::Rgb,
        )?;
        self.detect(&blank, &DetectorSettings::ONE_SHOT).map(|_| ())
    }
}
