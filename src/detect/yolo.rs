//! YOLO pre- and post-processing.
//!
//! Models take a square letterboxed RGB input and emit one row per anchor:
//! `[cx, cy, w, h, score_0 .. score_{C-1}]` in input pixel space. Exports
//! differ in whether that tensor is `[1, 4+C, N]` or `[1, N, 4+C]`; both are
//! accepted.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::detect::backend::DetectorSettings;
use crate::detect::result::Detection;
use crate::frame::{BoundingBox, Frame};

/// Grey used for letterbox padding.
const PAD_VALUE: u8 = 114;

/// Geometry of a letterbox resize from frame space into a square input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub input_size: u32,
    pub scale: f32,
    pub pad_x: u32,
    pub pad_y: u32,
    pub resized_width: u32,
    pub resized_height: u32,
}

impl Letterbox {
    pub fn for_frame(width: u32, height: u32, input_size: u32) -> Self {
        let scale = (input_size as f32 / width.max(1) as f32)
            .min(input_size as f32 / height.max(1) as f32);
        let resized_width = ((width as f32 * scale).round() as u32).clamp(1, input_size);
        let resized_height = ((height as f32 * scale).round() as u32).clamp(1, input_size);
        Self {
            input_size,
            scale,
            pad_x: (input_size - resized_width) / 2,
            pad_y: (input_size - resized_height) / 2,
            resized_width,
            resized_height,
        }
    }

    /// Resize and pad `frame` into the model input square.
    pub fn apply(&self, frame: &Frame) -> RgbImage {
        let rgb = frame.to_rgb_image();
        let resized = imageops::resize(
            &rgb,
            self.resized_width,
            self.resized_height,
            FilterType::Triangle,
        );
        let mut canvas = RgbImage::from_pixel(
            self.input_size,
            self.input_size,
            Rgb([PAD_VALUE, PAD_VALUE, PAD_VALUE]),
        );
        imageops::replace(&mut canvas, &resized, self.pad_x as i64, self.pad_y as i64);
        canvas
    }

    /// Map a point from input space back to frame space.
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    class_id: usize,
    score: f32,
}

/// Decode a raw YOLO output tensor into frame-space detections.
///
/// `shape` is the tensor shape (a leading batch dimension of 1 is allowed).
/// Results are ordered by descending confidence after class-aware NMS.
pub fn decode_yolo_output(
    data: &[f32],
    shape: &[usize],
    letterbox: &Letterbox,
    frame_width: u32,
    frame_height: u32,
    settings: &DetectorSettings,
    class_names: &[String],
) -> Result<Vec<Detection>> {
    let dims: Vec<usize> = match shape {
        [1, a, b] => vec![*a, *b],
        [a, b] => vec![*a, *b],
        other => return Err(anyhow!("unexpected detector output shape {:?}", other)),
    };
    let num_classes = class_names.len();
    let row_len = 4 + num_classes;
    let (anchors, channels_first) = if dims[0] == row_len {
        (dims[1], true)
    } else if dims[1] == row_len {
        (dims[0], false)
    } else {
        return Err(anyhow!(
            "detector output shape {:?} does not match {} classes",
            shape,
            num_classes
        ));
    };
    if data.len() != anchors * row_len {
        return Err(anyhow!(
            "detector output has {} values, expected {}",
            data.len(),
            anchors * row_len
        ));
    }

    let at = |anchor: usize, channel: usize| -> f32 {
        if channels_first {
            data[channel * anchors + anchor]
        } else {
            data[anchor * row_len + channel]
        }
    };

    let (fw, fh) = (frame_width as f32, frame_height as f32);
    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut class_id = 0;
        let mut score = f32::NEG_INFINITY;
        for class in 0..num_classes {
            let s = at(anchor, 4 + class);
            if s > score {
                score = s;
                class_id = class;
            }
        }
        if !score.is_finite() || score < settings.confidence {
            continue;
        }
        let (cx, cy, w, h) = (at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3));
        if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) {
            continue;
        }
        let (x1, y1) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);
        candidates.push(Candidate {
            x1: x1.clamp(0.0, fw),
            y1: y1.clamp(0.0, fh),
            x2: x2.clamp(0.0, fw),
            y2: y2.clamp(0.0, fh),
            class_id,
            score: score.min(1.0),
        });
    }

    Ok(nms(candidates, settings.iou)
        .into_iter()
        .map(|c| {
            Detection::new(
                BoundingBox::from_xyxy(c.x1, c.y1, c.x2, c.y2),
                c.class_id,
                class_names[c.class_id].clone(),
                c.score,
            )
        })
        .collect())
}

/// Class-aware non-maximum suppression. Output is sorted by descending score.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let suppressed = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id && iou(kept, &candidate) > iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a.x2 - a.x1).max(0.0) * (a.y2 - a.y1).max(0.0);
    let area_b = (b.x2 - b.x1).max(0.0) * (b.y2 - b.y1).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}
