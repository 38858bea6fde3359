use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};

use crate::frame::{BoundingBox, Frame};

/// Side length of the classifier input.
pub const CROP_SIZE: u32 = 224;

/// Per-channel normalization constants (RGB order).
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

const PLANE: usize = (CROP_SIZE as usize) * (CROP_SIZE as usize);

/// Normalized classifier input, CHW layout, RGB channel order.
#[derive(Clone, Debug, PartialEq)]
pub struct CropTensor {
    data: Vec<f32>,
}

impl CropTensor {
    /// Model input shape `[batch, channels, height, width]`.
    pub const SHAPE: [usize; 4] = [1, 3, CROP_SIZE as usize, CROP_SIZE as usize];

    pub fn from_chw(data: Vec<f32>) -> Result<Self> {
        if data.len() != 3 * PLANE {
            return Err(anyhow!(
                "crop tensor needs {} values, got {}",
                3 * PLANE,
                data.len()
            ));
        }
        Ok(Self { data })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn channel(&self, channel: usize) -> &[f32] {
        &self.data[channel * PLANE..(channel + 1) * PLANE]
    }

    /// Mean of one normalized channel.
    pub fn channel_mean(&self, channel: usize) -> f32 {
        self.channel(channel).iter().sum::<f32>() / PLANE as f32
    }
}

/// Crop `bbox` out of `frame`, convert to RGB, resize to 224x224 and normalize.
///
/// Callers must reject degenerate boxes first; an empty crop here is a
/// contract violation and is reported as an error.
pub fn extract_region(frame: &Frame, bbox: &BoundingBox) -> Result<CropTensor> {
    let crop = frame
        .crop_rgb(bbox)
        .ok_or_else(|| anyhow!("empty crop for box {:?}", <[i32; 4]>::from(*bbox)))?;
    let resized = imageops::resize(&crop, CROP_SIZE, CROP_SIZE, FilterType::Triangle);

    let mut data = vec![0.0f32; 3 * PLANE];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let offset = (y as usize) * (CROP_SIZE as usize) + x as usize;
        for channel in 0..3 {
            let value = pixel[channel] as f32 / 255.0;
            data[channel * PLANE + offset] = (value - CHANNEL_MEAN[channel]) / CHANNEL_STD[channel];
        }
    }
    Ok(CropTensor { data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ChannelOrder;

    fn solid_frame(bgr: [u8; 3], order: ChannelOrder) -> Frame {
        let pixels = bgr.repeat(40 * 30);
        Frame::new(pixels, 40, 30, order).unwrap()
    }

    #[test]
    fn extract_produces_fixed_size_normalized_tensor() {
        let frame = solid_frame([255, 255, 255], ChannelOrder::Rgb);
        let tensor = extract_region(&frame, &BoundingBox::new(5, 5, 20, 25)).unwrap();
        assert_eq!(tensor.as_slice().len(), 3 * 224 * 224);
        for channel in 0..3 {
            let expected = (1.0 - CHANNEL_MEAN[channel]) / CHANNEL_STD[channel];
            assert!((tensor.channel_mean(channel) - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn bgr_input_is_converted_to_rgb() {
        // Stored as BGR: pure blue in storage becomes red=0, blue=255.
        let frame = solid_frame([255, 0, 0], ChannelOrder::Bgr);
        let tensor = extract_region(&frame, &BoundingBox::new(0, 0, 40, 30)).unwrap();
        let red = (0.0 - CHANNEL_MEAN[0]) / CHANNEL_STD[0];
        let blue = (1.0 - CHANNEL_MEAN[2]) / CHANNEL_STD[2];
        assert!((tensor.channel_mean(0) - red).abs() < 1e-4);
        assert!((tensor.channel_mean(2) - blue).abs() < 1e-4);
    }

    #[test]
    fn empty_crop_is_rejected() {
        let frame = solid_frame([0, 0, 0], ChannelOrder::Rgb);
        assert!(extract_region(&frame, &BoundingBox::new(10, 10, 10, 20)).is_err());
        assert!(extract_region(&frame, &BoundingBox::new(50, 50, 60, 60)).is_err());
    }

    #[test]
    fn from_chw_validates_length() {
        assert!(CropTensor::from_chw(vec![0.0; 10]).is_err());
        assert!(CropTensor::from_chw(vec![0.0; 3 * 224 * 224]).is_ok());
    }
}
