//! V4L2 frame source.
//!
//! Captures from a local device node (e.g. /dev/video0). The source asks for
//! packed RGB at the configured resolution; drivers that only offer MJPEG are
//! decoded in-memory. The device may override the requested resolution.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::FrameSource;
use crate::frame::{ChannelOrder, Frame};

/// V4L2 frame source.
pub struct V4l2Source {
    device_path: String,
    width: u32,
    height: u32,
    state: Option<DeviceState>,
    pixel_format: PixelFormat,
    frame_count: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PixelFormat {
    Rgb3,
    Mjpeg,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(device_path: &str, width: u32, height: u32) -> Self {
        Self {
            device_path: device_path.to_string(),
            width,
            height,
            state: None,
            pixel_format: PixelFormat::Rgb3,
            frame_count: 0,
        }
    }
}

impl FrameSource for V4l2Source {
    fn describe(&self) -> String {
        self.device_path.clone()
    }

    fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&self.device_path)
            .with_context(|| format!("open v4l2 device {}", self.device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.width;
        format.height = self.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.device_path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.pixel_format = if format.fourcc == v4l::FourCC::new(b"RGB3") {
            PixelFormat::Rgb3
        } else if format.fourcc == v4l::FourCC::new(b"MJPG") {
            PixelFormat::Mjpeg
        } else {
            return Err(anyhow!(
                "v4l2 device {} offers unsupported pixel format {}",
                self.device_path,
                format.fourcc
            ));
        };
        self.width = format.width;
        self.height = format.height;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{}, {:?})",
            self.device_path,
            self.width,
            self.height,
            self.pixel_format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let buf = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .context("capture v4l2 frame")?;

        let frame = match self.pixel_format {
            PixelFormat::Rgb3 => {
                let expected = (self.width as usize) * (self.height as usize) * 3;
                let pixels = buf.get(..expected).ok_or_else(|| {
                    anyhow!("short v4l2 buffer: {} < {} bytes", buf.len(), expected)
                })?;
                Frame::new(pixels.to_vec(), self.width, self.height, ChannelOrder::Rgb)?
            }
            PixelFormat::Mjpeg => Frame::decode(&buf).context("decode v4l2 mjpeg frame")?,
        };
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "V4l2Source: closed {} after {} frames",
                self.device_path,
                self.frame_count
            );
        }
    }
}
