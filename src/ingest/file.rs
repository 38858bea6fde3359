//! Local image sources.
//!
//! `ImageFileSource` replays a single image or every image in a directory
//! (sorted by name), then reports exhaustion. `SyntheticSource` serves
//! generated frames for `stub://` locations.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::FrameSource;
use crate::frame::{ChannelOrder, Frame};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Image file or directory frame source.
pub struct ImageFileSource {
    path: PathBuf,
    queue: Vec<PathBuf>,
    frames_read: u64,
}

impl ImageFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            queue: Vec::new(),
            frames_read: 0,
        }
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

impl FrameSource for ImageFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&mut self) -> Result<()> {
        let mut files = if self.path.is_dir() {
            list_images(&self.path)?
        } else if self.path.is_file() {
            vec![self.path.clone()]
        } else {
            return Err(anyhow!("no such image file or directory: {}", self.path.display()));
        };
        if files.is_empty() {
            return Err(anyhow!("no images found in {}", self.path.display()));
        }
        // Popped from the back.
        files.reverse();
        self.queue = files;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.queue.pop() else {
            return Ok(None);
        };
        let bytes = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        let frame = Frame::decode(&bytes).with_context(|| format!("decode {}", path.display()))?;
        self.frames_read += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.queue.clear();
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

/// Generated BGR frames. `stub://name?frames=N` stops after `N` frames;
/// without a limit the source never runs dry.
pub struct SyntheticSource {
    location: String,
    width: u32,
    height: u32,
    limit: Option<u64>,
    frame_count: u64,
    open: bool,
}

impl SyntheticSource {
    pub fn new(location: &str, width: u32, height: u32, limit: Option<u64>) -> Self {
        Self {
            location: location.to_string(),
            width,
            height,
            limit,
            frame_count: 0,
            open: false,
        }
    }

    /// Parse the optional `frames=N` query parameter from a `stub://` location.
    pub fn from_location(location: &str, width: u32, height: u32) -> Result<Self> {
        let mut limit = None;
        if let Some((_, query)) = location.split_once('?') {
            for pair in query.split('&') {
                if let Some(value) = pair.strip_prefix("frames=") {
                    limit = Some(
                        value
                            .parse::<u64>()
                            .with_context(|| format!("invalid frames value in {}", location))?,
                    );
                }
            }
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("synthetic source needs non-zero dimensions"));
        }
        Ok(Self::new(location, width, height, limit))
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_count
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = (self.width as usize) * (self.height as usize) * 3;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 / 3 + self.frame_count) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        self.location.clone()
    }

    fn open(&mut self) -> Result<()> {
        self.open = true;
        log::info!("SyntheticSource: connected to {}", self.location);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.open {
            return Err(anyhow!("synthetic source {} is not open", self.location));
        }
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        let pixels = self.generate_pixels();
        self.frame_count += 1;
        Frame::new(pixels, self.width, self.height, ChannelOrder::Bgr).map(Some)
    }

    fn release(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn synthetic_source_honours_frame_limit() -> Result<()> {
        let mut source = SyntheticSource::from_location("stub://test?frames=2", 64, 48)?;
        source.open()?;
        let frame = source.next_frame()?.expect("first frame");
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(frame.order, ChannelOrder::Bgr);
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn synthetic_source_requires_open() {
        let mut source = SyntheticSource::new("stub://closed", 8, 8, None);
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn bad_frame_limit_is_rejected() {
        assert!(SyntheticSource::from_location("stub://x?frames=many", 8, 8).is_err());
    }

    #[test]
    fn directory_source_replays_images_in_name_order() -> Result<()> {
        let dir = TempDir::new()?;
        RgbImage::from_pixel(4, 4, Rgb([10, 10, 10])).save(dir.path().join("b.png"))?;
        RgbImage::from_pixel(6, 2, Rgb([20, 20, 20])).save(dir.path().join("a.png"))?;
        std::fs::write(dir.path().join("notes.txt"), b"ignored")?;

        let mut source = ImageFileSource::new(dir.path());
        source.open()?;
        let first = source.next_frame()?.expect("a.png");
        assert_eq!((first.width, first.height), (6, 2));
        let second = source.next_frame()?.expect("b.png");
        assert_eq!((second.width, second.height), (4, 4));
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.frames_read(), 2);
        Ok(())
    }

    #[test]
    fn missing_path_fails_to_open() {
        let mut source = ImageFileSource::new("/nonexistent/fruit.jpg");
        assert!(source.open().is_err());
    }
}
