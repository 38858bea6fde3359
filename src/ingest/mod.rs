//! Frame ingestion sources.
//!
//! This module provides different sources of frames for the pipeline:
//! - Image files or directories of images (one-shot runs, replay)
//! - USB/V4L2 cameras (feature: ingest-v4l2)
//! - MJPEG/JPEG cameras over HTTP (feature: ingest-mjpeg)
//! - Synthetic `stub://` source (testing)
//!
//! A streaming session owns its source exclusively through a `SourceGuard`,
//! which releases the underlying device exactly once, on drop.

pub mod file;
#[cfg(feature = "ingest-mjpeg")]
pub mod mjpeg;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use file::{ImageFileSource, SyntheticSource};
#[cfg(feature = "ingest-mjpeg")]
pub use mjpeg::MjpegSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

/// A producer of frames.
///
/// `next_frame` returns `Ok(None)` once the source is exhausted; an `Err`
/// means the source could not deliver a frame. Either ends a stream.
pub trait FrameSource: Send {
    /// Human-readable location, used in logs.
    fn describe(&self) -> String;

    /// Acquire the underlying device or file handle.
    fn open(&mut self) -> Result<()>;

    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying handle. Called at most once by `SourceGuard`.
    fn release(&mut self);
}

/// Where frames come from and what resolution to ask for.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// `stub://...`, `http(s)://...`, `/dev/video*`, or a file/directory path.
    pub location: String,
    pub width: u32,
    pub height: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            location: "/dev/video0".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Build (but do not open) the source named by `config.location`.
pub fn build_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    let location = config.location.trim();
    if location.is_empty() {
        return Err(anyhow!("frame source location is empty"));
    }
    if location.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::from_location(
            location,
            config.width,
            config.height,
        )?));
    }
    if location.starts_with("http://") || location.starts_with("https://") {
        #[cfg(feature = "ingest-mjpeg")]
        {
            return Ok(Box::new(MjpegSource::new(location)?));
        }
        #[cfg(not(feature = "ingest-mjpeg"))]
        {
            return Err(anyhow!(
                "http camera sources require the ingest-mjpeg feature"
            ));
        }
    }
    if location.contains("://") {
        return Err(anyhow!("unsupported frame source scheme in '{}'", location));
    }
    if location.starts_with("/dev/video") {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(V4l2Source::new(
                location,
                config.width,
                config.height,
            )));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            return Err(anyhow!(
                "camera device {} requires the ingest-v4l2 feature",
                location
            ));
        }
    }
    Ok(Box::new(ImageFileSource::new(location)))
}

/// Build and open a source, returning the guard that owns it.
pub fn open_source(config: &SourceConfig) -> Result<SourceGuard> {
    SourceGuard::open(build_source(config)?)
}

/// Scoped ownership of an open frame source.
pub struct SourceGuard {
    source: Option<Box<dyn FrameSource>>,
    description: String,
}

impl SourceGuard {
    /// Open `source`. On failure the source is released before returning.
    pub fn open(mut source: Box<dyn FrameSource>) -> Result<Self> {
        let description = source.describe();
        if let Err(err) = source.open() {
            source.release();
            return Err(err.context(format!("open frame source {}", description)));
        }
        log::info!("frame source {} opened", description);
        Ok(Self {
            source: Some(source),
            description,
        })
    }

    pub fn describe(&self) -> &str {
        &self.description
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.source.as_mut() {
            Some(source) => source.next_frame(),
            None => Ok(None),
        }
    }

    /// Release now instead of at end of scope.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
            log::info!("frame source {} released", self.description);
        }
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}
