//! Streaming sessions.
//!
//! `StreamController` holds the session state machine
//! (`Idle -> Running -> Stopping -> Idle`). A session is started by
//! `start`, which hands out the only `StreamSession`; `request_stop` flips
//! the session's cancel token, which `run_stream` checks once per frame.
//! The state returns to `Idle` when the session is dropped, after its frame
//! source has been released.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::detect::DetectionMode;
use crate::ingest::SourceGuard;
use crate::pipeline::Pipeline;

pub const MJPEG_BOUNDARY: &str = "frame";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Idle,
    Running,
    Stopping,
}

impl StreamState {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamState::Idle => "idle",
            StreamState::Running => "running",
            StreamState::Stopping => "stopping",
        }
    }
}

#[derive(Clone, Default)]
pub struct StreamController {
    inner: Arc<ControllerInner>,
}

#[derive(Default)]
struct ControllerInner {
    state: Mutex<Option<CancelToken>>,
}

impl StreamController {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<CancelToken>> {
        // The guarded value is a plain token; a poisoned lock still holds a valid one.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> StreamState {
        let slot = self.slot();
        match slot.as_ref() {
            None => StreamState::Idle,
            Some(token) if token.is_cancelled() => StreamState::Stopping,
            Some(_) => StreamState::Running,
        }
    }

    /// `Idle -> Running`. Fails while another session is running or stopping.
    pub fn start(&self) -> Result<StreamSession> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Err(anyhow!("a streaming session is already active"));
        }
        let token = CancelToken::new();
        *slot = Some(token.clone());
        log::info!("stream session started");
        Ok(StreamSession {
            controller: self.clone(),
            token,
        })
    }

    /// `Running -> Stopping`. Returns false when no session is running.
    pub fn request_stop(&self) -> bool {
        let slot = self.slot();
        match slot.as_ref() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                log::info!("stream stop requested");
                true
            }
            _ => false,
        }
    }

    fn finish(&self) {
        self.slot().take();
    }
}

/// The running session. Dropping it moves the controller back to `Idle`.
pub struct StreamSession {
    controller: StreamController,
    token: CancelToken,
}

impl StreamSession {
    pub fn stop_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.controller.finish();
        log::info!("stream session ended");
    }
}

/// Why a stream stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    StopRequested,
    SourceExhausted,
    SourceError(String),
    EncodeError(String),
    ClientDisconnected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames: u64,
    pub end: StreamEnd,
}

/// Write one multipart part carrying `jpeg`.
pub fn write_mjpeg_part<W: Write>(out: &mut W, jpeg: &[u8]) -> io::Result<()> {
    write!(out, "--{}\r\nContent-Type: image/jpeg\r\n\r\n", MJPEG_BOUNDARY)?;
    out.write_all(jpeg)?;
    out.write_all(b"\r\n")?;
    out.flush()
}

/// Capture, annotate and emit frames until stopped or the source ends.
///
/// The stop flag is checked before each frame; a frame already in flight
/// always completes. The source is released before the session is dropped.
pub fn run_stream<W: Write>(
    pipeline: &Pipeline,
    mut source: SourceGuard,
    session: StreamSession,
    out: &mut W,
    jpeg_quality: u8,
) -> StreamSummary {
    let mut frames = 0u64;
    let end = loop {
        if session.stop_requested() {
            break StreamEnd::StopRequested;
        }
        let mut frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break StreamEnd::SourceExhausted,
            Err(err) => {
                log::error!("Failed to read frame from {}: {:#}", source.describe(), err);
                break StreamEnd::SourceError(format!("{:#}", err));
            }
        };

        match pipeline.predict(&frame, DetectionMode::Streaming) {
            Ok(result) => pipeline.annotate(&mut frame, &result.predictions),
            Err(err) => log::warn!("detector failed on stream frame {}: {:#}", frames, err),
        }

        let jpeg = match frame.encode_jpeg(jpeg_quality) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                log::error!("failed to encode stream frame: {:#}", err);
                break StreamEnd::EncodeError(format!("{:#}", err));
            }
        };
        if let Err(err) = write_mjpeg_part(out, &jpeg) {
            log::info!("stream client went away: {}", err);
            break StreamEnd::ClientDisconnected;
        }
        frames += 1;
    };

    source.release();
    log::info!("stream ended after {} frames: {:?}", frames, end);
    drop(session);
    StreamSummary { frames, end }
}
