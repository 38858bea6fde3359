//! Sensor ingestion loop.
//!
//! `Disconnected -> Connecting -> Connected`, back to `Disconnected` on any
//! link error. After connecting, the loop waits the settle delay and
//! discards stale input before reading. Lost links are retried after a fixed
//! backoff. Every wait is interruptible by the handle's cancel token, and the
//! device link is dropped before the thread exits.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::sensor::device::{TelemetryConnector, TelemetryLink};
use crate::sensor::{parse_line, SensorCache};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => LinkState::Connecting,
            2 => LinkState::Connected,
            _ => LinkState::Disconnected,
        }
    }
}

#[derive(Clone, Debug)]
pub struct IngestionConfig {
    /// Wait after opening the device before the first read.
    pub settle: Duration,
    /// Wait between a lost link and the next connection attempt.
    pub backoff: Duration,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(2),
            backoff: Duration::from_secs(5),
        }
    }
}

/// Line counters, for health reporting and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestionStats {
    pub accepted: u64,
    pub rejected: u64,
    pub connects: u64,
}

#[derive(Default)]
struct Shared {
    state: AtomicU8,
    accepted: AtomicU64,
    rejected: AtomicU64,
    connects: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: LinkState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

pub struct SensorIngestion;

impl SensorIngestion {
    /// Start the ingestion thread.
    pub fn spawn(
        connector: Box<dyn TelemetryConnector>,
        cache: Arc<SensorCache>,
        config: IngestionConfig,
    ) -> Result<IngestionHandle> {
        let shared = Arc::new(Shared::default());
        let cancel = CancelToken::new();
        let join = {
            let shared = shared.clone();
            let cancel = cancel.clone();
            std::thread::Builder::new()
                .name("sensor-ingest".to_string())
                .spawn(move || run(connector, &cache, &config, &shared, &cancel))
                .context("spawn sensor ingestion thread")?
        };
        Ok(IngestionHandle {
            shared,
            cancel,
            join: Some(join),
        })
    }
}

pub struct IngestionHandle {
    shared: Arc<Shared>,
    cancel: CancelToken,
    join: Option<JoinHandle<()>>,
}

/// Read-only view of a running ingestion loop.
#[derive(Clone)]
pub struct LinkMonitor {
    shared: Arc<Shared>,
}

impl LinkMonitor {
    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn stats(&self) -> IngestionStats {
        IngestionStats {
            accepted: self.shared.accepted.load(Ordering::SeqCst),
            rejected: self.shared.rejected.load(Ordering::SeqCst),
            connects: self.shared.connects.load(Ordering::SeqCst),
        }
    }
}

impl IngestionHandle {
    pub fn monitor(&self) -> LinkMonitor {
        LinkMonitor {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.monitor().state()
    }

    pub fn stats(&self) -> IngestionStats {
        self.monitor().stats()
    }

    /// Cancel the loop and wait for the thread to release the device.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("sensor ingestion thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for IngestionHandle {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("{}", err);
        }
    }
}

fn run(
    mut connector: Box<dyn TelemetryConnector>,
    cache: &SensorCache,
    config: &IngestionConfig,
    shared: &Shared,
    cancel: &CancelToken,
) {
    let device = connector.describe();
    while !cancel.is_cancelled() {
        shared.set_state(LinkState::Connecting);
        shared.connects.fetch_add(1, Ordering::SeqCst);
        log::info!("Attempting to connect to {}", device);

        match connector.connect() {
            Ok(mut link) => {
                if !cancel.sleep(config.settle) {
                    break;
                }
                let outcome = match link.discard_input() {
                    Ok(()) => {
                        shared.set_state(LinkState::Connected);
                        log::info!("Connected to {}", device);
                        read_lines(link.as_mut(), cache, shared, cancel)
                    }
                    Err(err) => Err(err),
                };
                drop(link);
                match outcome {
                    Ok(()) => break,
                    Err(err) => log::error!(
                        "Serial error: {}. Retrying in {} seconds...",
                        err,
                        config.backoff.as_secs()
                    ),
                }
            }
            Err(err) => log::error!(
                "Serial error: {:#}. Retrying in {} seconds...",
                err,
                config.backoff.as_secs()
            ),
        }

        shared.set_state(LinkState::Disconnected);
        if !cancel.sleep(config.backoff) {
            break;
        }
    }
    shared.set_state(LinkState::Disconnected);
    log::info!("sensor ingestion for {} stopped", device);
}

/// Read until cancelled (`Ok`) or the link fails (`Err`).
fn read_lines(
    link: &mut dyn TelemetryLink,
    cache: &SensorCache,
    shared: &Shared,
    cancel: &CancelToken,
) -> std::io::Result<()> {
    while !cancel.is_cancelled() {
        let Some(bytes) = link.read_line()? else {
            continue;
        };
        let line = String::from_utf8_lossy(&bytes);
        match parse_line(&line) {
            Ok(Some(reading)) => {
                log::info!(
                    "Received sensor data from {}: temp={}",
                    reading.sensor_id.as_deref().unwrap_or("unknown"),
                    reading
                        .temperature_c()
                        .map(|t| format!("{}", t))
                        .unwrap_or_else(|| "n/a".to_string())
                );
                cache.publish(reading);
                shared.accepted.fetch_add(1, Ordering::SeqCst);
            }
            Ok(None) => {}
            Err(err) => {
                log::warn!("Invalid JSON received: {} ({:#})", line.trim_end(), err);
                shared.rejected.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
    Ok(())
}
