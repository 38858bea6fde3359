//! Environmental sensor telemetry.
//!
//! - `SensorReading`: one parsed telemetry line (timestamp, device id,
//!   DHT22 climate block, MQ-2 gas block, air quality summary).
//! - `SensorCache`: the single latest reading, replaced whole under a mutex.
//!   Constructed once and shared by `Arc` between the ingestion thread (the
//!   only writer) and request handlers (readers).
//! - `device`: connectors that open the telemetry link.
//! - `service`: the background ingestion loop.

pub mod device;
pub mod service;

pub use device::{FileConnector, MemoryConnector, TelemetryConnector, TelemetryLink};
#[cfg(feature = "sensor-serial")]
pub use device::SerialConnector;
pub use service::{
    IngestionConfig, IngestionHandle, IngestionStats, LinkMonitor, LinkState, SensorIngestion,
};

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

pub const NO_DATA_MESSAGE: &str = "No sensor data available yet.";

/// One telemetry record. Unknown top-level keys are ignored; the two
/// sub-reading blocks are kept verbatim.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(default)]
    pub timestamp: Option<Number>,
    #[serde(default)]
    pub sensor_id: Option<String>,
    #[serde(default)]
    pub dht22: Option<Map<String, Value>>,
    #[serde(default)]
    pub mq2: Option<Map<String, Value>>,
    #[serde(default)]
    pub air_quality: Option<String>,
}

impl SensorReading {
    pub fn temperature_c(&self) -> Option<f64> {
        self.dht22.as_ref()?.get("temperature_c")?.as_f64()
    }

    pub fn humidity(&self) -> Option<f64> {
        self.dht22.as_ref()?.get("humidity")?.as_f64()
    }

    /// True when none of the known fields is present.
    pub fn is_empty(&self) -> bool {
        self.timestamp.is_none()
            && self.sensor_id.is_none()
            && self.dht22.is_none()
            && self.mq2.is_none()
            && self.air_quality.is_none()
    }
}

/// Parse one telemetry line.
///
/// Blank lines yield `Ok(None)`. Anything that is not a JSON object carrying
/// at least one correctly typed known key is an error.
pub fn parse_line(line: &str) -> Result<Option<SensorReading>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(trimmed).context("invalid json")?;
    if !value.is_object() {
        return Err(anyhow!("telemetry line is not a json object"));
    }
    let reading: SensorReading =
        serde_json::from_value(value).context("unexpected telemetry field type")?;
    if reading.is_empty() {
        return Err(anyhow!("telemetry line carries no sensor fields"));
    }
    Ok(Some(reading))
}

/// Body of a sensor query.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SensorResponse {
    #[serde(flatten)]
    pub reading: SensorReading,
    pub error: Option<String>,
}

impl SensorResponse {
    fn from_latest(latest: Option<SensorReading>) -> Self {
        match latest.filter(|reading| !reading.is_empty()) {
            Some(reading) => Self {
                reading,
                error: None,
            },
            None => Self {
                reading: SensorReading::default(),
                error: Some(NO_DATA_MESSAGE.to_string()),
            },
        }
    }
}

/// Latest-reading cache.
#[derive(Debug, Default)]
pub struct SensorCache {
    latest: Mutex<Option<SensorReading>>,
}

impl SensorCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<SensorReading>> {
        // Values are replaced whole, so a poisoned lock never holds a torn record.
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the cached reading. An empty reading clears the cache.
    pub fn publish(&self, reading: SensorReading) {
        *self.slot() = Some(reading).filter(|reading| !reading.is_empty());
    }

    /// Copy of the cached reading, if any parse has succeeded yet.
    pub fn latest(&self) -> Option<SensorReading> {
        self.slot().clone()
    }

    pub fn has_data(&self) -> bool {
        self.slot().is_some()
    }

    pub fn snapshot(&self) -> SensorResponse {
        SensorResponse::from_latest(self.latest())
    }
}
