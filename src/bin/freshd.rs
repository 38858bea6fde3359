//! freshd - fruit freshness service daemon
//!
//! This daemon:
//! 1. Loads the detector and classifier models (fatal on failure)
//! 2. Starts sensor ingestion when a device is configured
//! 3. Opens the configured result sinks
//! 4. Serves the HTTP interface until Ctrl-C

use anyhow::{anyhow, Result};
use std::sync::{mpsc, Arc};

use fruit_freshness::{
    api::{ApiConfig, ApiServer, AppState},
    ingest::SourceConfig,
    sensor::{IngestionConfig, SensorCache, SensorIngestion, TelemetryConnector},
    sink::{ResultSink, SqliteSink},
    FreshdConfig, Pipeline,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = FreshdConfig::load()?;
    let pipeline = Arc::new(Pipeline::from_config(&config)?);
    let sensors = Arc::new(SensorCache::new());

    let ingestion = match &config.sensor.device {
        Some(device) => {
            let connector = sensor_connector(&config, device);
            let ingestion_config = IngestionConfig {
                settle: config.sensor.settle,
                backoff: config.sensor.backoff,
            };
            Some(SensorIngestion::spawn(connector, sensors.clone(), ingestion_config)?)
        }
        None => {
            log::info!("no sensor device configured; sensor ingestion disabled");
            None
        }
    };

    let mut state = AppState::new(pipeline, sensors);
    if let Some(handle) = &ingestion {
        state = state.with_sensor_link(handle.monitor());
    }
    if let Some(sink) = open_sink(&config)? {
        log::info!("recording detections to {} sink", sink.name());
        state = state.with_sink(sink);
    }

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        max_upload_bytes: config.max_upload_bytes,
        camera: SourceConfig {
            location: config.camera.source.clone(),
            width: config.camera.width,
            height: config.camera.height,
        },
        jpeg_quality: config.camera.jpeg_quality,
        sink_source: config.sink.source_name.clone(),
    };
    let api_handle = ApiServer::new(api_config, state).spawn()?;
    log::info!("freshd running. api on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("freshd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");
    api_handle.stop()?;
    if let Some(handle) = ingestion {
        handle.stop()?;
    }
    Ok(())
}

#[cfg(feature = "sensor-serial")]
fn sensor_connector(config: &FreshdConfig, device: &str) -> Box<dyn TelemetryConnector> {
    use fruit_freshness::sensor::SerialConnector;
    Box::new(SerialConnector::new(
        device,
        config.sensor.baud,
        config.sensor.read_timeout,
    ))
}

#[cfg(not(feature = "sensor-serial"))]
fn sensor_connector(config: &FreshdConfig, device: &str) -> Box<dyn TelemetryConnector> {
    use fruit_freshness::sensor::FileConnector;
    log::warn!(
        "built without sensor-serial; reading {} as a plain file (baud rate is not applied)",
        device
    );
    Box::new(FileConnector::new(device).with_read_timeout(config.sensor.read_timeout))
}

fn open_sink(config: &FreshdConfig) -> Result<Option<Arc<dyn ResultSink>>> {
    #[cfg(feature = "sink-rest")]
    {
        if let Some(rest) = &config.sink.rest {
            let sink = fruit_freshness::sink::RestSink::new(rest)?;
            return Ok(Some(Arc::new(sink)));
        }
    }
    match &config.sink.sqlite_path {
        Some(path) => {
            let sink = SqliteSink::open(path)
                .map_err(|e| anyhow!("failed to open sink database {}: {:#}", path.display(), e))?;
            Ok(Some(Arc::new(sink)))
        }
        None => Ok(None),
    }
}
