//! Sensor-station daemon with an embedded almanac history.
//!
//! This binary samples a simulated barometer and colorimeter on a fixed
//! interval, keeps their recent readings in a bounded almanac station, logs
//! every published payload, and serves the history over HTTP.

mod api;
mod sensors;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use almanac::publish::QueueSubscriber;
use almanac::{Station, StationConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::sensors::{Barometer, Colorimeter, Driver, Sensor};

/// Depth of the queue the payload logger drains.
const LOG_QUEUE_DEPTH: usize = 1024;

/// almanac-station: bounded sensor history over HTTP.
#[derive(Parser)]
#[command(name = "almanac-station", version, about)]
struct Cli {
    /// Path to a JSON station configuration. Defaults to a barometer and a
    /// colorimeter channel.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port for the HTTP API.
    #[arg(long, default_value = "3000")]
    port: u16,

    /// Sensor sampling interval in milliseconds.
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Barometer elevation above sea level, in metres.
    #[arg(long, default_value = "23")]
    elevation: f64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        tracing::error!("station failed: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => StationConfig::load(path)?,
        None => StationConfig::default(),
    };
    let station = Arc::new(Station::new(config)?);

    let (logger, deliveries) = QueueSubscriber::bounded(LOG_QUEUE_DEPTH);
    for channel in station.channel_names() {
        station.subscribe(channel, logger.clone())?;
    }
    drop(logger);
    std::thread::Builder::new()
        .name("payload-log".to_string())
        .spawn(move || {
            for delivery in deliveries {
                tracing::debug!(topic = %delivery.topic, payload = %delivery.payload, "published");
            }
        })?;

    let interval = Duration::from_millis(cli.interval_ms);
    let sensors: Vec<Box<dyn Sensor>> = vec![Box::new(Barometer::new(cli.elevation)), Box::new(Colorimeter)];
    for sensor in sensors {
        let channel = sensor.channel().to_string();
        match Driver::new(Arc::clone(&station), sensor) {
            Ok(driver) => {
                driver.spawn(interval)?;
            }
            Err(e) => tracing::warn!(channel = %channel, "sensor not started: {e}"),
        }
    }

    tracing::info!(
        channels = ?station.channel_names().collect::<Vec<_>>(),
        port = cli.port,
        "station started"
    );
    api::run_api_server(station, cli.port)?;
    Ok(())
}
