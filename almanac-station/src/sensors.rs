//! Simulated sensor drivers feeding the station.
//!
//! Each [`Sensor`] produces one set of values per tick. A [`Driver`] resolves
//! its channel handle once at start-up, then records a reading on every tick
//! so the hot path never looks a channel up by name.
//!
//! The waveforms are deterministic functions of the tick number, which keeps
//! the HTTP surface demonstrable without hardware and the tests exact.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use almanac::publish::FanoutReport;
use almanac::{ChannelHandle, Station, Values};

/// Standard sea-level pressure in kPa.
const SEA_LEVEL_KPA: f64 = 101.325;

/// A periodic source of measurement values.
pub trait Sensor: Send {
    /// Channel this sensor's readings belong to.
    fn channel(&self) -> &str;

    /// Values captured on tick `tick`.
    fn sample(&mut self, tick: u64) -> Values;
}

/// Temperature, pressure and altitude, as a barometric altimeter reports them.
#[derive(Debug, Clone)]
pub struct Barometer {
    elevation: f64,
}

impl Barometer {
    /// A barometer installed `elevation` metres above sea level.
    pub fn new(elevation: f64) -> Self {
        Self { elevation }
    }

    /// Pressure in kPa at `altitude` metres, international barometric formula.
    pub fn pressure_at(altitude: f64) -> f64 {
        SEA_LEVEL_KPA * (1.0 - 2.255_77e-5 * altitude).powf(5.255_88)
    }
}

impl Sensor for Barometer {
    fn channel(&self) -> &str {
        "barometer"
    }

    #[allow(clippy::cast_precision_loss)]
    fn sample(&mut self, tick: u64) -> Values {
        let phase = tick as f64 / 60.0;
        let temperature = 20.0 + 2.0 * phase.sin();
        // Weather drift of a few hundred pascal around the station baseline.
        let pressure = Self::pressure_at(self.elevation) + 0.3 * (phase / 7.0).sin();
        let altitude = self.elevation + 0.5 * (phase * 3.0).sin();

        [
            ("temperature".to_string(), round2(temperature)),
            ("pressure".to_string(), round2(pressure)),
            ("altitude".to_string(), round2(altitude)),
        ]
        .into_iter()
        .collect()
    }
}

/// Red, green and blue intensities in `0..=255`.
#[derive(Debug, Clone, Default)]
pub struct Colorimeter;

impl Sensor for Colorimeter {
    fn channel(&self) -> &str {
        "colorimeter"
    }

    #[allow(clippy::cast_precision_loss)]
    fn sample(&mut self, tick: u64) -> Values {
        let phase = tick as f64 / 30.0;
        let channel = |offset: f64| (127.5 + 127.5 * (phase + offset).sin()).round();

        [
            ("red".to_string(), channel(0.0)),
            ("green".to_string(), channel(2.094)),
            ("blue".to_string(), channel(4.189)),
        ]
        .into_iter()
        .collect()
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Drives one sensor into one station channel.
pub struct Driver {
    station: Arc<Station>,
    handle: ChannelHandle,
    sensor: Box<dyn Sensor>,
    tick: u64,
}

impl Driver {
    /// Resolves the sensor's channel on `station`.
    ///
    /// # Errors
    ///
    /// Returns an error if the station has no such channel.
    pub fn new(station: Arc<Station>, sensor: Box<dyn Sensor>) -> almanac::Result<Self> {
        let handle = station.handle(sensor.channel())?;
        Ok(Self {
            station,
            handle,
            sensor,
            tick: 0,
        })
    }

    /// Samples the sensor once and records the reading.
    ///
    /// The reading is stamped with the wall clock, never earlier than the
    /// channel's newest reading.
    ///
    /// # Errors
    ///
    /// Returns an error only if the handle does not belong to the station.
    pub fn tick(&mut self) -> almanac::Result<FanoutReport> {
        let values = self.sensor.sample(self.tick);
        self.tick += 1;
        self.station.record_now(self.handle, values)
    }

    /// Ticks forever on a dedicated thread, every `interval`.
    pub fn spawn(mut self, interval: Duration) -> std::io::Result<JoinHandle<()>> {
        let name = format!("driver-{}", self.sensor.channel());
        thread::Builder::new().name(name).spawn(move || {
            tracing::info!(
                channel = self.sensor.channel(),
                ?interval,
                "sensor driver started"
            );
            loop {
                match self.tick() {
                    Ok(report) if report.failed > 0 => {
                        tracing::debug!(channel = self.sensor.channel(), failed = report.failed, "partial fan-out");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(channel = self.sensor.channel(), "driver stopped: {e}");
                        return;
                    }
                }
                thread::sleep(interval);
            }
        })
    }
}
