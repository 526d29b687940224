//! Station configuration: which channels exist and how much they retain.
//!
//! Configuration is fixed at start-up. Each [`ChannelConfig`] becomes one
//! history store plus one publisher; nothing can be added or resized later.
//!
//! # Example
//!
//! ```rust
//! use almanac::config::{ChannelConfig, StationConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config: StationConfig = serde_json::from_str(r#"{
//!     "channels": [
//!         { "name": "barometer", "capacity": 5000 },
//!         { "name": "colorimeter", "topic": "lab/rgb" }
//!     ],
//!     "utc_offset_minutes": 60
//! }"#)?;
//! config.validate()?;
//!
//! assert_eq!(config.channels[0].topic, "sensors/barometer");
//! assert_eq!(config.channels[1].capacity, almanac::history::DEFAULT_CAPACITY);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ConfigError, Result};
use crate::history::DEFAULT_CAPACITY;
use crate::timeparse::LocalZone;

/// Prefix of the default publish topic of a channel.
pub const DEFAULT_TOPIC_PREFIX: &str = "sensors/";

/// Configuration of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelConfig {
    /// Channel name, also used as its HTTP route segment.
    pub name: String,

    /// Topic fanned-out payloads are published on.
    pub topic: String,

    /// Maximum number of readings retained.
    pub capacity: usize,
}

/// On-disk shape; `topic` and `capacity` are optional there.
#[derive(Deserialize)]
struct RawChannelConfig {
    name: String,
    topic: Option<String>,
    capacity: Option<usize>,
}

impl<'de> Deserialize<'de> for ChannelConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawChannelConfig::deserialize(deserializer)?;
        let mut config = Self::new(raw.name);
        if let Some(topic) = raw.topic {
            config.topic = topic;
        }
        if let Some(capacity) = raw.capacity {
            config.capacity = capacity;
        }
        Ok(config)
    }
}

impl ChannelConfig {
    /// A channel with the default topic (`sensors/<name>`) and capacity.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            topic: format!("{DEFAULT_TOPIC_PREFIX}{name}"),
            name,
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Overrides the retention capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Overrides the publish topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Validates this channel on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the name is empty or not a single
    /// URL-safe path segment, the topic is empty, or the capacity is zero.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidName {
                name: self.name.clone(),
                reason: "name must not be empty".to_string(),
            }
            .into());
        }

        if let Some(bad) = self
            .name
            .chars()
            .find(|&c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(ConfigError::InvalidName {
                name: self.name.clone(),
                reason: format!("character {bad:?} is not allowed"),
            }
            .into());
        }

        if self.topic.is_empty() {
            return Err(ConfigError::EmptyTopic {
                channel: self.name.clone(),
            }
            .into());
        }

        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                channel: self.name.clone(),
            }
            .into());
        }

        Ok(())
    }
}

/// Configuration of a whole station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationConfig {
    /// Channels, in the order they are reported.
    pub channels: Vec<ChannelConfig>,

    /// Offset from UTC, in minutes, used to read dates without an offset.
    ///
    /// `None` uses the process's local zone.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

impl Default for StationConfig {
    /// A `barometer` and a `colorimeter` channel with default settings.
    fn default() -> Self {
        Self {
            channels: vec![ChannelConfig::new("barometer"), ChannelConfig::new("colorimeter")],
            utc_offset_minutes: None,
        }
    }
}

impl StationConfig {
    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] if the file
    /// cannot be loaded, or any validation error from [`Self::validate`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every channel and the station-wide settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on the first invalid channel, a duplicated
    /// channel name, or an out-of-range UTC offset.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.channels.len());
        for channel in &self.channels {
            channel.validate()?;
            if !seen.insert(channel.name.as_str()) {
                return Err(ConfigError::DuplicateChannel {
                    name: channel.name.clone(),
                }
                .into());
            }
        }

        self.zone()?;
        Ok(())
    }

    /// Zone used to interpret dates without an offset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUtcOffset`] if the offset is outside
    /// ±24 hours.
    pub fn zone(&self) -> Result<LocalZone> {
        match self.utc_offset_minutes {
            None => Ok(LocalZone::System),
            Some(minutes) => LocalZone::from_offset_minutes(minutes)
                .ok_or_else(|| ConfigError::InvalidUtcOffset { minutes }.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AlmanacError;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = StationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[0].topic, "sensors/barometer");
        assert_eq!(config.channels[1].capacity, DEFAULT_CAPACITY);
        assert_eq!(config.zone().unwrap(), LocalZone::System);
    }

    #[test]
    fn test_invalid_channels() {
        let cases = [
            ChannelConfig::new(""),
            ChannelConfig::new("baro meter"),
            ChannelConfig::new("baro/meter"),
            ChannelConfig::new("barometer").with_capacity(0),
            ChannelConfig::new("barometer").with_topic(""),
        ];

        for channel in cases {
            let err = channel.validate().unwrap_err();
            assert!(matches!(err, AlmanacError::Config(_)), "{channel:?}");
        }
    }

    #[test]
    fn test_duplicate_channel() {
        let config = StationConfig {
            channels: vec![ChannelConfig::new("barometer"), ChannelConfig::new("barometer")],
            utc_offset_minutes: None,
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            AlmanacError::Config(ConfigError::DuplicateChannel { .. })
        ));
    }

    #[test]
    fn test_utc_offset() {
        let config = StationConfig {
            utc_offset_minutes: Some(-300),
            ..StationConfig::default()
        };
        assert_eq!(config.zone().unwrap(), LocalZone::from_offset_minutes(-300).unwrap());

        let config = StationConfig {
            utc_offset_minutes: Some(30 * 60),
            ..StationConfig::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            AlmanacError::Config(ConfigError::InvalidUtcOffset { minutes: 1800 })
        ));
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: StationConfig =
            serde_json::from_str(r#"{"channels": [{"name": "hygrometer", "capacity": 10}]}"#)
                .unwrap();
        assert_eq!(config.utc_offset_minutes, None);
        assert_eq!(config.channels[0], ChannelConfig::new("hygrometer").with_capacity(10));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("station.json");
        std::fs::write(
            &path,
            r#"{"channels": [{"name": "barometer", "topic": "raspi/baro"}], "utc_offset_minutes": 0}"#,
        )
        .unwrap();

        let config = StationConfig::load(&path).unwrap();

        assert_eq!(config.channels[0].topic, "raspi/baro");
        assert_eq!(config.utc_offset_minutes, Some(0));
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("station.json");
        std::fs::write(&path, r#"{"channels": "#).unwrap();

        let err = StationConfig::load(&path).unwrap_err();
        assert!(matches!(err, AlmanacError::Config(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = StationConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, AlmanacError::Config(ConfigError::Read { .. })));
    }
}
