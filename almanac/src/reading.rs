//! The measurement record stored and published by every channel.
//!
//! A [`Reading`] is a capture timestamp plus a map of named numeric values.
//! The map is schema-free: a barometer channel carries `temperature`,
//! `pressure` and `altitude`, a colorimeter carries `red`, `green` and `blue`,
//! but nothing below the sensor driver checks that.
//!
//! Non-finite values (`NaN`, infinities) are dropped when a reading is built:
//! JSON has no encoding for them, and a payload carrying `null` in their
//! place would not decode back into a reading.
//!
//! Readings are immutable once built. Stores hand them out as `Arc<Reading>`
//! so a query snapshot never copies the value map.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Named measurement values of a single reading.
///
/// A `BTreeMap` keeps serialized payloads in a stable key order.
pub type Values = BTreeMap<String, f64>;

/// One timestamped measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    timestamp: DateTime<Utc>,
    values: Values,
}

impl Reading {
    /// Creates a reading captured at `timestamp`.
    ///
    /// Non-finite values are skipped.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use almanac::Reading;
    /// use chrono::{TimeZone, Utc};
    ///
    /// let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    /// let reading = Reading::new(ts, [("temperature", 21.5), ("pressure", 101.2)]);
    /// assert_eq!(reading.value("temperature"), Some(21.5));
    /// ```
    pub fn new<I, K>(timestamp: DateTime<Utc>, values: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self {
            timestamp,
            values: values
                .into_iter()
                .filter(|(_, v)| v.is_finite())
                .map(|(k, v)| (k.into(), v))
                .collect(),
        }
    }

    /// Creates a reading from an already-built value map.
    ///
    /// Non-finite values are removed from the map.
    pub fn from_values(timestamp: DateTime<Utc>, mut values: Values) -> Self {
        values.retain(|_, v| v.is_finite());
        Self { timestamp, values }
    }

    /// Capture time of this reading.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// All measurement values.
    pub fn values(&self) -> &Values {
        &self.values
    }

    /// A single measurement value by name.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Serializes this reading to the JSON payload used for fan-out and HTTP.
    ///
    /// The shape is `{"timestamp": "<RFC 3339>", "values": {...}}`.
    ///
    /// # Errors
    ///
    /// Returns the serializer error. A string-keyed map of finite `f64`
    /// always serializes, so callers may treat this as unreachable without
    /// panicking on it.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
