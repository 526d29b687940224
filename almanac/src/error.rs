//! Error types for the almanac telemetry core.
//!
//! Only configuration, channel lookup and query validation ever reach a
//! caller. Fan-out failures are defined here too, but the publisher absorbs
//! them: they are logged and counted, never returned from an ingest.

use thiserror::Error;

/// The main error type for all almanac operations.
#[derive(Error, Debug)]
pub enum AlmanacError {
    /// Error validating or loading configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error addressing a channel of the station.
    #[error("station error: {0}")]
    Station(#[from] StationError),

    /// Error validating a query (read path).
    #[error("query error: {0}")]
    Query(#[from] QueryError),
}

/// Errors that can occur when validating or loading a station configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A channel was configured with a zero capacity.
    #[error("channel '{channel}' has capacity 0 (must be > 0)")]
    ZeroCapacity {
        /// The offending channel name.
        channel: String,
    },

    /// A channel name is empty or contains characters unusable in a route.
    #[error("invalid channel name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why the name was rejected.
        reason: String,
    },

    /// Two channels share the same name.
    #[error("channel '{name}' is configured more than once")]
    DuplicateChannel {
        /// The duplicated name.
        name: String,
    },

    /// A channel's publish topic is empty.
    #[error("channel '{channel}' has an empty topic")]
    EmptyTopic {
        /// The offending channel name.
        channel: String,
    },

    /// The configured UTC offset is outside the representable range.
    #[error("utc offset of {minutes} minutes is out of range")]
    InvalidUtcOffset {
        /// The configured offset in minutes.
        minutes: i32,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for a station config.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// The file path.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that can occur when addressing a channel.
#[derive(Error, Debug)]
pub enum StationError {
    /// No channel with this name exists.
    #[error("unknown channel '{name}'")]
    UnknownChannel {
        /// The requested channel name.
        name: String,
    },

    /// The handle was not issued by this station.
    #[error("invalid channel handle: {index}")]
    InvalidHandle {
        /// The handle's channel index.
        index: usize,
    },
}

/// Validation errors for stored-reading queries.
///
/// These are returned verbatim to whoever issued the query; they are never
/// retried and never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// `count` is not an integer.
    #[error("count must be a valid integer, got '{value}'")]
    InvalidCount {
        /// The raw parameter value.
        value: String,
    },

    /// `count` is an integer, but negative.
    #[error("count must be a non-negative integer, got '{value}'")]
    NegativeCount {
        /// The raw parameter value.
        value: String,
    },

    /// A date parameter could not be parsed.
    #[error(
        "{field} '{value}' is not a valid date; expected YYYY-MM-DD, \
         YYYY-MM-DDTHH:MM:SS (local time) or RFC 3339 with an offset"
    )]
    InvalidDate {
        /// The parameter name (`startDate` or `endDate`).
        field: &'static str,
        /// The raw parameter value.
        value: String,
    },

    /// The parameters match neither query mode.
    #[error(
        "invalid query parameters [{given}]: use either 'count' alone or \
         'startDate' together with 'endDate' (or no parameters for the latest reading)"
    )]
    InvalidCombination {
        /// The parameter names that were supplied, comma separated.
        given: String,
    },
}

/// Failure delivering a payload to one subscriber.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FanoutError {
    /// The subscriber has gone away and will never accept another payload.
    #[error("subscriber disconnected")]
    Disconnected,

    /// The subscriber's queue is full; this payload was dropped.
    #[error("subscriber queue is full")]
    Full,

    /// The transport rejected the payload.
    #[error("transport failure: {reason}")]
    Transport {
        /// Description of the failure.
        reason: String,
    },
}

/// Type alias for `Result<T, AlmanacError>`.
pub type Result<T> = std::result::Result<T, AlmanacError>;
