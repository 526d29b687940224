//! # almanac
//!
//! Bounded in-memory sensor history with fan-out publishing and range queries.
//!
//! almanac is the core of a small embedded telemetry station. Sensor drivers
//! push periodic readings in, each reading is retained in a fixed-size
//! per-channel history and republished to that channel's subscribers, and an
//! API layer asks for the latest reading, the last N readings, or the readings
//! inside a time window.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Bounded memory: each channel keeps at most `capacity` readings and evicts
//!   the oldest one first
//! - Append and fan-out are atomic per channel; subscribers see readings in
//!   append order
//! - Queries never block ingestion for longer than one append step
//! - Nothing is persisted; a restart starts from an empty history
//!
//! ## Quick Start
//!
//! ```rust
//! use almanac::{ChannelConfig, QueryOutcome, QueryParams, Station, StationConfig};
//! use chrono::{Duration, Utc};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let station = Station::new(StationConfig {
//!     channels: vec![ChannelConfig::new("barometer").with_capacity(2)],
//!     utc_offset_minutes: Some(0),
//! })?;
//!
//! let start = Utc::now();
//! for i in 0..3 {
//!     let values = [("pressure".to_string(), 101.0 + f64::from(i))].into_iter().collect();
//!     station.ingest("barometer", start + Duration::seconds(i64::from(i)), values)?;
//! }
//!
//! let params: QueryParams = [("count", "5")].into_iter().collect();
//! if let QueryOutcome::List { readings, partial, note } = station.query("barometer", &params)? {
//!     assert_eq!(readings.len(), 2);
//!     assert!(partial);
//!     println!("{}", note.unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Station`]: Top-level handle; owns every channel, ingests and queries
//! - [`HistoryStore`]: Bounded, newest-first retention buffer of one channel
//! - [`Publisher`]: Appends to a store and fans each reading out to subscribers
//! - [`QueryEngine`]: Turns query parameters into a [`QueryOutcome`]
//!
//! ## Modules
//!
//! - [`station`]: Channel set, ingest and query entry points
//! - [`config`]: Channel and station configuration
//! - [`history`]: Bounded retention buffer
//! - [`publish`]: Subscribers and fan-out
//! - [`query`]: Query parameters, requests and outcomes
//! - [`timeparse`]: Date parsing for range queries
//! - [`reading`]: The reading record
//! - [`error`]: Error types

pub mod config;
pub mod error;
pub mod history;
pub mod publish;
pub mod query;
pub mod reading;
pub mod station;
pub mod timeparse;

// Re-export primary API types at crate root for convenience.
pub use config::{ChannelConfig, StationConfig};
pub use error::{AlmanacError, Result};
pub use history::HistoryStore;
pub use publish::{Publisher, Subscriber};
pub use query::{QueryEngine, QueryOutcome, QueryParams, QueryRequest};
pub use reading::{Reading, Values};
pub use station::{ChannelHandle, Station};
