//! Top-level handle tying channels, publishers and the query engine together.
//!
//! A [`Station`] is built once from a [`StationConfig`] and lives for the rest
//! of the process. It exposes the two contracts the outside world needs:
//!
//! - **ingest**: [`Station::ingest`] / [`Station::record`], called by sensor
//!   drivers on every tick
//! - **query**: [`Station::query`] / [`Station::execute`], called by the API
//!   layer on every request
//!
//! # Design
//!
//! - One [`HistoryStore`] and one [`Publisher`] per configured channel,
//!   created up front; there is no way to add a channel later
//! - Channels are addressed by name, or by a [`ChannelHandle`] resolved once
//!   so a driver's hot path skips the name lookup
//! - All methods take `&self`; share the station behind an `Arc`
//!
//! # Example Usage
//!
//! ```rust
//! use almanac::{Station, StationConfig, QueryOutcome, QueryParams};
//! use almanac::publish::QueueSubscriber;
//! use chrono::Utc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let station = Station::new(StationConfig::default())?;
//!
//! let (queue, deliveries) = QueueSubscriber::bounded(16);
//! station.subscribe("barometer", queue)?;
//!
//! station.ingest(
//!     "barometer",
//!     Utc::now(),
//!     [("temperature", 21.0), ("pressure", 101.3), ("altitude", 23.0)]
//!         .into_iter()
//!         .map(|(k, v)| (k.to_string(), v))
//!         .collect(),
//! )?;
//!
//! assert_eq!(deliveries.try_iter().count(), 1);
//! assert!(matches!(
//!     station.query("barometer", &QueryParams::new())?,
//!     QueryOutcome::Latest(_)
//! ));
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::{ChannelConfig, StationConfig};
use crate::error::{Result, StationError};
use crate::history::HistoryStore;
use crate::publish::{FanoutReport, Publisher, PublisherStats, Subscriber, SubscriptionId};
use crate::query::{QueryEngine, QueryOutcome, QueryParams, QueryRequest};
use crate::reading::{Reading, Values};

/// Opaque, `Copy` handle to one channel of a station.
///
/// Handles are only meaningful for the station that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    index: usize,
}

/// Read-only summary of one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelInfo {
    /// Channel name.
    pub name: String,
    /// Publish topic.
    pub topic: String,
    /// Maximum readings retained.
    pub capacity: usize,
    /// Readings currently retained.
    pub retained: usize,
    /// Readings evicted since start-up.
    pub evicted: u64,
    /// Current subscriber count.
    pub subscribers: usize,
    /// Timestamp of the oldest retained reading.
    pub oldest: Option<DateTime<Utc>>,
    /// Timestamp of the newest retained reading.
    pub newest: Option<DateTime<Utc>>,
    /// Readings published through the channel.
    pub published: u64,
    /// Successful subscriber deliveries.
    pub delivered: u64,
    /// Failed subscriber deliveries.
    pub failed: u64,
}

#[derive(Debug)]
struct Channel {
    config: ChannelConfig,
    publisher: Publisher,
}

/// The set of configured channels and the engine that queries them.
#[derive(Debug)]
pub struct Station {
    channels: Vec<Channel>,
    by_name: HashMap<String, usize>,
    engine: QueryEngine,
}

impl Station {
    /// Builds a station from `config`, creating every channel's store.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`](crate::error::ConfigError) if the
    /// configuration does not validate.
    pub fn new(config: StationConfig) -> Result<Self> {
        config.validate()?;
        let engine = QueryEngine::new(config.zone()?);

        let mut channels = Vec::with_capacity(config.channels.len());
        let mut by_name = HashMap::with_capacity(config.channels.len());

        for (index, channel) in config.channels.into_iter().enumerate() {
            let store = Arc::new(HistoryStore::new(channel.capacity));
            let publisher = Publisher::new(channel.name.clone(), channel.topic.clone(), store);
            info!(
                channel = %channel.name,
                topic = %channel.topic,
                capacity = channel.capacity,
                "channel created"
            );
            by_name.insert(channel.name.clone(), index);
            channels.push(Channel {
                config: channel,
                publisher,
            });
        }

        Ok(Self {
            channels,
            by_name,
            engine,
        })
    }

    /// Resolves a channel name to a handle.
    ///
    /// # Errors
    ///
    /// Returns [`StationError::UnknownChannel`] if no such channel exists.
    pub fn handle(&self, name: &str) -> Result<ChannelHandle> {
        self.by_name
            .get(name)
            .map(|&index| ChannelHandle { index })
            .ok_or_else(|| {
                StationError::UnknownChannel {
                    name: name.to_string(),
                }
                .into()
            })
    }

    fn channel(&self, handle: ChannelHandle) -> Result<&Channel> {
        self.channels.get(handle.index).ok_or_else(|| {
            StationError::InvalidHandle {
                index: handle.index,
            }
            .into()
        })
    }

    fn named(&self, name: &str) -> Result<&Channel> {
        self.channel(self.handle(name)?)
    }

    /// Channel names in configuration order.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.config.name.as_str())
    }

    /// The engine used to answer queries.
    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// History store of a channel.
    ///
    /// # Errors
    ///
    /// Returns [`StationError::InvalidHandle`] for a foreign handle.
    pub fn store(&self, handle: ChannelHandle) -> Result<&Arc<HistoryStore>> {
        Ok(self.channel(handle)?.publisher.store())
    }

    /// Publisher of a channel.
    ///
    /// # Errors
    ///
    /// Returns [`StationError::InvalidHandle`] for a foreign handle.
    pub fn publisher(&self, handle: ChannelHandle) -> Result<&Publisher> {
        Ok(&self.channel(handle)?.publisher)
    }

    /// Records a reading on a resolved channel.
    ///
    /// The reading is retained and fanned out; subscriber failures are in the
    /// returned report, never in the error.
    ///
    /// # Errors
    ///
    /// Returns [`StationError::InvalidHandle`] for a foreign handle.
    pub fn record(&self, handle: ChannelHandle, reading: Reading) -> Result<FanoutReport> {
        Ok(self.channel(handle)?.publisher.append_and_fanout(reading))
    }

    /// Ingests values captured at `timestamp` on the named channel.
    ///
    /// Timestamps are expected to be non-decreasing per channel; range
    /// queries assume it but nothing here checks it.
    ///
    /// # Errors
    ///
    /// Returns [`StationError::UnknownChannel`] if no such channel exists.
    pub fn ingest(
        &self,
        channel: &str,
        timestamp: DateTime<Utc>,
        values: Values,
    ) -> Result<FanoutReport> {
        let reading = Reading::from_values(timestamp, values);
        Ok(self.named(channel)?.publisher.append_and_fanout(reading))
    }

    /// Ingests values on the named channel, stamped with the current time.
    ///
    /// The stamp never precedes the channel's newest reading, even if the
    /// wall clock was stepped back (see [`Publisher::stamp_and_fanout`]).
    ///
    /// # Errors
    ///
    /// Returns [`StationError::UnknownChannel`] if no such channel exists.
    pub fn ingest_now(&self, channel: &str, values: Values) -> Result<FanoutReport> {
        Ok(self.named(channel)?.publisher.stamp_and_fanout(values))
    }

    /// Records values on a resolved channel, stamped like [`Self::ingest_now`].
    ///
    /// # Errors
    ///
    /// Returns [`StationError::InvalidHandle`] for a foreign handle.
    pub fn record_now(&self, handle: ChannelHandle, values: Values) -> Result<FanoutReport> {
        Ok(self.channel(handle)?.publisher.stamp_and_fanout(values))
    }

    /// Answers raw query parameters for the named channel.
    ///
    /// # Errors
    ///
    /// Returns [`StationError::UnknownChannel`] for an unknown channel, or a
    /// [`QueryError`](crate::error::QueryError) for invalid parameters.
    pub fn query(&self, channel: &str, params: &QueryParams) -> Result<QueryOutcome> {
        let store = self.named(channel)?.publisher.store();
        Ok(self.engine.query(store, params)?)
    }

    /// Executes an already-built request on the named channel.
    ///
    /// # Errors
    ///
    /// Returns [`StationError::UnknownChannel`] for an unknown channel.
    pub fn execute(&self, channel: &str, request: &QueryRequest) -> Result<QueryOutcome> {
        let store = self.named(channel)?.publisher.store();
        Ok(self.engine.execute(store, request))
    }

    /// Subscribes to every reading published on the named channel.
    ///
    /// # Errors
    ///
    /// Returns [`StationError::UnknownChannel`] if no such channel exists.
    pub fn subscribe(
        &self,
        channel: &str,
        subscriber: impl Subscriber + 'static,
    ) -> Result<SubscriptionId> {
        Ok(self.named(channel)?.publisher.subscribe(subscriber))
    }

    /// Removes a subscription from the named channel.
    ///
    /// # Errors
    ///
    /// Returns [`StationError::UnknownChannel`] if no such channel exists.
    pub fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> Result<bool> {
        Ok(self.named(channel)?.publisher.unsubscribe(id))
    }

    /// Summaries of every channel, in configuration order.
    pub fn info(&self) -> Vec<ChannelInfo> {
        self.channels
            .iter()
            .map(|channel| {
                let publisher = &channel.publisher;
                let store = publisher.store();
                let history = store.stats();
                let PublisherStats {
                    published,
                    delivered,
                    failed,
                    ..
                } = publisher.stats();

                ChannelInfo {
                    name: channel.config.name.clone(),
                    topic: channel.config.topic.clone(),
                    capacity: history.capacity,
                    retained: history.len,
                    evicted: history.evicted,
                    subscribers: publisher.subscriber_count(),
                    oldest: store.oldest_timestamp(),
                    newest: store.newest_timestamp(),
                    published,
                    delivered,
                    failed,
                }
            })
            .collect()
    }
}
