//! Fan-out of appended readings to a channel's subscribers.
//!
//! A [`Publisher`] owns the write side of one channel. Every ingested reading
//! goes through [`Publisher::append_and_fanout`], which appends it to the
//! channel's [`HistoryStore`] and then hands its JSON payload to every
//! current [`Subscriber`] of the channel topic.
//!
//! # Ordering and atomicity
//!
//! The append and the fan-out run under a single per-channel ingest lock, so
//! subscribers of one channel see payloads in append order and never see a
//! reading before it is queryable. Query readers only take the store's own
//! lock and are never held up by a slow subscriber.
//!
//! # Failure handling
//!
//! Delivery is best effort. A subscriber error is logged and counted, and
//! never reaches the ingesting caller. Subscribers that report
//! [`FanoutError::Disconnected`] are dropped after the pass that saw it.
//!
//! Subscribers must not call back into their own publisher from `deliver`;
//! the ingest lock is held at that point. Counters and the subscriber count
//! are atomics, so [`Publisher::stats`] never waits on a fan-out pass.
//!
//! # Timestamps
//!
//! [`Publisher::stamp_and_fanout`] stamps readings with the wall clock,
//! clamped so that a channel's timestamps never go backwards even if the
//! clock is stepped back.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::FanoutError;
use crate::history::HistoryStore;
use crate::reading::{Reading, Values};

/// Receiver of published payloads.
///
/// `deliver` runs on the ingesting thread while the channel's ingest lock is
/// held. Implementations should hand the payload off (queue, socket buffer)
/// rather than block.
pub trait Subscriber: Send + Sync {
    /// Delivers one payload published on `topic`.
    ///
    /// # Errors
    ///
    /// Returns a [`FanoutError`] if the payload could not be handed off.
    /// Returning [`FanoutError::Disconnected`] unsubscribes this subscriber.
    fn deliver(&self, topic: &str, payload: &str) -> Result<(), FanoutError>;
}

impl<F> Subscriber for F
where
    F: Fn(&str, &str) -> Result<(), FanoutError> + Send + Sync,
{
    fn deliver(&self, topic: &str, payload: &str) -> Result<(), FanoutError> {
        self(topic, payload)
    }
}

/// Identifies one subscription on a publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// One payload as handed to queue-backed subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Topic the payload was published on.
    pub topic: String,
    /// JSON-encoded [`Reading`].
    pub payload: String,
}

/// Outcome of a single fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Subscribers that accepted the payload.
    pub delivered: usize,
    /// Subscribers that rejected it.
    pub failed: usize,
    /// Whether the append evicted an older reading.
    pub evicted: bool,
}

/// Cumulative publisher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Readings appended through this publisher.
    pub published: u64,
    /// Successful deliveries across all subscribers.
    pub delivered: u64,
    /// Failed deliveries across all subscribers.
    pub failed: u64,
    /// Subscribers dropped after disconnecting.
    pub pruned: u64,
}

/// State guarded by the ingest lock.
struct Fanout {
    subscribers: Vec<(SubscriptionId, Box<dyn Subscriber>)>,
    next_id: u64,
}

/// Counters readable without the ingest lock.
#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    pruned: AtomicU64,
    subscribers: AtomicUsize,
}

/// Write side of one channel: append to history, then fan out.
pub struct Publisher {
    channel: String,
    topic: String,
    store: Arc<HistoryStore>,
    fanout: Mutex<Fanout>,
    counters: Counters,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("channel", &self.channel)
            .field("topic", &self.topic)
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl Publisher {
    /// Creates a publisher appending to `store` and publishing on `topic`.
    pub fn new(channel: impl Into<String>, topic: impl Into<String>, store: Arc<HistoryStore>) -> Self {
        Self {
            channel: channel.into(),
            topic: topic.into(),
            store,
            fanout: Mutex::new(Fanout {
                subscribers: Vec::new(),
                next_id: 0,
            }),
            counters: Counters::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Fanout> {
        self.fanout.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Channel name this publisher writes to.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Topic payloads are published on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The history store appended to.
    pub fn store(&self) -> &Arc<HistoryStore> {
        &self.store
    }

    /// Adds a subscriber; it receives every reading appended from now on.
    pub fn subscribe(&self, subscriber: impl Subscriber + 'static) -> SubscriptionId {
        let mut fanout = self.lock();
        let id = SubscriptionId(fanout.next_id);
        fanout.next_id += 1;
        fanout.subscribers.push((id, Box::new(subscriber)));
        self.counters.subscribers.store(fanout.subscribers.len(), Ordering::Relaxed);
        debug!(channel = %self.channel, ?id, "subscriber added");
        id
    }

    /// Removes a subscriber. Returns whether it was subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut fanout = self.lock();
        let before = fanout.subscribers.len();
        fanout.subscribers.retain(|(sid, _)| *sid != id);
        self.counters.subscribers.store(fanout.subscribers.len(), Ordering::Relaxed);
        fanout.subscribers.len() != before
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.counters.subscribers.load(Ordering::Relaxed)
    }

    /// Snapshot of the cumulative counters.
    ///
    /// Each counter is read on its own; a snapshot taken during a fan-out
    /// pass may mix values from before and after it.
    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            pruned: self.counters.pruned.load(Ordering::Relaxed),
        }
    }

    /// Appends `reading` to the channel history and fans it out.
    ///
    /// The append always happens. Fan-out problems only show up in the
    /// returned report, the counters and the log.
    pub fn append_and_fanout(&self, reading: Reading) -> FanoutReport {
        let mut fanout = self.lock();
        self.publish(&mut fanout, Arc::new(reading))
    }

    /// Stamps `values` with the current time and appends and fans them out.
    ///
    /// The stamp is the later of the wall clock and the channel's newest
    /// timestamp, read under the ingest lock, so stamps never decrease.
    pub fn stamp_and_fanout(&self, values: Values) -> FanoutReport {
        let mut fanout = self.lock();
        let now = Utc::now();
        let timestamp = match self.store.newest_timestamp() {
            Some(newest) if newest > now => {
                debug!(channel = %self.channel, %newest, %now, "clock behind newest reading, clamping");
                newest
            }
            _ => now,
        };
        self.publish(&mut fanout, Arc::new(Reading::from_values(timestamp, values)))
    }

    fn publish(&self, fanout: &mut Fanout, reading: Arc<Reading>) -> FanoutReport {
        let evicted = self.store.append(Arc::clone(&reading));
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        if let Some(old) = &evicted {
            debug!(
                channel = %self.channel,
                evicted = %old.timestamp(),
                "history full, evicted oldest reading"
            );
        }

        let mut report = FanoutReport {
            evicted: evicted.is_some(),
            ..FanoutReport::default()
        };
        if fanout.subscribers.is_empty() {
            return report;
        }

        let payload = match reading.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(channel = %self.channel, "failed to encode reading for fan-out: {e}");
                return report;
            }
        };

        let mut disconnected = Vec::new();
        for (id, subscriber) in &fanout.subscribers {
            match subscriber.deliver(&self.topic, &payload) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(channel = %self.channel, topic = %self.topic, ?id, "delivery failed: {e}");
                    if e == FanoutError::Disconnected {
                        disconnected.push(*id);
                    }
                }
            }
        }

        if !disconnected.is_empty() {
            fanout.subscribers.retain(|(id, _)| !disconnected.contains(id));
            self.counters.subscribers.store(fanout.subscribers.len(), Ordering::Relaxed);
            self.counters.pruned.fetch_add(disconnected.len() as u64, Ordering::Relaxed);
            warn!(
                channel = %self.channel,
                count = disconnected.len(),
                "dropped disconnected subscribers"
            );
        }

        self.counters.delivered.fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.counters.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
        report
    }
}

/// Subscriber backed by a bounded in-process queue.
///
/// Delivery never blocks: a full queue drops the payload with
/// [`FanoutError::Full`], and a dropped receiver unsubscribes the queue.
#[derive(Debug, Clone)]
pub struct QueueSubscriber {
    sender: SyncSender<Delivery>,
}

impl QueueSubscriber {
    /// Creates a queue holding at most `depth` undelivered payloads.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use almanac::publish::{QueueSubscriber, Subscriber};
    ///
    /// let (subscriber, receiver) = QueueSubscriber::bounded(8);
    /// subscriber.deliver("sensors/barometer", "{}").unwrap();
    /// assert_eq!(receiver.try_recv().unwrap().topic, "sensors/barometer");
    /// ```
    pub fn bounded(depth: usize) -> (Self, Receiver<Delivery>) {
        let (sender, receiver) = mpsc::sync_channel(depth);
        (Self { sender }, receiver)
    }
}

impl Subscriber for QueueSubscriber {
    fn deliver(&self, topic: &str, payload: &str) -> Result<(), FanoutError> {
        let delivery = Delivery {
            topic: topic.to_string(),
            payload: payload.to_string(),
        };
        self.sender.try_send(delivery).map_err(|e| match e {
            TrySendError::Full(_) => FanoutError::Full,
            TrySendError::Disconnected(_) => FanoutError::Disconnected,
        })
    }
}

/// Subscriber forwarding to a `tokio` broadcast channel.
///
/// Having no live receivers is not a failure: the payload is simply not seen
/// by anyone, as with a broker topic nobody listens to.
#[cfg(feature = "broadcast")]
#[derive(Debug, Clone)]
pub struct BroadcastSubscriber {
    sender: tokio::sync::broadcast::Sender<Delivery>,
}

#[cfg(feature = "broadcast")]
impl BroadcastSubscriber {
    /// Creates a broadcast channel buffering up to `capacity` payloads per receiver.
    pub fn new(capacity: usize) -> (Self, tokio::sync::broadcast::Receiver<Delivery>) {
        let (sender, receiver) = tokio::sync::broadcast::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Opens another receiver on the same channel.
    pub fn receiver(&self) -> tokio::sync::broadcast::Receiver<Delivery> {
        self.sender.subscribe()
    }
}

#[cfg(feature = "broadcast")]
impl Subscriber for BroadcastSubscriber {
    fn deliver(&self, topic: &str, payload: &str) -> Result<(), FanoutError> {
        let _ = self.sender.send(Delivery {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }
}
