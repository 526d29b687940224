//! Bounded retention buffer for the readings of one channel.
//!
//! A [`HistoryStore`] keeps the most recent `capacity` readings in memory and
//! evicts the oldest one whenever an append would exceed that bound. Memory
//! use is therefore fixed by configuration, not by how long the process has
//! been running or how fast the sensor ticks.
//!
//! # Design
//!
//! - Entries live in a `VecDeque` in insertion order: oldest at the front,
//!   newest at the back. Every retrieval walks it back to front, so callers
//!   always see readings most recent first.
//! - One `RwLock` guards the whole deque. An append holds the write lock for a
//!   single evict+push step; each read holds the read lock only long enough to
//!   clone the `Arc` handles it selected. Nobody ever observes a half-evicted
//!   buffer or a partially-built reading.
//! - Range lookups binary-search the deque and rely on timestamps being
//!   non-decreasing in insertion order. The store does not enforce that; the
//!   ingestion path is expected to stamp readings with a monotonic clock.
//! - A poisoned lock is recovered rather than propagated. The only mutation is
//!   `pop_front` followed by `push_back`, neither of which can leave the deque
//!   inconsistent if a panic unwinds through another holder.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::reading::Reading;

/// Default number of readings retained per channel.
pub const DEFAULT_CAPACITY: usize = 100_000;

/// Bounded, insertion-ordered history of readings for one channel.
///
/// # Thread Safety
///
/// `HistoryStore` is `Sync`; share it behind an `Arc` between the ingestion
/// path and any number of concurrent readers.
#[derive(Debug)]
pub struct HistoryStore {
    /// Maximum number of retained readings.
    capacity: usize,
    /// Retained readings plus counters, behind one coarse lock.
    inner: RwLock<History>,
}

#[derive(Debug)]
struct History {
    /// Oldest at the front, newest at the back.
    entries: VecDeque<Arc<Reading>>,
    appended: u64,
    evicted: u64,
}

/// Result of a count-limited retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct LastN {
    /// The selected readings, newest first.
    pub readings: Vec<Arc<Reading>>,
    /// How many readings were requested.
    pub requested: usize,
    /// How many readings the store held at the time of the snapshot.
    pub available: usize,
}

impl LastN {
    /// Whether fewer readings were returned than requested.
    pub fn is_partial(&self) -> bool {
        self.requested > self.available
    }

    /// Human-readable shortfall note for a partial result.
    ///
    /// Returns `None` when the request was satisfied in full.
    pub fn note(&self) -> Option<String> {
        if !self.is_partial() {
            return None;
        }
        let plural = if self.available == 1 { "" } else { "s" };
        Some(format!(
            "requested {} but only {} update{plural} available",
            self.requested, self.available
        ))
    }
}

/// Point-in-time counters of a history store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryStats {
    /// Readings currently retained.
    pub len: usize,
    /// Maximum readings retained.
    pub capacity: usize,
    /// Readings appended since creation.
    pub appended: u64,
    /// Readings evicted since creation.
    pub evicted: u64,
}

impl HistoryStore {
    /// Creates an empty store retaining at most `capacity` readings.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. Configured channels are validated before
    /// a store is built, so this only fires on direct misuse.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use almanac::history::HistoryStore;
    ///
    /// let store = HistoryStore::new(3);
    /// assert!(store.is_empty());
    /// assert_eq!(store.capacity(), 3);
    /// ```
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "history capacity must be greater than zero");
        Self {
            capacity,
            inner: RwLock::new(History {
                entries: VecDeque::with_capacity(capacity),
                appended: 0,
                evicted: 0,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, History> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, History> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Maximum number of readings this store retains.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of readings currently retained.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Whether no reading has been retained yet.
    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Appends `reading` as the newest entry.
    ///
    /// If the store is already full, the oldest entry is evicted first and
    /// returned. A full store is normal operation, so this never fails.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use almanac::{history::HistoryStore, Reading};
    /// use chrono::{TimeZone, Utc};
    ///
    /// let store = HistoryStore::new(1);
    /// let t1 = Utc.timestamp_opt(1, 0).unwrap();
    /// let t2 = Utc.timestamp_opt(2, 0).unwrap();
    ///
    /// assert!(store.append(Reading::new(t1, [("v", 1.0)])).is_none());
    /// let evicted = store.append(Reading::new(t2, [("v", 2.0)])).unwrap();
    /// assert_eq!(evicted.timestamp(), t1);
    /// ```
    pub fn append(&self, reading: impl Into<Arc<Reading>>) -> Option<Arc<Reading>> {
        let reading = reading.into();
        let mut history = self.write();

        let evicted = if history.entries.len() >= self.capacity {
            history.evicted += 1;
            history.entries.pop_front()
        } else {
            None
        };

        history.entries.push_back(reading);
        history.appended += 1;

        evicted
    }

    /// The most recently appended reading, or `None` if the store is empty.
    pub fn latest(&self) -> Option<Arc<Reading>> {
        self.read().entries.back().cloned()
    }

    /// The `n` most recent readings, newest first.
    ///
    /// Returns `None` on an empty store whatever `n` is. When `n` exceeds the
    /// retained count every reading is returned and the result is flagged as
    /// partial (see [`LastN::is_partial`]).
    pub fn last_n(&self, n: usize) -> Option<LastN> {
        let history = self.read();
        if history.entries.is_empty() {
            return None;
        }

        let available = history.entries.len();
        let readings = history.entries.iter().rev().take(n).cloned().collect();

        Some(LastN {
            readings,
            requested: n,
            available,
        })
    }

    /// Every reading with `start <= timestamp <= end`, newest first.
    ///
    /// Returns `None` on an empty store. An inverted range (`start > end`) is
    /// not an error; it simply matches nothing.
    pub fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Vec<Arc<Reading>>> {
        let history = self.read();
        if history.entries.is_empty() {
            return None;
        }
        if start > end {
            return Some(Vec::new());
        }

        let lo = history.entries.partition_point(|r| r.timestamp() < start);
        let hi = history.entries.partition_point(|r| r.timestamp() <= end);

        Some(history.entries.range(lo..hi).rev().cloned().collect())
    }

    /// Timestamp of the oldest retained reading.
    pub fn oldest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.read().entries.front().map(|r| r.timestamp())
    }

    /// Timestamp of the newest retained reading.
    pub fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.read().entries.back().map(|r| r.timestamp())
    }

    /// Snapshot of the store's counters.
    pub fn stats(&self) -> HistoryStats {
        let history = self.read();
        HistoryStats {
            len: history.entries.len(),
            capacity: self.capacity,
            appended: history.appended,
            evicted: history.evicted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn reading(secs: i64) -> Reading {
        #[allow(clippy::cast_precision_loss)]
        let value = secs as f64;
        Reading::new(at(secs), [("v", value)])
    }

    fn timestamps(readings: &[Arc<Reading>]) -> Vec<i64> {
        readings.iter().map(|r| r.timestamp().timestamp()).collect()
    }

    #[test]
    fn test_new_store_is_empty() {
        let store = HistoryStore::new(10);
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
        assert!(store.latest().is_none());
        assert!(store.last_n(3).is_none());
        assert!(store.range(at(0), at(100)).is_none());
        assert_eq!(store.oldest_timestamp(), None);
    }

    #[test]
    #[should_panic(expected = "greater than zero")]
    fn test_zero_capacity_panics() {
        let _ = HistoryStore::new(0);
    }

    #[test]
    fn test_append_and_latest() {
        let store = HistoryStore::new(10);
        store.append(reading(1));
        store.append(reading(2));

        assert_eq!(store.len(), 2);
        assert_eq!(store.latest().unwrap().timestamp(), at(2));
        assert_eq!(store.oldest_timestamp(), Some(at(1)));
        assert_eq!(store.newest_timestamp(), Some(at(2)));
    }

    #[test]
    fn test_eviction_keeps_most_recent() {
        let store = HistoryStore::new(2);
        assert!(store.append(reading(1)).is_none());
        assert!(store.append(reading(2)).is_none());
        let evicted = store.append(reading(3)).unwrap();

        assert_eq!(evicted.timestamp(), at(1));
        assert_eq!(store.len(), 2);
        assert_eq!(store.latest().unwrap().timestamp(), at(3));

        let last = store.last_n(5).unwrap();
        assert_eq!(timestamps(&last.readings), vec![3, 2]);
        assert!(last.is_partial());
        assert!(last.note().unwrap().contains("2 updates"));
    }

    #[test]
    fn test_fifo_eviction_law() {
        for capacity in [1usize, 2, 7, 64] {
            let store = HistoryStore::new(capacity);
            let total = i64::try_from(capacity * 3 + 1).unwrap();
            for t in 1..=total {
                store.append(reading(t));
                assert!(store.len() <= capacity);
            }

            assert_eq!(store.len(), capacity);
            let all = store.last_n(capacity).unwrap();
            let expected: Vec<i64> = (1..=total).rev().take(capacity).collect();
            assert_eq!(timestamps(&all.readings), expected);

            let stats = store.stats();
            assert_eq!(stats.appended, u64::try_from(total).unwrap());
            assert_eq!(stats.evicted, stats.appended - capacity as u64);
        }
    }

    #[test]
    fn test_last_n_zero() {
        let store = HistoryStore::new(4);
        store.append(reading(1));

        let last = store.last_n(0).unwrap();
        assert!(last.readings.is_empty());
        assert!(!last.is_partial());
        assert_eq!(last.note(), None);
    }

    #[test]
    fn test_last_n_exact_and_partial() {
        let store = HistoryStore::new(10);
        for t in 1..=4 {
            store.append(reading(t));
        }

        let last = store.last_n(2).unwrap();
        assert_eq!(timestamps(&last.readings), vec![4, 3]);
        assert!(!last.is_partial());

        let last = store.last_n(4).unwrap();
        assert!(!last.is_partial());

        let last = store.last_n(9).unwrap();
        assert_eq!(timestamps(&last.readings), vec![4, 3, 2, 1]);
        assert!(last.is_partial());
        assert_eq!(last.note().unwrap(), "requested 9 but only 4 updates available");
    }

    #[test]
    fn test_partial_note_singular() {
        let store = HistoryStore::new(10);
        store.append(reading(1));
        assert_eq!(
            store.last_n(3).unwrap().note().unwrap(),
            "requested 3 but only 1 update available"
        );
    }

    #[test]
    fn test_range_inclusive_bounds() {
        let store = HistoryStore::new(100);
        for t in 1..=20 {
            store.append(reading(t));
        }

        for (start, end) in [(1, 20), (5, 9), (0, 3), (18, 40), (7, 7), (21, 30)] {
            let got = timestamps(&store.range(at(start), at(end)).unwrap());
            let expected: Vec<i64> = (1..=20).rev().filter(|t| *t >= start && *t <= end).collect();
            assert_eq!(got, expected, "range {start}..={end}");
        }
    }

    #[test]
    fn test_range_inverted_is_empty() {
        let store = HistoryStore::new(10);
        store.append(reading(5));
        assert_eq!(store.range(at(6), at(4)), Some(Vec::new()));
    }

    #[test]
    fn test_range_with_duplicate_timestamps() {
        let store = HistoryStore::new(10);
        store.append(Reading::new(at(1), [("v", 1.0)]));
        store.append(Reading::new(at(2), [("v", 2.0)]));
        store.append(Reading::new(at(2), [("v", 3.0)]));
        store.append(Reading::new(at(3), [("v", 4.0)]));

        let got = store.range(at(2), at(2)).unwrap();
        let values: Vec<f64> = got.iter().filter_map(|r| r.value("v")).collect();
        assert_eq!(values, vec![3.0, 2.0]);
    }

    #[test]
    fn test_range_after_eviction() {
        let store = HistoryStore::new(3);
        for t in 1..=6 {
            store.append(reading(t));
        }
        assert_eq!(timestamps(&store.range(at(0), at(10)).unwrap()), vec![6, 5, 4]);
    }

    #[test]
    fn test_concurrent_readers_see_whole_appends() {
        use std::thread;

        let store = Arc::new(HistoryStore::new(50));
        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for t in 1..=2_000 {
                    store.append(Reading::new(at(t), [("a", 1.0), ("b", 2.0)]));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..500 {
                        if let Some(last) = store.last_n(50) {
                            assert!(last.readings.len() <= 50);
                            assert!(last.readings.iter().all(|r| r.values().len() == 2));
                            let ts = timestamps(&last.readings);
                            assert!(ts.windows(2).all(|w| w[0] > w[1]));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.len(), 50);
        assert_eq!(store.latest().unwrap().timestamp(), at(2_000));
    }
}
