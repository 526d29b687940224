//! Integration tests for the station: ingest, fan-out and query together.

#![allow(clippy::cast_precision_loss)]

use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use almanac::error::FanoutError;
use almanac::publish::{Delivery, QueueSubscriber};
use almanac::{ChannelConfig, QueryOutcome, QueryParams, Reading, Station, StationConfig};
use chrono::{DateTime, TimeZone, Utc};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn two_channel_station(capacity: usize) -> Station {
    Station::new(StationConfig {
        channels: vec![
            ChannelConfig::new("barometer").with_capacity(capacity),
            ChannelConfig::new("colorimeter")
                .with_capacity(capacity)
                .with_topic("lab/rgb"),
        ],
        utc_offset_minutes: Some(0),
    })
    .unwrap()
}

fn decode(delivery: &Delivery) -> Reading {
    serde_json::from_str(&delivery.payload).unwrap()
}

#[test]
fn test_subscribers_see_every_reading_while_history_evicts() {
    let station = two_channel_station(2);
    let (first, first_rx) = QueueSubscriber::bounded(16);
    let (second, second_rx) = QueueSubscriber::bounded(16);
    station.subscribe("barometer", first).unwrap();
    station.subscribe("barometer", second).unwrap();

    let handle = station.handle("barometer").unwrap();
    for t in 1..=5 {
        let report = station
            .record(handle, Reading::new(at(t), [("pressure", 100.0)]))
            .unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.evicted, t > 2);
    }

    for rx in [first_rx, second_rx] {
        let seen: Vec<i64> = rx
            .try_iter()
            .map(|d| {
                assert_eq!(d.topic, "sensors/barometer");
                decode(&d).timestamp().timestamp()
            })
            .collect();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    assert_eq!(station.store(handle).unwrap().len(), 2);
}

#[test]
fn test_payload_matches_latest_query() {
    let station = two_channel_station(10);
    let (queue, rx) = QueueSubscriber::bounded(4);
    station.subscribe("colorimeter", queue).unwrap();

    station
        .ingest(
            "colorimeter",
            at(42),
            [("red", 1.0), ("green", 2.0), ("blue", 3.0)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
        .unwrap();

    let delivery = rx.try_recv().unwrap();
    assert_eq!(delivery.topic, "lab/rgb");

    let QueryOutcome::Latest(latest) = station.query("colorimeter", &QueryParams::new()).unwrap()
    else {
        panic!("expected latest reading");
    };
    assert_eq!(decode(&delivery), *latest);
}

#[test]
fn test_failing_subscribers_never_block_ingest() {
    let station = two_channel_station(10);
    let (gone, gone_rx) = QueueSubscriber::bounded(4);
    drop(gone_rx);
    station.subscribe("barometer", gone).unwrap();
    station
        .subscribe("barometer", |_: &str, _: &str| -> Result<(), FanoutError> {
            Err(FanoutError::Transport {
                reason: "connection refused".to_string(),
            })
        })
        .unwrap();

    for t in 1..=3 {
        station
            .ingest("barometer", at(t), [("pressure".to_string(), 1.0)].into_iter().collect())
            .unwrap();
    }

    let info = &station.info()[0];
    assert_eq!(info.retained, 3);
    assert_eq!(info.published, 3);
    // The disconnected queue is pruned on the first pass; the transport
    // failure keeps failing.
    assert_eq!(info.subscribers, 1);
    assert_eq!(info.failed, 4);
    assert_eq!(info.delivered, 0);
}

#[test]
fn test_info_does_not_wait_on_slow_subscriber() {
    let station = Arc::new(two_channel_station(10));
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    station
        .subscribe("barometer", move |_: &str, _: &str| -> Result<(), FanoutError> {
            entered_tx.send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
            Ok(())
        })
        .unwrap();

    let ingest = {
        let station = Arc::clone(&station);
        thread::spawn(move || {
            station
                .ingest("barometer", at(1), [("pressure".to_string(), 1.0)].into_iter().collect())
                .unwrap()
        })
    };

    // The subscriber is now blocked inside fan-out, holding the ingest lock.
    entered_rx.recv().unwrap();
    let info = &station.info()[0];
    assert_eq!(info.subscribers, 1);
    assert_eq!(info.retained, 1);
    assert_eq!(info.delivered, 0);

    release_tx.send(()).unwrap();
    assert_eq!(ingest.join().unwrap().delivered, 1);
    let info = &station.info()[0];
    assert_eq!(info.published, 1);
    assert_eq!(info.delivered, 1);
}

#[test]
fn test_concurrent_ingest_and_query() {
    let station = Arc::new(two_channel_station(100));
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        station
            .subscribe("barometer", move |_: &str, payload: &str| -> Result<(), FanoutError> {
                let reading: Reading = serde_json::from_str(payload)
                    .map_err(|e| FanoutError::Transport { reason: e.to_string() })?;
                seen.lock().unwrap().push(reading.timestamp().timestamp());
                Ok(())
            })
            .unwrap();
    }

    let drivers: Vec<_> = ["barometer", "colorimeter"]
        .into_iter()
        .map(|channel| {
            let station = Arc::clone(&station);
            thread::spawn(move || {
                let handle = station.handle(channel).unwrap();
                for t in 1..=1_000 {
                    station
                        .record(handle, Reading::new(at(t), [("v", t as f64)]))
                        .unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let station = Arc::clone(&station);
            thread::spawn(move || {
                let params: QueryParams = [("count", "10")].into_iter().collect();
                for _ in 0..500 {
                    match station.query("barometer", &params).unwrap() {
                        QueryOutcome::Empty => {}
                        QueryOutcome::List { readings, .. } => {
                            let ts: Vec<i64> =
                                readings.iter().map(|r| r.timestamp().timestamp()).collect();
                            assert!(ts.windows(2).all(|w| w[0] > w[1]));
                        }
                        other => panic!("unexpected outcome {other:?}"),
                    }
                }
            })
        })
        .collect();

    for driver in drivers {
        driver.join().unwrap();
    }
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(*seen.lock().unwrap(), (1..=1_000).collect::<Vec<_>>());
    for info in station.info() {
        assert_eq!(info.retained, 100);
        assert_eq!(info.evicted, 900);
        assert_eq!(info.newest, Some(at(1_000)));
    }
}

#[test]
fn test_info_serializes() {
    let station = two_channel_station(3);
    station
        .ingest("barometer", at(1), [("pressure".to_string(), 1.0)].into_iter().collect())
        .unwrap();

    let json = serde_json::to_value(station.info()).unwrap();
    assert_eq!(json[0]["name"], "barometer");
    assert_eq!(json[0]["retained"], 1);
    assert_eq!(json[1]["topic"], "lab/rgb");
    assert!(json[1]["newest"].is_null());
}
