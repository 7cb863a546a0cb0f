//! End-to-end tests of the ingest pipeline without hardware.
//!
//! A duplex stream stands in for the co-processor link: the test writes
//! encoded frames on one end, and the other end is read through
//! [`FrameCodec`] and fed to a [`Dispatcher`].

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use time::UtcOffset;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tokio_util::codec::{Framed, FramedRead};

use indicator_core::codec;
use indicator_core::{
    Command, CurrentSnapshot, Dispatch, Dispatcher, EventDispatcher, FrameCodec, HistoryStore,
    PacketTag, Quantity, RingKind, RolloverClock, SensorEvent,
};

// 2024-03-01T00:00:00Z
const MIDNIGHT: i64 = 1_709_251_200;

fn reading(tag: PacketTag, value: f32) -> Vec<u8> {
    let mut payload = vec![tag.as_byte()];
    payload.extend_from_slice(&value.to_le_bytes());
    codec::encode(&payload)
}

struct Pipeline {
    dispatcher: Dispatcher,
    history: Arc<Mutex<HistoryStore>>,
    snapshot: Arc<RwLock<CurrentSnapshot>>,
    events: EventDispatcher,
}

fn pipeline() -> Pipeline {
    let history = Arc::new(Mutex::new(HistoryStore::new(UtcOffset::UTC)));
    let snapshot = Arc::new(RwLock::new(CurrentSnapshot::default()));
    let events = EventDispatcher::new(64);
    let dispatcher = Dispatcher::new(history.clone(), snapshot.clone(), events.clone());
    Pipeline {
        dispatcher,
        history,
        snapshot,
        events,
    }
}

async fn drain(pipeline: &Pipeline, link: tokio::io::DuplexStream) -> Vec<Dispatch> {
    let mut frames = FramedRead::new(link, FrameCodec::new());
    let mut outcomes = Vec::new();
    while let Some(frame) = frames.next().await {
        outcomes.push(pipeline.dispatcher.handle_frame(&frame.unwrap()).await);
    }
    outcomes
}

#[tokio::test]
async fn test_readings_reach_snapshot_and_history() {
    let pipeline = pipeline();
    let mut events = pipeline.events.subscribe();
    let (mut device, host) = tokio::io::duplex(4096);

    for value in [600.0, 620.0, 640.0] {
        device
            .write_all(&reading(PacketTag::Co2, value))
            .await
            .unwrap();
    }
    device
        .write_all(&reading(PacketTag::Temperature, 21.5))
        .await
        .unwrap();
    drop(device);

    let outcomes = drain(&pipeline, host).await;
    assert_eq!(outcomes.len(), 4);
    assert!(outcomes.iter().all(|o| matches!(o, Dispatch::Accepted(_))));

    {
        let snapshot = pipeline.snapshot.read().await;
        assert_eq!(snapshot.co2, 640.0);
        assert_eq!(snapshot.temp_internal, 21.5);
        assert!(snapshot.updated_at.is_some());
    }

    let first = events.recv().await.unwrap();
    assert!(matches!(
        first,
        SensorEvent::Reading {
            quantity: Quantity::Co2,
            ..
        }
    ));

    let mut history = pipeline.history.lock().await;
    assert_eq!(history.aggregate(Quantity::Co2).count_in_bucket, 3);
    assert!(history.rollover(RingKind::HalfHour, MIDNIGHT));

    let view = history.get_history(Quantity::Co2);
    let head = view.day.last().unwrap();
    assert!(head.valid);
    assert_eq!(head.value, 620.0);
    assert_eq!(head.timestamp, MIDNIGHT);
    assert_eq!(history.aggregate(Quantity::Co2).count_in_bucket, 0);
}

#[tokio::test]
async fn test_noise_on_the_link_is_survived() {
    let pipeline = pipeline();
    let (mut device, host) = tokio::io::duplex(4096);

    // Line noise, an unknown tag, a short payload, a command echo and a
    // NaN, interleaved with two good readings.
    device.write_all(&[0x13, 0x37, 0x00]).await.unwrap();
    device
        .write_all(&reading(PacketTag::Humidity, 45.0))
        .await
        .unwrap();
    device.write_all(&codec::encode(&[0x7F, 1, 2, 3, 4])).await.unwrap();
    device
        .write_all(&codec::encode(&[PacketTag::Co2.as_byte(), 1, 2]))
        .await
        .unwrap();
    device
        .write_all(&codec::encode(&Command::BeepOff.to_payload()))
        .await
        .unwrap();
    device
        .write_all(&reading(PacketTag::Pm25, f32::NAN))
        .await
        .unwrap();
    device
        .write_all(&reading(PacketTag::Pm25, 12.0))
        .await
        .unwrap();
    drop(device);

    let outcomes = drain(&pipeline, host).await;
    let accepted: Vec<_> = outcomes
        .iter()
        .filter_map(|o| match o {
            Dispatch::Accepted(sample) => Some(sample.quantity),
            _ => None,
        })
        .collect();
    assert_eq!(accepted, vec![Quantity::Humidity, Quantity::Pm25]);

    let snapshot = pipeline.snapshot.read().await;
    assert_eq!(snapshot.humidity_internal, 45.0);
    assert_eq!(snapshot.pm2_5, 12.0);
}

#[tokio::test]
async fn test_gas_channel_is_calibrated() {
    let pipeline = pipeline();
    let (mut device, host) = tokio::io::duplex(1024);
    device
        .write_all(&reading(PacketTag::CoRaw, 900.0))
        .await
        .unwrap();
    drop(device);

    drain(&pipeline, host).await;

    let snapshot = pipeline.snapshot.read().await;
    assert_eq!(snapshot.co.raw, 900.0);
    assert!(snapshot.co.ppm > 1.0 && snapshot.co.ppm <= 1000.0);
    let history = pipeline.history.lock().await;
    assert_eq!(history.aggregate(Quantity::Co).running_mean, snapshot.co.ppm);
}

#[tokio::test]
async fn test_commands_are_framed_for_the_device() {
    let (host, device) = tokio::io::duplex(1024);
    let mut framed = Framed::new(host, FrameCodec::new());
    framed.send(Command::PowerOn.to_payload()).await.unwrap();
    framed
        .send(Command::CollectInterval(5000).to_payload())
        .await
        .unwrap();
    drop(framed);

    let mut received = FramedRead::new(device, FrameCodec::new());
    let power_on = received.next().await.unwrap().unwrap();
    assert_eq!(power_on[0], PacketTag::PowerOn.as_byte());
    let interval = received.next().await.unwrap().unwrap();
    assert_eq!(interval[0], PacketTag::CollectInterval.as_byte());
    assert_eq!(&interval[1..5], &5000u32.to_le_bytes());
}

#[tokio::test]
async fn test_history_survives_restart_through_blob() {
    let pipeline = pipeline();
    let blob = {
        let mut history = pipeline.history.lock().await;
        let mut clock = RolloverClock::new(UtcOffset::UTC);
        history.update(Quantity::Temperature, 20.0);
        history.update(Quantity::Temperature, 22.0);

        let now = MIDNIGHT + 60;
        history.ensure_checked(now);
        for event in clock.tick(now) {
            history.rollover(event.ring, event.boundary);
        }
        history.to_blob()
    };

    let restored = HistoryStore::restore(Some(&blob), UtcOffset::UTC);
    let view = restored.get_history(Quantity::Temperature);
    assert_eq!(view.day.last().unwrap().value, 21.0);
    let week_head = view.week.last().unwrap();
    assert!(week_head.valid);
    assert_eq!((week_head.min, week_head.max), (20.0, 22.0));
}

#[test]
fn test_week_survives_restart_late_evening_west_of_utc() {
    let est = UtcOffset::from_hms(-5, 0, 0).unwrap();
    let day = 86_400;
    // 2024-02-23T00:00-05:00
    let first_midnight = MIDNIGHT - 7 * day + 5 * 3600;

    let mut history = HistoryStore::new(est);
    let mut clock = RolloverClock::new(est);
    for n in 0..8 {
        history.update(Quantity::Temperature, n as f32);
        for event in clock.tick(first_midnight + n * day + 60) {
            history.rollover(event.ring, event.boundary);
        }
    }
    let week = history.dataset(Quantity::Temperature).week;
    assert!(week.iter().all(|slot| slot.valid));
    assert_eq!(week[6].timestamp, first_midnight + 6 * day);

    // 2024-03-01T23:00-05:00, already the next day in UTC.
    let now = first_midnight + 7 * day + 23 * 3600;
    let mut restored = HistoryStore::restore(Some(&history.to_blob()), est);
    assert!(restored.ensure_checked(now));
    assert_eq!(restored.dataset(Quantity::Temperature).week, week);

    // The stale half-hour ring was cleared; the week ring needs no rollover.
    let mut resumed = restored.rollover_clock();
    let events = resumed.tick(now);
    assert!(events.iter().all(|event| event.ring == RingKind::HalfHour));
    assert!(!restored.ensure_checked(now + 600));
}
