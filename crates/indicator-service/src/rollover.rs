//! History rollover: a timer that detects period boundaries and a worker
//! that applies them.
//!
//! The timer only reads the wall clock and sends [`RolloverEvent`]s; the
//! worker takes the history lock, rolls the rings and persists the result.
//! Keeping them apart means a slow store write never delays boundary
//! detection.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use indicator_core::{RolloverClock, RolloverEvent, SensorEvent};

use crate::state::AppState;

/// Capacity of the timer to worker queue.
pub const QUEUE_CAPACITY: usize = 4;

/// Create the timer to worker queue.
pub fn channel() -> (mpsc::Sender<RolloverEvent>, mpsc::Receiver<RolloverEvent>) {
    mpsc::channel(QUEUE_CAPACITY)
}

/// Evaluate `clock` every `tick` and forward due rollovers.
///
/// Exits on shutdown or when the worker is gone.
pub async fn run_rollover_timer(
    mut clock: RolloverClock,
    tick: Duration,
    tx: mpsc::Sender<RolloverEvent>,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("History timer started: tick every {:?}", tick);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let now = OffsetDateTime::now_utc().unix_timestamp();
        for event in clock.tick(now) {
            debug!("{} rollover due at {}", event.ring, event.boundary);
            if tx.send(event).await.is_err() {
                info!("History worker gone, stopping timer");
                return;
            }
        }
    }

    info!("History timer stopped");
}

/// Check the restored history against the wall clock and build the clock
/// that continues from it.
///
/// With the rings already closed up to the previous period, samples
/// collected from startup on land in the current one.
pub async fn resume_clock(state: &AppState, now: i64) -> RolloverClock {
    let mut history = state.history.lock().await;
    if RolloverClock::clock_is_set(now) {
        history.ensure_checked(now);
    }
    history.rollover_clock()
}

/// Apply one rollover to the shared history and persist it if anything
/// changed. Returns whether the history changed.
pub async fn apply_rollover(state: &AppState, event: RolloverEvent, now: i64) -> bool {
    let changed = {
        let mut history = state.history.lock().await;
        history.ensure_checked(now);
        history.rollover(event.ring, event.boundary)
    };

    if !changed {
        debug!("{} rollover at {} changed nothing", event.ring, event.boundary);
        return false;
    }

    match state.persist_history().await {
        Ok(()) => info!("{} history rolled over at {}", event.ring, event.boundary),
        Err(e) => error!("Failed to persist history: {}", e),
    }
    state.events.send(SensorEvent::Rollover {
        ring: event.ring,
        boundary: event.boundary,
    });
    true
}

/// Apply rollovers from the timer until it stops or the service shuts
/// down.
pub async fn run_rollover_worker(state: Arc<AppState>, mut rx: mpsc::Receiver<RolloverEvent>) {
    loop {
        let event = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let now = OffsetDateTime::now_utc().unix_timestamp();
        apply_rollover(&state, event, now).await;
    }
    info!("History worker stopped");
}
