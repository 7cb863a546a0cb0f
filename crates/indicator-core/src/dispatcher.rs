//! Packet dispatcher: turns decoded frames into accepted samples.
//!
//! [`interpret`] is the pure half: it parses the tag and payload, validates
//! the value and calibrates gas channels. [`Dispatcher`] applies accepted
//! samples to the aggregates, the current snapshot and the event channel.
//! Nothing that arrives on the link can make either half fail: bad frames
//! are logged and dropped.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use indicator_types::{CurrentSnapshot, PacketTag, ParseError, Quantity, SensorReading};

use crate::calibration::GasRange;
use crate::events::{EventDispatcher, SensorEvent};
use crate::history::HistoryStore;

/// A validated, calibrated sample ready to be applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub quantity: Quantity,
    /// Value to aggregate: ppm(eq) for gas channels.
    pub value: f32,
    /// Value as received.
    pub raw: f32,
}

/// Why a well-formed frame carried nothing to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Empty,
    UnknownTag(u8),
    /// A command tag echoed back by the board.
    Command(PacketTag),
    /// A reading tag whose quantity is not tracked.
    Untracked(PacketTag),
}

/// Outcome of interpreting one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Accepted(Sample),
    Ignored(IgnoreReason),
    /// The frame was for a known reading but its payload was unusable.
    Dropped(ParseError),
}

/// Parse, validate and calibrate one decoded frame.
///
/// ```
/// use indicator_core::dispatcher::{interpret, Dispatch};
/// use indicator_types::Quantity;
///
/// let mut frame = vec![0xB2];
/// frame.extend_from_slice(&612.5f32.to_le_bytes());
/// let Dispatch::Accepted(sample) = interpret(&frame) else { panic!() };
/// assert_eq!(sample.quantity, Quantity::Co2);
/// assert_eq!(sample.value, 612.5);
/// ```
#[must_use]
pub fn interpret(frame: &[u8]) -> Dispatch {
    let Some((&tag_byte, payload)) = frame.split_first() else {
        return Dispatch::Ignored(IgnoreReason::Empty);
    };

    let Ok(tag) = PacketTag::try_from(tag_byte) else {
        return Dispatch::Ignored(IgnoreReason::UnknownTag(tag_byte));
    };
    if tag.is_command() {
        return Dispatch::Ignored(IgnoreReason::Command(tag));
    }

    let reading = match SensorReading::parse(tag, payload) {
        Ok(reading) => reading,
        Err(e) => return Dispatch::Dropped(e),
    };

    let Some(quantity) = Quantity::from_tag(tag) else {
        return Dispatch::Ignored(IgnoreReason::Untracked(tag));
    };

    let value = match GasRange::for_quantity(quantity) {
        Some(range) => range.calibrate(reading.value),
        None => reading.value,
    };

    Dispatch::Accepted(Sample {
        quantity,
        value,
        raw: reading.value,
    })
}

/// Applies frames to the shared pipeline state.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    history: Arc<Mutex<HistoryStore>>,
    snapshot: Arc<RwLock<CurrentSnapshot>>,
    events: EventDispatcher,
}

impl Dispatcher {
    pub fn new(
        history: Arc<Mutex<HistoryStore>>,
        snapshot: Arc<RwLock<CurrentSnapshot>>,
        events: EventDispatcher,
    ) -> Self {
        Self {
            history,
            snapshot,
            events,
        }
    }

    /// Interpret one frame and, if it is accepted, apply it.
    pub async fn handle_frame(&self, frame: &[u8]) -> Dispatch {
        let outcome = interpret(frame);
        match &outcome {
            Dispatch::Accepted(sample) => self.apply(*sample).await,
            Dispatch::Ignored(IgnoreReason::UnknownTag(tag)) => {
                debug!("Ignoring frame with unknown tag 0x{:02X}", tag);
            }
            Dispatch::Ignored(reason) => trace!("Ignoring frame: {:?}", reason),
            Dispatch::Dropped(e) => warn!("Dropping frame 0x{:02X}: {}", frame[0], e),
        }
        outcome
    }

    /// Apply an accepted sample: aggregate, snapshot, then observers.
    pub async fn apply(&self, sample: Sample) {
        self.history
            .lock()
            .await
            .update(sample.quantity, sample.value);

        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.record(sample.quantity, sample.value, sample.raw);
            snapshot.updated_at = Some(OffsetDateTime::now_utc());
        }

        if sample.quantity.is_gas() {
            debug!(
                "{}: {:.2} ppm(eq) (raw {:.3})",
                sample.quantity, sample.value, sample.raw
            );
        } else {
            debug!(
                "{}: {:.prec$} {}",
                sample.quantity,
                sample.value,
                sample.quantity.unit(),
                prec = usize::from(sample.quantity.resolution())
            );
        }

        self.events.send(SensorEvent::Reading {
            quantity: sample.quantity,
            value: sample.value,
            raw: sample.raw,
        });
    }
}
