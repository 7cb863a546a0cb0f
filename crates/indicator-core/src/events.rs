//! Sensor event system for observers of the telemetry pipeline.
//!
//! Every accepted reading, every history rollover and every finished export
//! attempt is published on a broadcast channel. Observers (a display, a log
//! sink, tests) subscribe; publishing never blocks and never fails when
//! nobody listens.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use indicator_types::{ExportTrigger, Quantity};

use crate::history::RingKind;

/// Events published by the telemetry core.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SensorEvent {
    /// A reading was accepted into the snapshot.
    Reading {
        quantity: Quantity,
        value: f32,
        /// Pre-calibration value for gas channels, the value itself otherwise.
        raw: f32,
    },
    /// A history ring rolled over and was persisted.
    Rollover { ring: RingKind, boundary: i64 },
    /// An export attempt finished.
    ExportFinished { trigger: ExportTrigger, status: i32 },
}

/// Sender for sensor events.
pub type EventSender = broadcast::Sender<SensorEvent>;

/// Receiver for sensor events.
pub type EventReceiver = broadcast::Receiver<SensorEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SensorEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_without_receivers_is_fine() {
        let events = EventDispatcher::default();
        events.send(SensorEvent::Rollover {
            ring: RingKind::Day,
            boundary: 0,
        });
        assert_eq!(events.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let events = EventDispatcher::new(8);
        let mut rx = events.subscribe();
        events.send(SensorEvent::ExportFinished {
            trigger: ExportTrigger::Test,
            status: -3,
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            SensorEvent::ExportFinished {
                trigger: ExportTrigger::Test,
                status: -3,
            }
        );
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(SensorEvent::Reading {
            quantity: Quantity::Co2,
            value: 612.5,
            raw: 612.5,
        })
        .unwrap();
        assert_eq!(json["type"], "reading");
        assert_eq!(json["quantity"], "co2");
    }
}
