//! Telemetry core for the indoor air-quality indicator.
//!
//! This crate holds everything between the sensor co-processor link and the
//! outer services: frame decoding, packet dispatch, gas calibration, the
//! two-resolution history rings and a minimal MySQL/MariaDB client used for
//! periodic export.
//!
//! # Features
//!
//! - **Link framing**: COBS frames with a `0x00` delimiter ([`codec`])
//! - **Dispatch**: tag/value packets routed to aggregates and the live snapshot
//! - **Calibration**: raw gas ADC counts mapped to ppm(eq) ([`calibration`])
//! - **History**: 24h of half-hour means and 7 days of daily min/max per quantity
//! - **Export**: native-password MySQL handshake and `COM_QUERY` ([`mysql`])
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use futures::StreamExt;
//! use indicator_core::{Dispatcher, EventDispatcher, FrameCodec, HistoryStore};
//! use indicator_core::CurrentSnapshot;
//! use time::UtcOffset;
//! use tokio::sync::{Mutex, RwLock};
//! use tokio_util::codec::Framed;
//!
//! # async fn example(link: tokio::net::TcpStream) -> indicator_core::Result<()> {
//! let history = Arc::new(Mutex::new(HistoryStore::new(UtcOffset::UTC)));
//! let snapshot = Arc::new(RwLock::new(CurrentSnapshot::default()));
//! let dispatcher = Dispatcher::new(history, snapshot, EventDispatcher::default());
//!
//! let mut frames = Framed::new(link, FrameCodec::new());
//! while let Some(frame) = frames.next().await {
//!     dispatcher.handle_frame(&frame?).await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod calibration;
pub mod codec;
pub mod commands;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod history;
pub mod mysql;

// Re-export the shared data model
pub use indicator_types::types;
pub use indicator_types::{
    CurrentSnapshot, DayMinMaxSlot, ExportConfig, ExportStatus, ExportTrigger, GasReading,
    HalfHourSlot, HistoryView, PacketTag, ParseError, Quantity, SensorReading,
};

// Core exports
pub use aggregate::PresentAggregate;
pub use calibration::GasRange;
pub use codec::{CodecError, FrameCodec};
pub use commands::Command;
pub use dispatcher::{Dispatch, Dispatcher, IgnoreReason, Sample, interpret};
pub use error::{Error, Result};
pub use events::{EventDispatcher, EventReceiver, EventSender, SensorEvent};
pub use history::{
    HistoryStore, RingKind, RolloverClock, RolloverEvent, SensorHistoryDataset,
};
pub use mysql::{ConnectOptions, MysqlClient, MysqlError};
