//! Platform-agnostic types for the indicator sensor appliance.
//!
//! This crate provides the data model shared by the telemetry core
//! (indicator-core), the persistence layer and the service.
//!
//! # Features
//!
//! - Packet tags of the sensor link and the quantities they feed
//! - The current-reading snapshot
//! - History slot types and read-side views
//! - Export configuration, status and persisted layout
//! - Error types for data parsing
//!
//! # Example
//!
//! ```
//! use indicator_types::{PacketTag, SensorReading};
//!
//! let reading = SensorReading::parse(PacketTag::Co2, &612.5f32.to_le_bytes()).unwrap();
//! assert_eq!(reading.value, 612.5);
//! ```

pub mod error;
pub mod export;
pub mod history;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use export::{ExportConfig, ExportStatus, ExportTrigger};
pub use history::{
    BUCKET_SECONDS, DAY_SECONDS, DAY_SLOTS, DayMinMaxSlot, HalfHourSlot, HistoryView, WEEK_SLOTS,
};
pub use types::{
    CurrentSnapshot, GasReading, PacketTag, QUANTITY_COUNT, Quantity, READING_PAYLOAD_BYTES,
    SensorReading,
};
