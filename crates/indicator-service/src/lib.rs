//! Telemetry service for the indicator appliance.
//!
//! This crate provides a service that:
//! - Reads framed sensor readings from the board over a UART or TCP bridge
//! - Keeps the current snapshot and half-hour/day history of every quantity
//! - Rolls history over on local period boundaries and persists it
//! - Exports the current snapshot to a MySQL/MariaDB table on a schedule
//! - Exposes a REST API for readings, history and export settings
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/readings/current` - Latest value of every quantity
//! - `GET /api/history/{quantity}` - Half-hour and day history of a quantity
//! - `GET /api/export/config` - Export settings (password redacted)
//! - `PUT /api/export/config` - Update export settings
//! - `GET /api/export/status` - Last export status and time
//! - `POST /api/export/now` - Export immediately
//! - `POST /api/export/test` - Test the export connection
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/indicator/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [storage]
//! path = "~/.local/share/indicator/data.db"
//!
//! [transport]
//! device = "/dev/ttyS1"
//! baud_rate = 115200
//! collect_interval_ms = 5000
//!
//! [history]
//! tick_secs = 10
//! ```
//!
//! Export settings are not part of this file; they are edited through the
//! API and persisted in the store.

pub mod api;
pub mod config;
pub mod export;
pub mod ingest;
pub mod rollover;
pub mod sql;
pub mod state;

use std::sync::Arc;

use tokio_util::task::TaskTracker;

use time::OffsetDateTime;

use indicator_core::mysql::DEFAULT_TIMEOUT;

pub use config::{
    Config, ConfigError, ExportSettings, HistoryConfig, ServerConfig, StorageConfig,
    TransportConfig,
};
pub use export::{ExportError, ExportScheduler};
pub use state::{AppState, StateError};

/// Spawn every background worker onto a tracker.
///
/// The workers stop when `state.shutdown` is cancelled. The returned
/// tracker is already closed, so `wait()` resolves once they have all
/// exited.
pub fn spawn_workers(state: &Arc<AppState>) -> TaskTracker {
    let tracker = TaskTracker::new();

    tracker.spawn(ingest::run_ingest(Arc::clone(state)));

    let (tx, rx) = rollover::channel();
    let timer_state = Arc::clone(state);
    tracker.spawn(async move {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let clock = rollover::resume_clock(&timer_state, now).await;
        rollover::run_rollover_timer(
            clock,
            timer_state.config.history.tick(),
            tx,
            timer_state.shutdown.clone(),
        )
        .await;
    });
    tracker.spawn(rollover::run_rollover_worker(Arc::clone(state), rx));

    tracker.spawn(export::run_export_worker(
        Arc::clone(&state.export),
        Arc::clone(&state.snapshot),
        state.events.clone(),
        DEFAULT_TIMEOUT,
        state.shutdown.clone(),
    ));

    tracker.close();
    tracker
}
