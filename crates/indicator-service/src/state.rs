//! Application state shared across workers and handlers.
//!
//! # Locks
//!
//! - **`history`** (Mutex): aggregates and rings. Held only for CPU work;
//!   the blob is serialized under the lock and written after releasing it.
//! - **`snapshot`** (RwLock): latest value of every quantity.
//!
//! When both are needed, take `history` first.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use indicator_core::{Dispatcher, EventDispatcher, HistoryStore};
use indicator_store::BlobStore;
use indicator_types::{CurrentSnapshot, ExportConfig};

use crate::config::Config;
use crate::export::{CONFIG_BLOB, ExportScheduler};
use crate::sql;

/// Blob name of the persisted sensor history.
pub const HISTORY_BLOB: &str = "sensor-data";

/// Broadcast buffer for [`EventDispatcher`].
const EVENT_BUFFER: usize = 100;

/// Shared application state.
pub struct AppState {
    /// Service configuration, fixed at startup.
    pub config: Config,
    pub history: Arc<Mutex<HistoryStore>>,
    pub snapshot: Arc<RwLock<CurrentSnapshot>>,
    pub events: EventDispatcher,
    pub store: Arc<dyn BlobStore>,
    pub export: Arc<ExportScheduler>,
    /// Cancelled once to stop every worker.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create the state, restoring persisted history and export settings.
    ///
    /// Missing or unreadable blobs fall back to defaults; a broken store
    /// never prevents startup.
    pub fn new(store: Arc<dyn BlobStore>, config: Config) -> Arc<Self> {
        let offset = config.history.utc_offset();

        let history_blob = read_blob(store.as_ref(), HISTORY_BLOB);
        let history = HistoryStore::restore(history_blob.as_deref(), offset);

        let export_config = match read_blob(store.as_ref(), CONFIG_BLOB) {
            Some(data) => match ExportConfig::from_bytes(&data) {
                Ok(config) => {
                    info!("Restored export config: {:?}", config);
                    config
                }
                Err(e) => {
                    warn!("Ignoring persisted export config: {}", e);
                    ExportConfig::default()
                }
            },
            None => {
                info!("No persisted export config, using defaults");
                ExportConfig::default()
            }
        };

        let export = ExportScheduler::new(export_config, config.export.busy_wait());

        Arc::new(Self {
            config,
            history: Arc::new(Mutex::new(history)),
            snapshot: Arc::new(RwLock::new(CurrentSnapshot::default())),
            events: EventDispatcher::new(EVENT_BUFFER),
            store,
            export: Arc::new(export),
            shutdown: CancellationToken::new(),
        })
    }

    /// A dispatcher writing into this state.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            Arc::clone(&self.history),
            Arc::clone(&self.snapshot),
            self.events.clone(),
        )
    }

    /// Validate, persist and apply a new export configuration.
    ///
    /// The running configuration only changes once the blob is written.
    pub fn set_export_config(&self, config: ExportConfig) -> Result<(), StateError> {
        if !sql::is_valid_table_name(&config.table) {
            return Err(StateError::InvalidTable(config.table));
        }
        self.store.write(CONFIG_BLOB, &config.to_bytes())?;
        self.export.set_config(config);
        Ok(())
    }

    /// Write the current history to the store.
    pub async fn persist_history(&self) -> Result<(), indicator_store::Error> {
        let blob = self.history.lock().await.to_blob();
        self.store.write(HISTORY_BLOB, &blob)
    }
}

fn read_blob(store: &dyn BlobStore, name: &str) -> Option<Vec<u8>> {
    match store.read(name) {
        Ok(blob) => blob,
        Err(e) => {
            warn!("Failed to read {}: {}", name, e);
            None
        }
    }
}

/// Errors from state mutations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Invalid table name {0:?}: use 1-{max} letters, digits or underscores", max = sql::MAX_TABLE_NAME_LEN)]
    InvalidTable(String),
    #[error("Failed to persist: {0}")]
    Store(#[from] indicator_store::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use indicator_store::MemoryBlobStore;
    use indicator_types::Quantity;

    fn state_with(store: &MemoryBlobStore) -> Arc<AppState> {
        AppState::new(Arc::new(store.clone()), Config::default())
    }

    #[tokio::test]
    async fn test_new_with_empty_store_uses_defaults() {
        let store = MemoryBlobStore::new();
        let state = state_with(&store);
        assert_eq!(state.export.config(), ExportConfig::default());
        assert!(state.snapshot.read().await.updated_at.is_none());
    }

    #[tokio::test]
    async fn test_export_config_round_trips_through_store() {
        let store = MemoryBlobStore::new();
        let config = ExportConfig {
            enabled: true,
            host: "10.0.0.5".to_string(),
            password: "pw".to_string(),
            interval_minutes: 15,
            ..ExportConfig::default()
        };
        state_with(&store).set_export_config(config.clone()).unwrap();

        let restarted = state_with(&store);
        assert_eq!(restarted.export.config(), config);
    }

    #[test]
    fn test_wrong_sized_config_blob_falls_back_to_defaults() {
        let store = MemoryBlobStore::new();
        store.write(CONFIG_BLOB, &[1, 2, 3]).unwrap();
        let state = state_with(&store);
        assert_eq!(state.export.config(), ExportConfig::default());
    }

    #[test]
    fn test_invalid_table_is_rejected_and_not_persisted() {
        let store = MemoryBlobStore::new();
        let state = state_with(&store);
        let err = state
            .set_export_config(ExportConfig {
                table: "x; DROP TABLE y".to_string(),
                ..ExportConfig::default()
            })
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidTable(_)));
        assert!(store.read(CONFIG_BLOB).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persist_history() {
        let store = MemoryBlobStore::new();
        let state = state_with(&store);
        state.history.lock().await.update(Quantity::Co2, 500.0);
        state.persist_history().await.unwrap();

        let blob = store.read(HISTORY_BLOB).unwrap().unwrap();
        assert_eq!(blob, state.history.lock().await.to_blob());
    }

    #[tokio::test]
    async fn test_dispatcher_updates_shared_snapshot() {
        let store = MemoryBlobStore::new();
        let state = state_with(&store);
        let mut frame = vec![0xB2];
        frame.extend_from_slice(&640.0f32.to_le_bytes());

        state.dispatcher().handle_frame(&frame).await;
        assert_eq!(state.snapshot.read().await.co2, 640.0);
    }
}
