//! REST API for readings, history and export configuration.
//!
//! # Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Store
//! errors return HTTP 500; client errors return the matching 4xx code.
//!
//! # Example
//!
//! ```ignore
//! use indicator_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use indicator_types::{CurrentSnapshot, ExportConfig, ExportStatus, HistoryView, Quantity};

use crate::state::{AppState, StateError};

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        // Readings
        .route("/api/readings/current", get(current_reading))
        .route("/api/history/{quantity}", get(history))
        // Export
        .route(
            "/api/export/config",
            get(get_export_config).put(update_export_config),
        )
        .route("/api/export/status", get(export_status))
        .route("/api/export/now", post(export_now))
        .route("/api/export/test", post(export_test))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// When the last reading arrived, if any.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_reading: Option<OffsetDateTime>,
    pub export_running: bool,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let last_reading = state.snapshot.read().await.updated_at;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        last_reading,
        export_running: state.export.is_running(),
    })
}

/// Latest value of every quantity.
async fn current_reading(State(state): State<Arc<AppState>>) -> Json<CurrentSnapshot> {
    Json(state.snapshot.read().await.clone())
}

/// Both history rings of one quantity, by column name (e.g. `co2`).
async fn history(
    State(state): State<Arc<AppState>>,
    Path(quantity): Path<String>,
) -> Result<Json<HistoryView>, AppError> {
    let quantity: Quantity = quantity
        .parse()
        .map_err(|e: indicator_types::ParseError| AppError::NotFound(e.to_string()))?;
    let view = state.history.lock().await.get_history(quantity);
    Ok(Json(view))
}

/// Export configuration as returned to clients. The password is never
/// echoed back.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportConfigResponse {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password_set: bool,
    pub database: String,
    pub table: String,
    pub interval_minutes: u32,
}

impl From<&ExportConfig> for ExportConfigResponse {
    fn from(config: &ExportConfig) -> Self {
        Self {
            enabled: config.enabled,
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            password_set: !config.password.is_empty(),
            database: config.database.clone(),
            table: config.table.clone(),
            interval_minutes: config.interval_minutes,
        }
    }
}

async fn get_export_config(State(state): State<Arc<AppState>>) -> Json<ExportConfigResponse> {
    Json(ExportConfigResponse::from(&state.export.config()))
}

/// Partial update of the export configuration. Omitted fields keep their
/// current value.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateExportConfigRequest {
    pub enabled: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub table: Option<String>,
    pub interval_minutes: Option<u32>,
}

impl UpdateExportConfigRequest {
    fn apply(self, config: &mut ExportConfig) {
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(user) = self.user {
            config.user = user;
        }
        if let Some(password) = self.password {
            config.password = password;
        }
        if let Some(database) = self.database {
            config.database = database;
        }
        if let Some(table) = self.table {
            config.table = table;
        }
        if let Some(interval) = self.interval_minutes {
            config.interval_minutes = interval;
        }
    }
}

/// Update, persist and apply the export configuration.
///
/// # Errors
///
/// [`AppError::BadRequest`] for an unusable table name or port,
/// [`AppError::Store`] if the configuration could not be persisted.
async fn update_export_config(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpdateExportConfigRequest>,
) -> Result<Json<ExportConfigResponse>, AppError> {
    let mut config = state.export.config();
    request.apply(&mut config);

    if config.port == 0 {
        return Err(AppError::BadRequest("port must not be 0".to_string()));
    }

    let response = ExportConfigResponse::from(&config);
    state.set_export_config(config)?;
    Ok(Json(response))
}

async fn export_status(State(state): State<Arc<AppState>>) -> Json<ExportStatus> {
    Json(state.export.status())
}

/// Request an export now. Returns at once; poll the status for the result.
async fn export_now(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let export = Arc::clone(&state.export);
    tokio::spawn(async move { export.export_now().await });
    (StatusCode::ACCEPTED, Json(state.export.status()))
}

#[derive(Debug, Default, Deserialize)]
pub struct TestQuery {
    /// Wait for the result (bounded by the configured test timeout).
    #[serde(default)]
    pub wait: bool,
}

/// Test the export connection.
///
/// Without `?wait=true` this returns at once with a pending status.
async fn export_test(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TestQuery>,
) -> Result<impl IntoResponse, AppError> {
    if !query.wait {
        let export = Arc::clone(&state.export);
        tokio::spawn(async move { export.test_connection().await });
        let pending = ExportStatus {
            last_status: ExportStatus::PENDING,
            ..state.export.status()
        };
        return Ok((StatusCode::ACCEPTED, Json(pending)));
    }

    state.export.test_connection().await;
    let timeout = state.config.export.test_timeout();
    match state.export.wait_for_test_result(timeout).await {
        Some(status) => Ok((StatusCode::OK, Json(status))),
        None => Err(AppError::Timeout(format!(
            "Connection test did not finish within {:?}",
            timeout
        ))),
    }
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Timeout(String),
    Store(indicator_store::Error),
}

impl From<StateError> for AppError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::InvalidTable(_) => AppError::BadRequest(e.to_string()),
            StateError::Store(e) => AppError::Store(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
