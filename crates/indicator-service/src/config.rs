//! Service configuration.
//!
//! Only process-level settings live here. The export destination is part of
//! the appliance state: it is persisted in the blob store and changed over
//! the HTTP API.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::UtcOffset;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Blob database settings.
    pub storage: StorageConfig,
    /// Sensor board link.
    pub transport: TransportConfig,
    /// History rollover settings.
    pub history: HistoryConfig,
    /// Export worker tuning.
    pub export: ExportSettings,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// # Example
    ///
    /// ```
    /// use indicator_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.history.validate());
        errors.extend(self.export.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
            return errors;
        }

        match self.bind.rsplit_once(':') {
            None => errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            )),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                Ok(_) => {}
                Err(_) => errors.push(ValidationError::new(
                    "server.bind",
                    format!("invalid port '{}': must be a number 1-65535", port),
                )),
            },
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: indicator_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }
        errors
    }
}

/// Where the sensor board's byte stream comes from.
///
/// At most one of `device` and `tcp` may be set. With neither, the service
/// runs without ingestion (API and export only).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Serial port of the board (e.g. `/dev/ttyS1`), opened raw at
    /// `baud_rate` 8N1 without flow control.
    pub device: Option<PathBuf>,
    /// Line speed of `device`.
    pub baud_rate: u32,
    /// `host:port` of a TCP serial bridge.
    pub tcp: Option<String>,
    /// How long one frame poll may block before the loop checks for shutdown.
    pub read_timeout_ms: u64,
    /// Collection interval sent to the board after power-on.
    pub collect_interval_ms: Option<u32>,
}

/// Line speed of the board's UART.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Largest accepted frame poll timeout.
pub const MAX_READ_TIMEOUT_MS: u64 = 10_000;

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            device: None,
            baud_rate: DEFAULT_BAUD_RATE,
            tcp: None,
            read_timeout_ms: 100,
            collect_interval_ms: None,
        }
    }
}

impl TransportConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.device.is_some() && self.tcp.is_some() {
            errors.push(ValidationError::new(
                "transport",
                "set either 'device' or 'tcp', not both",
            ));
        }
        if let Some(device) = &self.device
            && device.as_os_str().is_empty()
        {
            errors.push(ValidationError::new(
                "transport.device",
                "device path cannot be empty (omit instead)",
            ));
        }
        if self.baud_rate == 0 {
            errors.push(ValidationError::new(
                "transport.baud_rate",
                "baud rate cannot be 0",
            ));
        }
        if let Some(tcp) = &self.tcp
            && tcp.rsplit_once(':').is_none_or(|(host, port)| {
                host.is_empty() || port.parse::<u16>().is_err()
            })
        {
            errors.push(ValidationError::new(
                "transport.tcp",
                format!("invalid address '{}': expected format 'host:port'", tcp),
            ));
        }
        if self.read_timeout_ms == 0 || self.read_timeout_ms > MAX_READ_TIMEOUT_MS {
            errors.push(ValidationError::new(
                "transport.read_timeout_ms",
                format!(
                    "read timeout {} must be between 1 and {} ms",
                    self.read_timeout_ms, MAX_READ_TIMEOUT_MS
                ),
            ));
        }
        if self.collect_interval_ms == Some(0) {
            errors.push(ValidationError::new(
                "transport.collect_interval_ms",
                "collection interval cannot be 0",
            ));
        }

        errors
    }
}

/// History rollover configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Rollover timer period in seconds.
    pub tick_secs: u64,
    /// Offset of local time from UTC in minutes. Detected from the system
    /// when absent.
    pub utc_offset_minutes: Option<i32>,
}

/// Minimum rollover tick in seconds.
pub const MIN_TICK_SECS: u64 = 1;
/// Maximum rollover tick in seconds. Longer ticks would blur bucket boundaries.
pub const MAX_TICK_SECS: u64 = 60;
/// Largest accepted UTC offset magnitude, in minutes.
pub const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            tick_secs: 10,
            utc_offset_minutes: None,
        }
    }
}

impl HistoryConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    /// The configured offset, or the system's, or UTC.
    pub fn utc_offset(&self) -> UtcOffset {
        match self.utc_offset_minutes {
            Some(minutes) => UtcOffset::from_whole_seconds(minutes * 60).unwrap_or(UtcOffset::UTC),
            None => UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        }
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !(MIN_TICK_SECS..=MAX_TICK_SECS).contains(&self.tick_secs) {
            errors.push(ValidationError::new(
                "history.tick_secs",
                format!(
                    "tick {} must be between {} and {} seconds",
                    self.tick_secs, MIN_TICK_SECS, MAX_TICK_SECS
                ),
            ));
        }
        if let Some(minutes) = self.utc_offset_minutes
            && minutes.abs() > MAX_UTC_OFFSET_MINUTES
        {
            errors.push(ValidationError::new(
                "history.utc_offset_minutes",
                format!(
                    "offset {} is outside -{max}..={max} minutes",
                    minutes,
                    max = MAX_UTC_OFFSET_MINUTES
                ),
            ));
        }

        errors
    }
}

/// Export worker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// How long a test-connection caller waits for the result.
    pub test_timeout_secs: u64,
    /// How long a trigger waits for a running attempt before overwriting.
    pub busy_wait_ms: u64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            test_timeout_secs: 30,
            busy_wait_ms: 5000,
        }
    }
}

impl ExportSettings {
    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    pub fn busy_wait(&self) -> Duration {
        Duration::from_millis(self.busy_wait_ms)
    }

    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.test_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "export.test_timeout_secs",
                "test timeout cannot be 0",
            ));
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `history.tick_secs`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("indicator")
        .join("server.toml")
}
