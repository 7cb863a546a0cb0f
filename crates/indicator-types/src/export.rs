//! Remote export configuration and status.

use core::fmt;

use bytes::{Buf, BufMut};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Capacity of each NUL-padded string field in the persisted layout.
pub const HOST_LEN: usize = 64;
pub const USER_LEN: usize = 32;
pub const PASSWORD_LEN: usize = 64;
pub const DATABASE_LEN: usize = 32;
pub const TABLE_LEN: usize = 32;

/// Settings for exporting readings to a MySQL/MariaDB server.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ExportConfig {
    /// Whether the periodic export timer runs.
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub table: String,
    /// Minutes between scheduled exports. Zero disables the timer.
    pub interval_minutes: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: 3306,
            user: "sensors".to_string(),
            password: String::new(),
            database: "sensors".to_string(),
            table: "sensor_data".to_string(),
            interval_minutes: 5,
        }
    }
}

impl fmt::Debug for ExportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportConfig")
            .field("enabled", &self.enabled)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("database", &self.database)
            .field("table", &self.table)
            .field("interval_minutes", &self.interval_minutes)
            .finish()
    }
}

impl ExportConfig {
    /// Size of the persisted layout in bytes.
    pub const ENCODED_LEN: usize =
        1 + HOST_LEN + 2 + USER_LEN + PASSWORD_LEN + DATABASE_LEN + TABLE_LEN + 4;

    /// Whether host, user and password are all set.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.host.is_empty() && !self.user.is_empty() && !self.password.is_empty()
    }

    /// Whether the periodic timer should be armed for this configuration.
    #[must_use]
    pub fn schedule_active(&self) -> bool {
        self.enabled && self.interval_minutes > 0
    }

    /// Encode into the fixed persisted layout.
    ///
    /// Strings longer than their field are truncated at a character
    /// boundary so that one terminating NUL always fits.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        buf.put_u8(u8::from(self.enabled));
        put_fixed_str(&mut buf, &self.host, HOST_LEN);
        buf.put_u16_le(self.port);
        put_fixed_str(&mut buf, &self.user, USER_LEN);
        put_fixed_str(&mut buf, &self.password, PASSWORD_LEN);
        put_fixed_str(&mut buf, &self.database, DATABASE_LEN);
        put_fixed_str(&mut buf, &self.table, TABLE_LEN);
        buf.put_u32_le(self.interval_minutes);
        buf
    }

    /// Decode the fixed persisted layout.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::SizeMismatch`] if `data` is not exactly
    /// [`ExportConfig::ENCODED_LEN`] bytes. Callers treat that as "absent".
    pub fn from_bytes(data: &[u8]) -> ParseResult<Self> {
        if data.len() != Self::ENCODED_LEN {
            return Err(ParseError::SizeMismatch {
                expected: Self::ENCODED_LEN,
                actual: data.len(),
            });
        }

        let mut buf = data;
        let enabled = buf.get_u8() != 0;
        let host = get_fixed_str(&mut buf, HOST_LEN);
        let port = buf.get_u16_le();
        let user = get_fixed_str(&mut buf, USER_LEN);
        let password = get_fixed_str(&mut buf, PASSWORD_LEN);
        let database = get_fixed_str(&mut buf, DATABASE_LEN);
        let table = get_fixed_str(&mut buf, TABLE_LEN);
        let interval_minutes = buf.get_u32_le();

        Ok(Self {
            enabled,
            host,
            port,
            user,
            password,
            database,
            table,
            interval_minutes,
        })
    }
}

fn put_fixed_str(buf: &mut Vec<u8>, s: &str, width: usize) {
    let mut end = s.len().min(width - 1);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    buf.put_slice(&s.as_bytes()[..end]);
    buf.put_bytes(0, width - end);
}

fn get_fixed_str(buf: &mut &[u8], width: usize) -> String {
    let field = &buf[..width];
    let len = field.iter().position(|&b| b == 0).unwrap_or(width);
    let s = String::from_utf8_lossy(&field[..len]).into_owned();
    buf.advance(width);
    s
}

/// Outcome of the most recent export attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExportStatus {
    /// `0` for success, a negative error code, or [`ExportStatus::PENDING`].
    pub last_status: i32,
    /// Unix time of the last successful export, `0` if none yet.
    pub last_export_time: i64,
}

impl ExportStatus {
    /// Status while an attempt is queued or running.
    pub const PENDING: i32 = -99;
    pub const OK: i32 = 0;

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.last_status == Self::PENDING
    }
}

/// What asked for an export attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ExportTrigger {
    /// The periodic timer fired. Requires `enabled`.
    Scheduled,
    /// An explicit "export now" request.
    Manual,
    /// A connectivity test.
    Test,
}

impl ExportTrigger {
    /// Whether an attempt of this kind runs even when export is disabled.
    #[must_use]
    pub fn bypasses_enabled(self) -> bool {
        !matches!(self, ExportTrigger::Scheduled)
    }
}

impl fmt::Display for ExportTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportTrigger::Scheduled => "scheduled",
            ExportTrigger::Manual => "manual",
            ExportTrigger::Test => "test",
        })
    }
}
