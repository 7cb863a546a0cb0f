//! Minimal MySQL/MariaDB client.
//!
//! Implements just enough of the client/server protocol to insert rows:
//! handshake v10, `mysql_native_password` authentication (including the
//! auth-switch request) and `COM_QUERY`. Result sets are never read.
//!
//! # Example
//!
//! ```no_run
//! use indicator_core::mysql::{ConnectOptions, MysqlClient};
//!
//! # async fn example() -> Result<(), indicator_core::mysql::MysqlError> {
//! let options = ConnectOptions::new("db.local", 3306, "sensors", "secret").database("sensors");
//! let mut client = MysqlClient::connect(&options).await?;
//! client.query("SELECT 1").await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod handshake;
pub mod packet;

use std::time::Duration;

use thiserror::Error;

pub use auth::native_password;
pub use client::{ConnectOptions, DEFAULT_TIMEOUT, MysqlClient};

/// Errors from the wire client.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MysqlError {
    /// Socket error, including DNS resolution and connect failures.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A socket operation did not complete in time.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        operation: &'static str,
        duration: Duration,
    },

    /// The server closed the connection mid-packet.
    #[error("Connection closed by server")]
    ConnectionClosed,

    /// A packet would not fit the fixed buffer.
    #[error("Packet of {len} bytes exceeds maximum of {max}")]
    PacketTooLarge { len: usize, max: usize },

    /// A server packet could not be parsed.
    #[error("Malformed {packet} packet: {reason}")]
    Malformed {
        packet: &'static str,
        reason: String,
    },

    /// The server answered with an error packet.
    #[error("Server error {code}: {message}")]
    Server { code: u16, message: String },

    /// The server answered with a packet this client does not handle.
    #[error("Unexpected {stage} response starting with 0x{marker:02X}")]
    UnexpectedResponse { stage: &'static str, marker: u8 },
}

impl MysqlError {
    /// Server error code, if the server sent one.
    #[must_use]
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Self::Server { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn malformed(packet: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            packet,
            reason: reason.into(),
        }
    }
}

/// Result type alias using the wire client's error type.
pub type Result<T> = std::result::Result<T, MysqlError>;
