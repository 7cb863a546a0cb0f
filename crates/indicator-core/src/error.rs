//! Error types for indicator-core.
//!
//! Ingestion-side failures (framing, validation) never reach this type: the
//! codec and dispatcher absorb them with a log line. `Error` covers the
//! fallible operations callers actually see, i.e. transport I/O and the
//! remote wire client.

use thiserror::Error;

use crate::codec::CodecError;
use crate::mysql::MysqlError;

/// Errors returned by indicator-core operations.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A frame could not be encoded or decoded.
    #[error("Frame error: {0}")]
    Codec(#[from] CodecError),

    /// I/O error on the sensor link.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Remote database error.
    #[error(transparent)]
    Mysql(#[from] MysqlError),
}

/// Result type alias using indicator-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_codec_error() {
        let err: Error = CodecError::Truncated.into();
        assert!(matches!(err, Error::Codec(CodecError::Truncated)));
        assert!(err.to_string().starts_with("Frame error: "));
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: Error = io.into();
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn test_from_mysql_error() {
        let err: Error = MysqlError::ConnectionClosed.into();
        assert_eq!(err.to_string(), "Connection closed by server");
    }
}
