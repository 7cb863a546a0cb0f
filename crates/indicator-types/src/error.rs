//! Error types for data parsing in indicator-types.

use thiserror::Error;

/// Errors that can occur when parsing data coming off the sensor link or
/// out of persisted blobs.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Not enough bytes to parse the structure.
    #[error("Insufficient bytes: requires {expected} bytes, got {actual}")]
    InsufficientBytes {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes actually available.
        actual: usize,
    },

    /// A blob had a different size than its fixed layout.
    #[error("Size mismatch: layout is {expected} bytes, blob is {actual}")]
    SizeMismatch {
        /// Size of the fixed layout.
        expected: usize,
        /// Size of the blob that was read.
        actual: usize,
    },

    /// The packet tag byte is not part of the link protocol.
    #[error("Unknown packet tag: 0x{0:02X}")]
    UnknownTag(u8),

    /// A float payload was NaN or infinite.
    #[error("Non-finite value for {tag}")]
    NonFinite {
        /// Name of the packet tag carrying the value.
        tag: &'static str,
    },

    /// A value was decoded but is not acceptable.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using indicator-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
