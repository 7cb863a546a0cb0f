//! Error types for indicator-store.

use std::path::PathBuf;

/// Result type for indicator-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in indicator-store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Blob names are non-empty and at most [`MAX_NAME_LEN`](crate::MAX_NAME_LEN) bytes.
    #[error("Invalid blob name: {0:?}")]
    InvalidName(String),

    /// The store's lock was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    Poisoned,
}
