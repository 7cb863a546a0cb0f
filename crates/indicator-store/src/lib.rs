//! Named blob persistence for the indicator sensor appliance.
//!
//! The appliance persists two things: the history rings (`sensor-data`) and
//! the export configuration (`mariadb-cfg`). Both are fixed-layout byte
//! blobs, so storage is a plain name to bytes map behind the [`BlobStore`]
//! trait.
//!
//! # Example
//!
//! ```no_run
//! use indicator_store::{BlobStore, SqliteBlobStore};
//!
//! let store = SqliteBlobStore::open_default()?;
//! store.write("sensor-data", &[0u8; 16])?;
//! let blob = store.read("sensor-data")?;
//! assert_eq!(blob.map(|b| b.len()), Some(16));
//! # Ok::<(), indicator_store::Error>(())
//! ```

mod error;
mod schema;
mod store;

pub use error::{Error, Result};
pub use store::{BlobStore, MemoryBlobStore, SqliteBlobStore};

/// Longest accepted blob name, in bytes.
pub const MAX_NAME_LEN: usize = 64;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/indicator/data.db`
/// - macOS: `~/Library/Application Support/indicator/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\indicator\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("indicator")
        .join("data.db")
}
