//! Blob store implementations.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::MAX_NAME_LEN;
use crate::error::{Error, Result};
use crate::schema;

/// Read and write opaque byte blobs by name.
///
/// Writes replace the whole blob. Callers own the layout and decide what a
/// blob of unexpected size means.
pub trait BlobStore: Send + Sync {
    /// The blob stored under `name`, or `None` if it was never written.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Store `data` under `name`, replacing any previous blob.
    fn write(&self, name: &str, data: &[u8]) -> Result<()>;
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// SQLite-based blob store.
pub struct SqliteBlobStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBlobStore").finish_non_exhaustive()
    }
}

impl SqliteBlobStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// When `name` was last written.
    pub fn updated_at(&self, name: &str) -> Result<Option<OffsetDateTime>> {
        let conn = self.conn.lock().map_err(|_| Error::Poisoned)?;
        let ts: Option<i64> = conn
            .query_row(
                "SELECT updated_at FROM blobs WHERE name = ?",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts.and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok()))
    }

    /// Names of every stored blob, sorted.
    pub fn names(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().map_err(|_| Error::Poisoned)?;
        let mut stmt = conn.prepare("SELECT name FROM blobs ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

impl BlobStore for SqliteBlobStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        check_name(name)?;
        let conn = self.conn.lock().map_err(|_| Error::Poisoned)?;
        let data = conn
            .query_row("SELECT data FROM blobs WHERE name = ?", [name], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(data)
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        check_name(name)?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let conn = self.conn.lock().map_err(|_| Error::Poisoned)?;
        conn.execute(
            "INSERT INTO blobs (name, data, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET data = ?2, updated_at = ?3",
            rusqlite::params![name, data, now],
        )?;
        debug!("Wrote blob '{}' ({} bytes)", name, data.len());
        Ok(())
    }
}

/// Volatile blob store.
///
/// Clones share the same contents, so a test can keep a handle while the
/// service owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        check_name(name)?;
        let blobs = self.blobs.lock().map_err(|_| Error::Poisoned)?;
        Ok(blobs.get(name).cloned())
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        check_name(name)?;
        let mut blobs = self.blobs.lock().map_err(|_| Error::Poisoned)?;
        blobs.insert(name.to_string(), data.to_vec());
        Ok(())
    }
}

impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        (**self).read(name)
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        (**self).write(name, data)
    }
}
