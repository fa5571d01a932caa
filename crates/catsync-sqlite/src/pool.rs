//! Shared SQLite connection.
//!
//! rusqlite connections are blocking; async callers go through
//! [`SqlitePool::read`], which runs the closure on the blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OpenFlags};
use tracing::debug;

#[derive(Clone)]
pub struct SqlitePool {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePool {
    /// Open a database file read-only.
    pub fn open(path: &Path) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        debug!(path = %path.display(), "Opened SQLite database");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Attach another database file under `alias`.
    pub fn attach(&self, alias: &str, path: &Path) -> Result<()> {
        let file = path.to_string_lossy().into_owned();
        self.with_conn(|conn| conn.execute("ATTACH DATABASE ?1 AS ?2", params![file, alias]))
            .with_context(|| format!("Failed to attach {} as '{}'", path.display(), alias))?;
        debug!(alias, path = %path.display(), "Attached SQLite database");
        Ok(())
    }

    /// Run a closure with the connection on the current thread.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&conn)?)
    }

    /// Run a closure with the connection on the blocking thread pool.
    pub async fn read<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.with_conn(f))
            .await
            .context("SQLite reader task failed")?
    }
}
