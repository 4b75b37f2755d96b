//! gatehouse-store — SQLite persistence for residents and attendance entries.
//!
//! One [`SqliteStore`] wraps one connection. It implements the catalog,
//! ledger and query seams from `gatehouse-core`.

mod entries;
mod residents;
pub mod schema;

pub use residents::{NewResident, ResidentError};

use gatehouse_core::StoreError;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!("create {}: {e}", parent.display()))
                })?;
            }
        }
        let conn = Connection::open(path).map_err(unavailable)?;
        // Daemon and query connections share the file.
        conn.busy_timeout(BUSY_TIMEOUT).map_err(unavailable)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(unavailable)?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        schema::initialize(&conn).map_err(unavailable)?;
        Ok(Self { conn })
    }
}

pub(crate) fn unavailable(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}
