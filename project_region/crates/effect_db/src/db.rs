use std::path::Path;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::EffectDbError;
use crate::records::EffectRecordRepo;
use crate::schema;

/// SQLite handle holding persisted effect records.
pub struct EffectDb {
    conn: Mutex<Connection>,
}

impl EffectDb {
    /// Open (or create) a database at the given file path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EffectDbError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        schema::create_tables(&conn)?;
        tracing::info!(path = %path.display(), "effect database opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self, EffectDbError> {
        let conn = Connection::open_in_memory()?;
        schema::create_tables(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Record repository; holds the connection lock while alive.
    pub fn records(&self) -> EffectRecordRepo<'_> {
        EffectRecordRepo::new(self.conn.lock())
    }

    #[cfg(test)]
    pub(crate) fn conn_for_tests(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}
