//! SQLite handle and schema.
//!
//! One connection shared by the relational facades behind a mutex; schema
//! init is idempotent (`CREATE ... IF NOT EXISTS` throughout) so opening an
//! existing database is a no-op.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Connection handle shared by the store facades.
pub type SharedConn = Arc<Mutex<Connection>>;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    affiliation TEXT
);

CREATE TABLE IF NOT EXISTS gallery_entries (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id INTEGER NOT NULL REFERENCES identities(id),
    image_path  TEXT NOT NULL,
    embedding   BLOB NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_gallery_identity ON gallery_entries(identity_id);

CREATE TABLE IF NOT EXISTS attendance_events (
    log_id         INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id    INTEGER NOT NULL,
    name           TEXT NOT NULL,
    affiliation    TEXT,
    captured_image TEXT,
    recorded_at    TEXT NOT NULL,
    day            TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_one_per_day
    ON attendance_events(identity_id, day);
CREATE INDEX IF NOT EXISTS idx_attendance_day ON attendance_events(day);
";

/// Owner of the shared SQLite connection.
pub struct Db {
    conn: SharedConn,
}

impl Db {
    /// Open (creating if needed) the database at `path` and run schema init.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Clone the shared handle for a store facade.
    pub fn conn(&self) -> SharedConn {
        Arc::clone(&self.conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_init_is_idempotent() {
        let db = Db::open_in_memory().unwrap();
        let conn = db.conn();
        let conn = conn.lock().unwrap();
        // Running the schema a second time must not error.
        conn.execute_batch(SCHEMA).unwrap();
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/tally.db");
        Db::open(&path).unwrap();
        assert!(path.exists());
    }
}
