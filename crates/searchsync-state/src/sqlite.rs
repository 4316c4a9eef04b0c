//! `SQLite`-backed implementation of [`CheckpointStore`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use searchsync_types::entity::CheckpointKey;

use crate::backend::CheckpointStore;
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for the checkpoint table.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS sync_checkpoints (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

/// `SQLite`-backed checkpoint storage.
///
/// Create with [`SqliteCheckpointStore::open`] for file-backed persistence
/// or [`SqliteCheckpointStore::in_memory`] for tests.
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    /// Open or create a `SQLite` checkpoint database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Format current UTC time for `SQLite` storage.
    fn now_sqlite() -> String {
        Utc::now().format(SQLITE_DATETIME_FMT).to_string()
    }

    #[cfg(test)]
    fn updated_at(&self, key: &CheckpointKey) -> error::Result<Option<String>> {
        let conn = self.lock_conn()?;
        Ok(conn
            .query_row(
                "SELECT updated_at FROM sync_checkpoints WHERE key = ?1",
                [key.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn get(&self, key: &CheckpointKey) -> error::Result<Option<String>> {
        let conn = self.lock_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM sync_checkpoints WHERE key = ?1",
                [key.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &CheckpointKey, value: &str) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO sync_checkpoints (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![key.as_str(), value, Self::now_sqlite()],
        )?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> CheckpointKey {
        CheckpointKey::new(name)
    }

    #[test]
    fn absent_key_reads_none() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        assert!(store.get(&key("movies_last_id")).unwrap().is_none());
    }

    #[test]
    fn value_roundtrip() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.set(&key("movies_last_id"), "42").unwrap();
        assert_eq!(
            store.get(&key("movies_last_id")).unwrap(),
            Some("42".to_string())
        );
        assert!(store.updated_at(&key("movies_last_id")).unwrap().is_some());
    }

    #[test]
    fn set_overwrites_previous_value() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.set(&key("genres_last_modified"), "a").unwrap();
        store.set(&key("genres_last_modified"), "b").unwrap();
        assert_eq!(
            store.get(&key("genres_last_modified")).unwrap(),
            Some("b".to_string())
        );
    }

    #[test]
    fn keys_are_independent() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.set(&key("movies_last_id"), "m").unwrap();
        store.set(&key("persons_last_id"), "p").unwrap();
        assert_eq!(store.get(&key("movies_last_id")).unwrap().as_deref(), Some("m"));
        assert_eq!(store.get(&key("persons_last_id")).unwrap().as_deref(), Some("p"));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.db");
        {
            let store = SqliteCheckpointStore::open(&path).unwrap();
            store.set(&key("movies_last_id"), "persisted").unwrap();
        }
        let reopened = SqliteCheckpointStore::open(&path).unwrap();
        assert_eq!(
            reopened.get(&key("movies_last_id")).unwrap().as_deref(),
            Some("persisted")
        );
    }

    #[test]
    fn ping_succeeds_on_fresh_store() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        assert!(store.ping().is_ok());
        assert_eq!(store.backend_name(), "sqlite");
    }
}
