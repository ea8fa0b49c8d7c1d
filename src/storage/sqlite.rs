//! SQLite-based key-value storage
//!
//! One row per logical key. Values are opaque strings (JSON in practice).

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::KeyValueStore;
use crate::error::StorageError;

/// Schema version - increment to trigger nuke-and-rebuild
const SCHEMA_VERSION: i32 = 1;

const DB_FILE: &str = "state.db";

type Result<T> = std::result::Result<T, StorageError>;

/// SQLite-backed durable store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create storage at the default XDG cache location
    pub fn open() -> Result<Self> {
        let dir = Self::default_dir()?;
        Self::open_at(&dir)
    }

    /// Get the storage directory path (~/.cache/stockdash on Linux/macOS)
    pub fn default_dir() -> Result<PathBuf> {
        let cache_base = dirs::cache_dir().ok_or(StorageError::NoHome)?;
        Ok(cache_base.join("stockdash"))
    }

    /// Open storage in a specific directory
    pub fn open_at(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| StorageError::Io(format!("Failed to create state dir: {}", e)))?;

        let db_path = dir.join(DB_FILE);
        let conn = Connection::open(&db_path)?;

        // Check schema version - nuke if mismatched
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .unwrap_or(0);

        if version != 0 && version != SCHEMA_VERSION {
            log::info!(
                "State schema version mismatch ({} != {}), rebuilding",
                version,
                SCHEMA_VERSION
            );
            drop(conn);
            Self::nuke(&db_path)?;
            return Self::open_at(dir);
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: db_path,
        })
    }

    /// Path of the backing database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    /// Delete the database file
    fn nuke(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            std::fs::remove_file(db_path)
                .map_err(|e| StorageError::Io(format!("Failed to remove state DB: {}", e)))?;
        }
        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv_entries WHERE key = ?1", [key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open_at(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn test_save_load() {
        let (store, _dir) = test_store();
        store.save("offline-queue-state", "[]").unwrap();

        let result = store.load("offline-queue-state").unwrap();
        assert_eq!(result, Some("[]".to_string()));
    }

    #[test]
    fn test_load_missing_key() {
        let (store, _dir) = test_store();
        assert_eq!(store.load("nothing-here").unwrap(), None);
    }

    #[test]
    fn test_save_replaces_previous_value() {
        let (store, _dir) = test_store();
        store.save("k", "first").unwrap();
        store.save("k", "second").unwrap();

        assert_eq!(store.load("k").unwrap(), Some("second".to_string()));
    }

    #[test]
    fn test_remove() {
        let (store, _dir) = test_store();
        store.save("k", "v").unwrap();
        store.remove("k").unwrap();

        assert_eq!(store.load("k").unwrap(), None);
    }

    #[test]
    fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = SqliteStore::open_at(dir.path()).unwrap();
            store.save("k", "durable").unwrap();
        }

        let reopened = SqliteStore::open_at(dir.path()).unwrap();
        assert_eq!(reopened.load("k").unwrap(), Some("durable".to_string()));
    }

    #[test]
    fn test_schema_mismatch_rebuilds() {
        let dir = TempDir::new().unwrap();
        {
            let store = SqliteStore::open_at(dir.path()).unwrap();
            store.save("k", "stale").unwrap();
            let conn = store.lock().unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
                .unwrap();
        }

        let rebuilt = SqliteStore::open_at(dir.path()).unwrap();
        assert_eq!(rebuilt.load("k").unwrap(), None);
    }
}
