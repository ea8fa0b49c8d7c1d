//! Durable key-value storage for state that must survive restarts
//!
//! The offline queue persists itself through [`KeyValueStore`]. Production
//! uses the SQLite-backed [`SqliteStore`]; tests and ephemeral sessions use
//! [`MemoryStore`].

pub mod sqlite;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::StorageError;

pub use sqlite::SqliteStore;

type Result<T> = std::result::Result<T, StorageError>;

/// Persistent string store keyed by a logical name
pub trait KeyValueStore: Send + Sync {
    /// Load the value stored under `key`, if any
    fn load(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value stored under `key`
    fn save(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the value stored under `key`
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local store. Contents vanish with the process.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(values.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        values.remove(key);
        Ok(())
    }
}
