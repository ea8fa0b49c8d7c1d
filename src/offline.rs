//! Durable FIFO of tasks deferred while connectivity is unavailable.
//!
//! The whole queue is serialized to the key-value store after every
//! mutation. Storage failures are logged and otherwise ignored: the
//! in-memory queue stays authoritative for the running session.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connectivity::Connectivity;
use crate::storage::KeyValueStore;

/// Storage key the queue persists under
pub const STORAGE_KEY: &str = "offline-queue-state";

/// Type tag for fetches captured by the data manager
pub const FETCH_TASK: &str = "fetch";

/// A deferred unit of work. Opaque to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineTask {
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
}

impl OfflineTask {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            enqueued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OfflineStats {
    pub pending: usize,
    pub is_online: bool,
}

pub struct OfflineQueue {
    tasks: VecDeque<OfflineTask>,
    store: Arc<dyn KeyValueStore>,
    connectivity: Connectivity,
}

impl OfflineQueue {
    /// Create the queue, restoring any tasks persisted by a previous run
    pub fn new(store: Arc<dyn KeyValueStore>, connectivity: Connectivity) -> Self {
        let tasks = Self::load(store.as_ref());
        if !tasks.is_empty() {
            log::info!("Restored {} offline task(s)", tasks.len());
        }
        Self {
            tasks,
            store,
            connectivity,
        }
    }

    fn load(store: &dyn KeyValueStore) -> VecDeque<OfflineTask> {
        match store.load(STORAGE_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                log::warn!("Discarding unreadable offline queue state: {}", e);
                VecDeque::new()
            }),
            Ok(None) => VecDeque::new(),
            Err(e) => {
                log::warn!("Failed to load offline queue: {}", e);
                VecDeque::new()
            }
        }
    }

    pub fn enqueue(&mut self, task: OfflineTask) {
        log::debug!("Deferring {} task until back online", task.task_type);
        self.tasks.push_back(task);
        self.save_to_storage();
    }

    /// Persist the full queue. Failures are logged, never returned.
    pub fn save_to_storage(&self) {
        let result = serde_json::to_string(&self.tasks)
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                self.store
                    .save(STORAGE_KEY, &raw)
                    .map_err(|e| e.to_string())
            });

        if let Err(e) = result {
            log::warn!("Failed to persist offline queue: {}", e);
        }
    }

    pub fn front(&self) -> Option<&OfflineTask> {
        self.tasks.front()
    }

    /// Remove the oldest task after it was replayed
    pub fn pop_front(&mut self) -> Option<OfflineTask> {
        let task = self.tasks.pop_front();
        if task.is_some() {
            self.save_to_storage();
        }
        task
    }

    /// Pop the oldest task only if it is still `expected`
    pub fn pop_front_if(&mut self, expected: &OfflineTask) -> bool {
        if self.tasks.front() != Some(expected) {
            return false;
        }
        self.pop_front().is_some()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &OfflineTask> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.save_to_storage();
    }

    pub fn stats(&self) -> OfflineStats {
        OfflineStats {
            pending: self.tasks.len(),
            is_online: self.connectivity.is_online(),
        }
    }
}
