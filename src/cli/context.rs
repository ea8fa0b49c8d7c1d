//! Command execution context
//!
//! Loads configuration once and builds the shared components a command
//! needs, so handlers do not repeat the wiring.

use std::path::PathBuf;
use std::sync::Arc;

use stockdash_net::Result;
use stockdash_net::config::Config;
use stockdash_net::storage::{KeyValueStore, SqliteStore};
use stockdash_net::{Connectivity, DataManager, HttpFetcher, OfflineQueue};

use crate::cli::OutputFormat;
use crate::cli::args::GlobalOptions;

pub struct CommandContext {
    pub config: Config,
    pub format: OutputFormat,
    pub no_cache: bool,
    /// Location of the offline queue database
    pub storage_path: PathBuf,
    store: Arc<SqliteStore>,
}

impl CommandContext {
    /// Load config and open durable storage
    pub fn new(opts: &GlobalOptions) -> Result<Self> {
        let config = opts.load_config()?;

        let store = match &config.offline.storage_dir {
            Some(dir) => SqliteStore::open_at(dir)?,
            None => SqliteStore::open()?,
        };
        log::debug!("Offline storage at {}", store.path().display());

        Ok(Self {
            format: opts.format,
            no_cache: opts.no_cache,
            storage_path: store.path().to_path_buf(),
            store: Arc::new(store),
            config,
        })
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        self.store.clone()
    }

    /// The persisted offline queue, without the rest of the pipeline
    pub fn offline_queue(&self) -> OfflineQueue {
        OfflineQueue::new(self.store(), Connectivity::default())
    }

    /// A data manager configured from the loaded settings
    pub fn data_manager(&self) -> DataManager {
        DataManager::new(
            self.config.manager_settings(),
            self.store(),
            Connectivity::default(),
        )
    }

    /// HTTP adapter for the configured API host
    pub fn fetcher(&self) -> Result<Arc<HttpFetcher>> {
        let fetcher = HttpFetcher::new(
            self.config.api.host(),
            self.config.api_timeout(),
            self.config.api.requests_per_second,
        )?;
        Ok(Arc::new(fetcher))
    }
}
