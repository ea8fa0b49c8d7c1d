//! Global CLI options shared across all commands

use std::path::PathBuf;

use stockdash_net::Result;
use stockdash_net::config::Config;

use crate::cli::{Cli, OutputFormat};

/// Global flags, resolved once in `main.rs` and passed to every handler.
///
/// Precedence is CLI flag > environment variable > config file > default.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub format: OutputFormat,
    /// Custom config file path (defaults to ~/.stockdash/config.yaml)
    pub config: Option<String>,
    pub no_cache: bool,
    /// Custom API host for development/testing
    pub api_host: Option<String>,
}

impl GlobalOptions {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            format: cli.format,
            config: cli.config.clone(),
            no_cache: cli.no_cache,
            api_host: cli.api_host.clone(),
        }
    }

    /// Config file in effect for this invocation
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(PathBuf::from(path)),
            None => Config::default_path(),
        }
    }

    /// Load the configuration with CLI overrides applied.
    ///
    /// An explicit `--config` must exist; the default location may not.
    pub fn load_config(&self) -> Result<Config> {
        let path = self.config_path()?;
        let mut config = match self.config {
            Some(_) => Config::load_from(&path)?,
            None => Config::load_or_default(&path)?,
        };

        if let Some(host) = &self.api_host {
            config.api.host = Some(host.clone());
        }
        Ok(config)
    }
}
