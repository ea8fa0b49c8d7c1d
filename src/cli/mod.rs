//! CLI command definitions and handlers

use clap::{Args, Parser, Subcommand};

pub mod args;
pub mod config;
pub mod context;
pub mod get;
pub mod offline;

pub use args::{CategoryArg, OutputFormat};
pub use context::CommandContext;

/// stockdash - fetch market data through the StockDash resilience layer
#[derive(Parser, Debug)]
#[command(name = "stockdash")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (pretty, table, json)
    #[arg(
        long,
        global = true,
        env = "STOCKDASH_FORMAT",
        default_value = "pretty",
        hide_env = true,
        hide_possible_values = true
    )]
    pub format: OutputFormat,

    /// Override config file location
    #[arg(long, global = true, env = "STOCKDASH_CONFIG", hide_env = true)]
    pub config: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true, env = "STOCKDASH_DEBUG", hide_env = true)]
    pub debug: bool,

    /// Bypass the response cache
    #[arg(long, global = true, env = "STOCKDASH_NO_CACHE", hide_env = true)]
    pub no_cache: bool,

    /// Override the market data API base URL
    #[arg(long, global = true, env = "STOCKDASH_API_HOST", hide_env = true)]
    pub api_host: Option<String>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch one or more API paths through the data manager
    Get(GetArgs),

    /// Inspect the persisted offline queue
    #[command(subcommand)]
    Offline(OfflineCommands),

    /// Show configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Display version information
    Version,
}

/// Arguments for `stockdash get`
#[derive(Debug, Clone, Args)]
pub struct GetArgs {
    /// API paths to fetch, e.g. quotes/AAPL
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Data category, which sets priority and cache TTL
    #[arg(long, short = 'c', default_value = "general")]
    pub category: CategoryArg,

    /// Fetch each path this many times to exercise the cache
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,

    /// Print cache, breaker, queue and metrics statistics afterwards
    #[arg(long)]
    pub stats: bool,
}

/// Offline queue subcommands
#[derive(Subcommand, Debug)]
pub enum OfflineCommands {
    /// Show pending task count and storage location
    Status,
    /// List pending tasks
    List,
    /// Drop every pending task
    Clear,
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print the configuration file location
    Path,
}
