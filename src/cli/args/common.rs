//! Common CLI types shared across commands

use stockdash_net::DataCategory;

/// Output format options
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty format - human-optimized rich formatting
    #[default]
    Pretty,
    /// Table format - one row per entry
    Table,
    /// JSON format - structured for scripts
    Json,
}

/// Data category as accepted on the command line
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum CategoryArg {
    /// Live prices: critical priority, 30s TTL
    Price,
    /// Key metrics: high priority, 15m TTL
    Metrics,
    /// Financial statements: high priority, 1h TTL
    Financials,
    /// Everything else: normal priority, 5m TTL
    General,
    /// News feed: low priority, 10m TTL
    News,
}

impl From<CategoryArg> for DataCategory {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Price => DataCategory::Price,
            CategoryArg::Metrics => DataCategory::Metrics,
            CategoryArg::Financials => DataCategory::Financials,
            CategoryArg::General => DataCategory::General,
            CategoryArg::News => DataCategory::News,
        }
    }
}
