//! Configuration management for StockDash

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::error::{ConfigError, Result};
use crate::http::DEFAULT_API_HOST;
use crate::manager::ManagerSettings;
use crate::metrics::DEFAULT_SAMPLE_WINDOW;
use crate::retry::RetryPolicy;

/// Application configuration. Every section falls back to its defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheSection,
    pub breaker: BreakerSection,
    pub queue: QueueSection,
    pub metrics: MetricsSection,
    pub offline: OfflineSection,
    pub api: ApiSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_size: usize,
    /// 0 disables expiry for entries stored without an explicit TTL
    pub default_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_size: 100,
            default_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_ms: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub rate_limit_base_delay_ms: u64,
    pub rate_limit_retries: u32,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_concurrent: 6,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            rate_limit_base_delay_ms: 5_000,
            rate_limit_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub sample_window: usize,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            sample_window: DEFAULT_SAMPLE_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineSection {
    /// Directory holding the offline queue database. Defaults to the
    /// platform cache directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub timeout_secs: u64,
    pub requests_per_second: u32,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            host: None,
            timeout_secs: 30,
            requests_per_second: 10,
        }
    }
}

impl ApiSection {
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_API_HOST)
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::Invalid(
            "Could not determine home directory".to_string(),
        ))?;

        Ok(home.join(".stockdash").join("config.yaml"))
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()).into());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(ConfigError::from)?;
        config.validate()?;

        Ok(config)
    }

    /// Load from `path`, or defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SaveError(e.to_string()))?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Reject values the components cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.breaker.failure_threshold == 0 {
            return Err(
                ConfigError::Invalid("breaker.failure_threshold must be at least 1".into()).into(),
            );
        }
        if self.breaker.success_threshold == 0 {
            return Err(
                ConfigError::Invalid("breaker.success_threshold must be at least 1".into()).into(),
            );
        }
        if self.queue.max_concurrent == 0 {
            return Err(
                ConfigError::Invalid("queue.max_concurrent must be at least 1".into()).into(),
            );
        }
        if self.queue.base_delay_ms > self.queue.max_delay_ms {
            return Err(ConfigError::Invalid(
                "queue.base_delay_ms cannot exceed queue.max_delay_ms".into(),
            )
            .into());
        }
        Ok(())
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    /// Component tunables derived from this configuration
    pub fn manager_settings(&self) -> ManagerSettings {
        let default_ttl = match self.cache.default_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        ManagerSettings {
            cache_size: self.cache.max_size,
            default_ttl,
            breaker: BreakerConfig {
                failure_threshold: self.breaker.failure_threshold,
                success_threshold: self.breaker.success_threshold,
                timeout: Duration::from_millis(self.breaker.timeout_ms),
            },
            max_concurrent: self.queue.max_concurrent,
            retry: RetryPolicy {
                max_retries: self.queue.max_retries,
                base_delay: Duration::from_millis(self.queue.base_delay_ms),
                max_delay: Duration::from_millis(self.queue.max_delay_ms),
                max_rate_limit_retries: self.queue.rate_limit_retries,
                rate_limit_base_delay: Duration::from_millis(self.queue.rate_limit_base_delay_ms),
            },
            sample_window: self.metrics.sample_window,
        }
    }
}
