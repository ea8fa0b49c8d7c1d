//! StockDash network layer
//!
//! Resilience primitives for a dashboard that talks to rate-limited market
//! data APIs: a TTL-aware LRU cache, per-endpoint circuit breakers, a
//! priority request queue with deduplication and retries, request metrics,
//! and a persisted offline queue. [`DataManager`] wires them together.

pub mod breaker;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod http;
pub mod manager;
pub mod metrics;
pub mod offline;
pub mod queue;
pub mod retry;
pub mod storage;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use cache::{CacheTtl, LruCache};
pub use config::Config;
pub use connectivity::Connectivity;
pub use error::{Error, FetchError, FetchResult, Result};
pub use http::HttpFetcher;
pub use manager::{DataCategory, DataManager, FetchOptions, ManagerSettings, ReplayHandler};
pub use metrics::ApiMetrics;
pub use offline::{OfflineQueue, OfflineTask};
pub use queue::{Priority, RequestQueue};
pub use retry::RetryPolicy;
