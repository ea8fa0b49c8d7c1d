//! In-memory response cache
//!
//! Bounded LRU store with lazily enforced TTLs. Sits in front of every
//! remote fetch so repeated dashboard reads never touch the network.

pub mod memory;

use std::time::Duration;

/// Cache TTL configuration per data category
///
/// Defaults applied by `FetchOptions::for_category` when the caller does not
/// pass an explicit TTL.
pub struct CacheTtl;

impl CacheTtl {
    // Quotes move constantly
    pub const PRICE: Duration = Duration::from_secs(30); // 30 sec

    // Fundamentals change at most daily
    pub const METRICS: Duration = Duration::from_secs(15 * 60); // 15 min
    pub const FINANCIALS: Duration = Duration::from_secs(60 * 60); // 1 hr

    // Everything else
    pub const GENERAL: Duration = Duration::from_secs(5 * 60); // 5 min
    pub const NEWS: Duration = Duration::from_secs(10 * 60); // 10 min
}

pub use memory::{CacheEntry, CacheStats, LruCache};
