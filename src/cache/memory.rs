//! Bounded LRU cache with per-entry TTL
//!
//! Expiry is checked on read only. An expired entry is treated as absent and
//! purged by the same access that observed it.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache as Lru;
use serde::Serialize;
use tokio::time::Instant;

/// A cached value with its insertion time and optional deadline
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
    pub expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Snapshot of cache occupancy
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub keys: Vec<String>,
}

/// Bounded key/value store evicting the least-recently-used entry.
///
/// A capacity of zero is valid and retains nothing.
pub struct LruCache<V> {
    entries: Option<Lru<String, CacheEntry<V>>>,
    max_size: usize,
}

impl<V: Clone> LruCache<V> {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(max_size).map(Lru::new),
            max_size,
        }
    }

    /// Store a value, refreshing its recency.
    ///
    /// Inserting a new key into a full cache evicts exactly one entry, the
    /// least recently used.
    pub fn set(&mut self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let Some(entries) = self.entries.as_mut() else {
            return;
        };

        let now = Instant::now();
        let entry = CacheEntry {
            value,
            inserted_at: now,
            expires_at: ttl.map(|ttl| now + ttl),
        };

        let key = key.into();
        match entries.push(key.clone(), entry) {
            Some((evicted, _)) if evicted != key => {
                log::debug!("Evicted least recently used cache entry: {}", evicted);
            }
            _ => {}
        }
    }

    /// Look up a value, refreshing its recency on a hit.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let entries = self.entries.as_mut()?;
        let now = Instant::now();

        if entries.peek(key)?.is_expired(now) {
            entries.pop(key);
            log::debug!("Cache entry expired: {}", key);
            return None;
        }

        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Look up a live value without touching recency.
    pub fn peek(&mut self, key: &str) -> Option<V> {
        let entries = self.entries.as_mut()?;

        if entries.peek(key)?.is_expired(Instant::now()) {
            entries.pop(key);
            return None;
        }

        entries.peek(key).map(|entry| entry.value.clone())
    }

    /// Report whether a live entry exists. Purges the entry if it expired.
    pub fn has(&mut self, key: &str) -> bool {
        let Some(entries) = self.entries.as_mut() else {
            return false;
        };

        let expired = match entries.peek(key) {
            Some(entry) => entry.is_expired(Instant::now()),
            None => return false,
        };

        if expired {
            entries.pop(key);
        }
        !expired
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries
            .as_mut()
            .and_then(|entries| entries.pop(key))
            .map(|entry| entry.value)
    }

    /// Remove every key starting with `prefix`, returning how many went.
    pub fn clear_pattern(&mut self, prefix: &str) -> usize {
        let Some(entries) = self.entries.as_mut() else {
            return 0;
        };

        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        if let Some(entries) = self.entries.as_mut() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Size, capacity and live keys, most recently used first.
    ///
    /// Expired entries still awaiting their lazy purge are left out of `keys`.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let keys = self
            .entries
            .as_ref()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, entry)| !entry.is_expired(now))
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default();

        CacheStats {
            size: self.len(),
            max_size: self.max_size,
            keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get() {
        let mut cache = LruCache::new(3);
        cache.set("price:AAPL", 189.5, None);

        assert_eq!(cache.get("price:AAPL"), Some(189.5));
        assert_eq!(cache.get("price:MSFT"), None);
    }

    #[test]
    fn test_fourth_insert_evicts_least_recently_used() {
        let mut cache = LruCache::new(3);
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        cache.set("c", 3, None);
        cache.set("d", 4, None);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("d"), Some(4));
    }

    #[test]
    fn test_get_refreshes_recency() {
        let mut cache = LruCache::new(3);
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        cache.set("c", 3, None);

        // Touch "a" so "b" becomes the eviction candidate
        assert_eq!(cache.get("a"), Some(1));
        cache.set("d", 4, None);

        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn test_set_existing_key_does_not_evict() {
        let mut cache = LruCache::new(2);
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        cache.set("a", 10, None);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn test_zero_capacity_retains_nothing() {
        let mut cache = LruCache::new(0);
        cache.set("a", 1, None);

        assert!(cache.is_empty());
        assert!(!cache.has("a"));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.stats().max_size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expires_on_read() {
        let mut cache = LruCache::new(3);
        cache.set("quote", "x".to_string(), Some(Duration::from_millis(100)));

        assert!(cache.has("quote"));

        tokio::time::advance(Duration::from_millis(150)).await;

        assert!(!cache.has("quote"));
        // Purged by the read that noticed the expiry
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_without_ttl_never_expires() {
        let mut cache = LruCache::new(3);
        cache.set("static", 1, None);

        tokio::time::advance(Duration::from_secs(24 * 60 * 60)).await;

        assert_eq!(cache.get("static"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_peek_honors_ttl() {
        let mut cache = LruCache::new(3);
        cache.set("k", 1, Some(Duration::from_millis(10)));
        assert_eq!(cache.peek("k"), Some(1));

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(cache.peek("k"), None);
    }

    #[test]
    fn test_clear_pattern_only_removes_prefix() {
        let mut cache = LruCache::new(10);
        cache.set("watchlist:main", 1, None);
        cache.set("watchlist:tech", 2, None);
        cache.set("price:AAPL", 3, None);

        let removed = cache.clear_pattern("watchlist");

        assert_eq!(removed, 2);
        assert!(!cache.has("watchlist:main"));
        assert!(!cache.has("watchlist:tech"));
        assert!(cache.has("price:AAPL"));
    }

    #[test]
    fn test_stats_lists_live_keys() {
        let mut cache = LruCache::new(5);
        cache.set("a", 1, None);
        cache.set("b", 2, None);

        let stats = cache.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.max_size, 5);
        assert!(stats.keys.contains(&"a".to_string()));
        assert!(stats.keys.contains(&"b".to_string()));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = LruCache::new(5);
        cache.set("a", 1, None);
        cache.set("b", 2, None);

        assert_eq!(cache.remove("a"), Some(1));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
