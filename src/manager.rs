//! DataManager: the single entry point for remote data.
//!
//! Wires the response cache, circuit breaker, request queue, metrics and
//! offline buffer together. Construct one at startup and share it (usually
//! as `Arc<DataManager>`) with every feature that fetches data.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::Instant;

use crate::breaker::{BreakerConfig, BreakerStats, CircuitBreaker, CircuitState};
use crate::cache::{CacheStats, CacheTtl, LruCache};
use crate::connectivity::Connectivity;
use crate::error::{ErrorKind, FetchError, FetchResult};
use crate::metrics::{ApiMetrics, DEFAULT_SAMPLE_WINDOW, MetricsSnapshot};
use crate::offline::{FETCH_TASK, OfflineQueue, OfflineStats, OfflineTask};
use crate::queue::{Operation, Priority, QueueStats, RequestQueue, operation};
use crate::retry::RetryPolicy;
use crate::storage::KeyValueStore;

/// Logical data categories and their dispatch priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataCategory {
    Price,
    Metrics,
    Financials,
    General,
    News,
}

impl DataCategory {
    /// Price refreshes must never wait behind bulk background fetches
    pub fn priority(&self) -> Priority {
        match self {
            DataCategory::Price => Priority::Critical,
            DataCategory::Metrics | DataCategory::Financials => Priority::High,
            DataCategory::General => Priority::Normal,
            DataCategory::News => Priority::Low,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        match self {
            DataCategory::Price => CacheTtl::PRICE,
            DataCategory::Metrics => CacheTtl::METRICS,
            DataCategory::Financials => CacheTtl::FINANCIALS,
            DataCategory::General => CacheTtl::GENERAL,
            DataCategory::News => CacheTtl::NEWS,
        }
    }
}

/// Per-call options for [`DataManager::fetch`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Defaults to `Priority::Normal`
    pub priority: Option<Priority>,
    /// Defaults to the manager's default TTL
    pub ttl: Option<Duration>,
    /// Breaker/metrics bucket. Defaults to the key prefix before `:`
    pub endpoint: Option<String>,
    /// Bypass the cache lookup (the result is still cached)
    pub skip_cache: bool,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Priority and TTL taken from the category table
    pub fn for_category(category: DataCategory) -> Self {
        Self {
            priority: Some(category.priority()),
            ttl: Some(category.default_ttl()),
            ..Self::default()
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn skip_cache(mut self, skip: bool) -> Self {
        self.skip_cache = skip;
        self
    }
}

/// Breaker and metrics bucket for `key` when none was given
pub fn endpoint_for(key: &str) -> &str {
    key.split_once(':').map_or(key, |(prefix, _)| prefix)
}

/// Tunables for the components the manager owns
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub cache_size: usize,
    pub default_ttl: Option<Duration>,
    pub breaker: BreakerConfig,
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
    pub sample_window: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            cache_size: 100,
            default_ttl: Some(CacheTtl::GENERAL),
            breaker: BreakerConfig::default(),
            max_concurrent: 6,
            retry: RetryPolicy::default(),
            sample_window: DEFAULT_SAMPLE_WINDOW,
        }
    }
}

/// Replays persisted offline tasks of one type tag
#[async_trait]
pub trait ReplayHandler: Send + Sync {
    async fn replay(&self, task: &OfflineTask) -> FetchResult<()>;
}

/// Outcome of draining the offline queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub replayed: usize,
    pub discarded: usize,
    pub remaining: usize,
}

/// Everything `all_stats` reports
#[derive(Debug, Clone, Serialize)]
pub struct AllStats {
    pub cache: CacheStats,
    pub circuit_breaker: BreakerStats,
    pub queue: QueueStats,
    pub offline: OfflineStats,
    pub metrics: MetricsSnapshot,
}

/// An operation captured while offline, kept for replay this session
#[derive(Clone)]
struct Deferred {
    operation: Operation<Value>,
    options: FetchOptions,
}

enum Replay {
    Done,
    Discard,
    Failed(FetchError),
}

type SharedCache = Arc<Mutex<LruCache<Value>>>;

/// Clears the replay flag even if the replay future is dropped
struct ReplayGuard<'a>(&'a AtomicBool);

impl<'a> ReplayGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct DataManager {
    cache: SharedCache,
    breaker: Arc<CircuitBreaker>,
    queue: RequestQueue<Value>,
    metrics: Arc<ApiMetrics>,
    offline: Mutex<OfflineQueue>,
    connectivity: Connectivity,
    default_ttl: Option<Duration>,
    deferred: Mutex<HashMap<String, Deferred>>,
    handlers: Mutex<HashMap<String, Arc<dyn ReplayHandler>>>,
    replaying: AtomicBool,
}

impl DataManager {
    pub fn new(
        settings: ManagerSettings,
        store: Arc<dyn KeyValueStore>,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(settings.cache_size))),
            breaker: Arc::new(CircuitBreaker::new(settings.breaker)),
            queue: RequestQueue::new(settings.max_concurrent, settings.retry),
            metrics: Arc::new(ApiMetrics::new(settings.sample_window)),
            offline: Mutex::new(OfflineQueue::new(store, connectivity.clone())),
            connectivity,
            default_ttl: settings.default_ttl,
            deferred: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            replaying: AtomicBool::new(false),
        }
    }

    /// Fetch `key`, serving from cache when possible.
    ///
    /// Concurrent calls with the same key share one execution of
    /// `operation`.
    pub async fn fetch<T, F, Fut>(
        &self,
        key: &str,
        operation: F,
        options: FetchOptions,
    ) -> FetchResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<T>> + Send + 'static,
    {
        let value = self.fetch_value(key, json_operation(operation), options).await?;
        serde_json::from_value(value).map_err(|e| {
            FetchError::InvalidResponse(format!("Unexpected shape for {}: {}", key, e))
        })
    }

    /// Untyped form of [`fetch`](Self::fetch)
    pub async fn fetch_value(
        &self,
        key: &str,
        operation: Operation<Value>,
        options: FetchOptions,
    ) -> FetchResult<Value> {
        let cached = if options.skip_cache {
            None
        } else {
            lock(&self.cache).get(key)
        };
        if let Some(value) = cached {
            self.metrics.record_cache(true);
            log::debug!("Cache hit: {}", key);
            return Ok(value);
        }
        self.metrics.record_cache(false);

        if !self.connectivity.is_online() {
            return self.defer(key, operation, &options);
        }

        let result = self.dispatch(key, operation.clone(), &options).await;

        if let Err(ref err) = result
            && err.kind().is_transient()
            && !self.connectivity.is_online()
        {
            self.capture(key, operation, &options);
        }
        result
    }

    /// Breaker gate, queue admission and guarded execution
    async fn dispatch(
        &self,
        key: &str,
        operation: Operation<Value>,
        options: &FetchOptions,
    ) -> FetchResult<Value> {
        let endpoint = options
            .endpoint
            .clone()
            .unwrap_or_else(|| endpoint_for(key).to_string());

        if let Err(err) = self.breaker.check(&endpoint) {
            self.metrics.record_error(err.kind());
            return Err(err);
        }

        let ttl = options.ttl.or(self.default_ttl);
        let work = self.guarded(key, &endpoint, operation, ttl);
        let priority = options.priority.unwrap_or_default();

        self.queue.submit(work, priority, key).await
    }

    /// Wrap `operation` so that each attempt goes through the breaker,
    /// is timed into metrics, and populates the cache on success.
    fn guarded(
        &self,
        key: &str,
        endpoint: &str,
        inner: Operation<Value>,
        ttl: Option<Duration>,
    ) -> Operation<Value> {
        let cache = Arc::clone(&self.cache);
        let breaker = Arc::clone(&self.breaker);
        let metrics = Arc::clone(&self.metrics);
        let key = key.to_string();
        let endpoint = endpoint.to_string();

        operation(move || {
            let cache = Arc::clone(&cache);
            let breaker = Arc::clone(&breaker);
            let metrics = Arc::clone(&metrics);
            let inner = Arc::clone(&inner);
            let key = key.clone();
            let endpoint = endpoint.clone();

            async move {
                let started = Instant::now();
                let result = breaker.execute(&endpoint, || inner()).await;
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

                match &result {
                    Ok(value) => {
                        metrics.record_request(&endpoint, true, latency_ms);
                        lock(&cache).set(key, value.clone(), ttl);
                    }
                    // Nothing was sent, so there is no latency to record
                    Err(err @ FetchError::CircuitOpen(_)) => {
                        metrics.record_error(err.kind());
                    }
                    Err(err) => {
                        metrics.record_request(&endpoint, false, latency_ms);
                        metrics.record_error(err.kind());
                    }
                }
                result
            }
        })
    }

    /// Offline path: capture for replay, fall back to any live cached value
    fn defer(
        &self,
        key: &str,
        operation: Operation<Value>,
        options: &FetchOptions,
    ) -> FetchResult<Value> {
        self.capture(key, operation, options);

        match lock(&self.cache).peek(key) {
            Some(value) => {
                log::debug!("Offline, serving cached {}", key);
                Ok(value)
            }
            None => {
                self.metrics.record_error(ErrorKind::Offline);
                Err(FetchError::Offline(key.to_string()))
            }
        }
    }

    /// Remember the operation and persist a replay task, once per key
    fn capture(&self, key: &str, operation: Operation<Value>, options: &FetchOptions) {
        lock(&self.deferred).insert(
            key.to_string(),
            Deferred {
                operation,
                options: options.clone(),
            },
        );

        let mut offline = lock(&self.offline);
        let already_queued = offline
            .tasks()
            .any(|task| task.task_type == FETCH_TASK && task.payload["key"] == key);
        if already_queued {
            return;
        }

        offline.enqueue(OfflineTask::new(
            FETCH_TASK,
            json!({
                "key": key,
                "endpoint": options.endpoint,
                "priority": options.priority,
                "ttl_ms": options.ttl.map(|ttl| ttl.as_millis() as u64),
            }),
        ));
    }

    /// Register the replayer for persisted tasks of `task_type`
    pub fn register_handler(&self, task_type: impl Into<String>, handler: Arc<dyn ReplayHandler>) {
        lock(&self.handlers).insert(task_type.into(), handler);
    }

    /// Update connectivity. Going online drains the offline queue.
    pub async fn set_online(&self, online: bool) -> Option<ReplayReport> {
        let was_online = self.connectivity.set_online(online);
        if online && !was_online {
            Some(self.replay_offline().await)
        } else {
            None
        }
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Replay whenever the shared connectivity signal flips to online.
    ///
    /// Use this when the host updates a [`Connectivity`] handle directly
    /// instead of calling [`set_online`](Self::set_online). Abort the
    /// returned handle to stop watching.
    pub fn watch_connectivity(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut rx = manager.connectivity.subscribe();

        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if online {
                    manager.replay_offline().await;
                }
            }
        })
    }

    /// Drain the offline queue in FIFO order, stopping at the first failure
    pub async fn replay_offline(&self) -> ReplayReport {
        let mut report = ReplayReport::default();

        if !self.connectivity.is_online() {
            report.remaining = lock(&self.offline).len();
            return report;
        }
        let Some(guard) = ReplayGuard::acquire(&self.replaying) else {
            report.remaining = lock(&self.offline).len();
            return report;
        };

        loop {
            let Some(task) = lock(&self.offline).front().cloned() else {
                break;
            };

            match self.replay_task(&task).await {
                Replay::Done => {
                    self.settle(&task);
                    report.replayed += 1;
                }
                Replay::Discard => {
                    log::warn!(
                        "No way to replay offline {} task, discarding",
                        task.task_type
                    );
                    self.settle(&task);
                    report.discarded += 1;
                }
                Replay::Failed(err) => {
                    log::warn!("Offline replay stopped: {}", err);
                    break;
                }
            }
        }

        drop(guard);
        report.remaining = lock(&self.offline).len();
        if report.replayed + report.discarded > 0 {
            log::info!(
                "Offline replay finished: {} replayed, {} discarded, {} remaining",
                report.replayed,
                report.discarded,
                report.remaining
            );
        }
        report
    }

    /// Drop `task` from the front, unless the queue changed underneath the
    /// replay (cleared, or refilled with newer work)
    fn settle(&self, task: &OfflineTask) {
        if !lock(&self.offline).pop_front_if(task) {
            log::debug!("Offline queue changed during replay of {}", task.task_type);
        }
    }

    async fn replay_task(&self, task: &OfflineTask) -> Replay {
        if task.task_type == FETCH_TASK
            && let Some(key) = task.payload["key"].as_str()
        {
            // Stays registered until it succeeds, so a cancelled replay
            // can be picked up again
            let deferred = lock(&self.deferred).get(key).cloned();
            if let Some(deferred) = deferred {
                let result = self
                    .dispatch(key, deferred.operation, &deferred.options)
                    .await;
                return match result {
                    Ok(_) => {
                        lock(&self.deferred).remove(key);
                        Replay::Done
                    }
                    Err(err) => Replay::Failed(err),
                };
            }
        }

        let handler = lock(&self.handlers).get(&task.task_type).cloned();
        match handler {
            Some(handler) => match handler.replay(task).await {
                Ok(()) => Replay::Done,
                Err(err) => Replay::Failed(err),
            },
            None => Replay::Discard,
        }
    }

    /// Drop every cached key starting with `prefix`
    pub fn clear_cache_pattern(&self, prefix: &str) -> usize {
        let removed = lock(&self.cache).clear_pattern(prefix);
        log::debug!("Cleared {} cache entries matching {}*", removed, prefix);
        removed
    }

    pub fn force_close(&self, endpoint: &str) {
        self.breaker.force_close(endpoint);
    }

    pub fn circuit_state(&self, endpoint: &str) -> CircuitState {
        self.breaker.state(endpoint)
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    pub fn clear_offline(&self) {
        lock(&self.deferred).clear();
        lock(&self.offline).clear();
    }

    pub fn offline_tasks(&self) -> Vec<OfflineTask> {
        lock(&self.offline).tasks().cloned().collect()
    }

    pub fn all_stats(&self) -> AllStats {
        AllStats {
            cache: lock(&self.cache).stats(),
            circuit_breaker: self.breaker.stats(),
            queue: self.queue.stats(),
            offline: lock(&self.offline).stats(),
            metrics: self.metrics.metrics(),
        }
    }
}

/// Adapt a typed operation to the JSON values the manager stores
fn json_operation<T, F, Fut>(f: F) -> Operation<Value>
where
    T: Serialize + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult<T>> + Send + 'static,
{
    operation(move || {
        let fut = f();
        async move {
            let value = fut.await?;
            serde_json::to_value(value).map_err(|e| FetchError::InvalidResponse(e.to_string()))
        }
    })
}
