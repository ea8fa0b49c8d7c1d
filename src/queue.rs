//! Priority request queue with deduplication.
//!
//! Items are dispatched lowest priority value first, FIFO among equals, with
//! at most `max_concurrent` in flight. Callers that enqueue a dedup key that
//! is already pending or in flight are attached to the existing unit of work
//! and receive its result; the underlying operation runs once.
//!
//! A failed item waiting out its retry backoff holds no slot.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{FetchError, FetchResult};
use crate::retry::RetryPolicy;

/// A re-runnable unit of remote work
pub type Operation<T> = Arc<dyn Fn() -> BoxFuture<'static, FetchResult<T>> + Send + Sync>;

/// Wrap an async closure as an [`Operation`]
pub fn operation<T, F, Fut>(f: F) -> Operation<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult<T>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Dispatch priority. Lower values are served first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical = 1,
    High = 2,
    #[default]
    Normal = 3,
    Low = 4,
}

impl Priority {
    pub fn value(&self) -> u8 {
        *self as u8
    }

    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(Priority::Critical),
            2 => Some(Priority::High),
            3 => Some(Priority::Normal),
            4 => Some(Priority::Low),
            _ => None,
        }
    }
}

/// A unit of work waiting in, or taken from, the queue
pub struct QueueItem<T> {
    pub operation: Operation<T>,
    pub priority: Priority,
    pub dedup_key: String,
    /// Retries already made for this item
    pub attempts: u32,
    pub enqueued_at: Instant,
    /// Backing off until then; not dispatchable before
    pub not_before: Option<Instant>,
}

impl<T> QueueItem<T> {
    fn is_ready(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|at| at <= now)
    }
}

/// Result of admitting a request
pub struct Admission<T> {
    receiver: oneshot::Receiver<FetchResult<T>>,
    key: String,
    /// True when the caller was attached to existing work
    pub deduplicated: bool,
}

impl<T> Admission<T> {
    /// Wait for the shared outcome of the unit of work
    pub async fn wait(self) -> FetchResult<T> {
        self.receiver
            .await
            .unwrap_or_else(|_| Err(FetchError::Cancelled(self.key)))
    }
}

/// Queue occupancy
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub max_concurrent: usize,
    /// Callers attached to existing work instead of starting their own
    pub deduplicated: u64,
}

type Waiter<T> = oneshot::Sender<FetchResult<T>>;

struct QueueState<T> {
    /// Ordered by (priority, insertion sequence)
    pending: BTreeMap<(Priority, u64), QueueItem<T>>,
    processing: HashSet<String>,
    /// Present for every key that is pending or processing
    waiters: HashMap<String, Vec<Waiter<T>>>,
    next_seq: u64,
    deduplicated: u64,
}

impl<T> QueueState<T> {
    fn push(&mut self, item: QueueItem<T>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert((item.priority, seq), item);
    }

    /// Raise a still-pending item to `priority` if that is more urgent
    fn promote(&mut self, dedup_key: &str, priority: Priority) {
        let slot = self
            .pending
            .iter()
            .find(|(_, item)| item.dedup_key == dedup_key)
            .map(|(slot, _)| *slot);

        if let Some(slot @ (current, seq)) = slot
            && priority < current
            && let Some(mut item) = self.pending.remove(&slot)
        {
            debug!(
                "Promoting {} to priority {}",
                dedup_key,
                priority.value()
            );
            item.priority = priority;
            self.pending.insert((priority, seq), item);
        }
    }
}

/// Concurrency-capped dispatcher. Cloning yields another handle to the same
/// queue.
pub struct RequestQueue<T> {
    state: Arc<Mutex<QueueState<T>>>,
    max_concurrent: usize,
    retry_policy: RetryPolicy,
}

impl<T> Clone for RequestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            max_concurrent: self.max_concurrent,
            retry_policy: self.retry_policy,
        }
    }
}

impl<T> RequestQueue<T> {
    pub fn new(max_concurrent: usize, retry_policy: RetryPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                pending: BTreeMap::new(),
                processing: HashSet::new(),
                waiters: HashMap::new(),
                next_seq: 0,
                deduplicated: 0,
            })),
            max_concurrent: max_concurrent.max(1),
            retry_policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admit a unit of work, or attach to the one already registered under
    /// `dedup_key`. The lookup and the insert happen under one lock.
    pub fn enqueue(
        &self,
        operation: Operation<T>,
        priority: Priority,
        dedup_key: &str,
    ) -> Admission<T> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();

        if let Some(waiters) = state.waiters.get_mut(dedup_key) {
            waiters.push(tx);
            state.deduplicated += 1;
            state.promote(dedup_key, priority);
            debug!("Attached to in-flight request: {}", dedup_key);
            return Admission {
                receiver: rx,
                key: dedup_key.to_string(),
                deduplicated: true,
            };
        }

        state.waiters.insert(dedup_key.to_string(), vec![tx]);
        state.push(QueueItem {
            operation,
            priority,
            dedup_key: dedup_key.to_string(),
            attempts: 0,
            enqueued_at: Instant::now(),
            not_before: None,
        });

        Admission {
            receiver: rx,
            key: dedup_key.to_string(),
            deduplicated: false,
        }
    }

    /// Take the highest-priority ready item and mark it processing.
    ///
    /// Returns `None` when nothing is ready or every slot is busy. Items
    /// still backing off are skipped.
    pub fn dequeue(&self) -> Option<QueueItem<T>> {
        let mut state = self.lock();
        if state.processing.len() >= self.max_concurrent {
            return None;
        }

        let now = Instant::now();
        let slot = state
            .pending
            .iter()
            .find(|(_, item)| item.is_ready(now))
            .map(|(slot, _)| *slot)?;
        let item = state.pending.remove(&slot)?;
        state.processing.insert(item.dedup_key.clone());
        Some(item)
    }

    /// Mark `dedup_key` finished, freeing its slot
    pub fn complete(&self, dedup_key: &str) -> bool {
        self.lock().processing.remove(dedup_key)
    }

    /// Put a dequeued item back with its attempt count incremented
    pub fn retry(&self, item: QueueItem<T>) {
        self.retry_after(item, Duration::ZERO);
    }

    /// Like [`retry`](Self::retry), but the item frees its slot and is not
    /// dispatched again until `delay` has passed
    pub fn retry_after(&self, mut item: QueueItem<T>, delay: Duration) {
        item.attempts += 1;
        item.not_before = (!delay.is_zero()).then(|| Instant::now() + delay);
        let mut state = self.lock();
        state.processing.remove(&item.dedup_key);
        debug!(
            "Requeueing {} (retry {})",
            item.dedup_key, item.attempts
        );
        state.push(item);
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            pending: state.pending.len(),
            processing: state.processing.len(),
            max_concurrent: self.max_concurrent,
            deduplicated: state.deduplicated,
        }
    }
}

impl<T: Clone + Send + 'static> RequestQueue<T> {
    /// Enqueue, dispatch, and wait for the shared result
    pub async fn submit(
        &self,
        operation: Operation<T>,
        priority: Priority,
        dedup_key: &str,
    ) -> FetchResult<T> {
        let admission = self.enqueue(operation, priority, dedup_key);
        self.process();
        admission.wait().await
    }

    /// Start as many pending items as free slots allow
    pub fn process(&self) {
        while let Some(item) = self.dequeue() {
            debug!(
                "Dispatching {} (priority {})",
                item.dedup_key,
                item.priority.value()
            );
            let queue = self.clone();
            tokio::spawn(async move { queue.run(item).await });
        }
    }

    async fn run(self, item: QueueItem<T>) {
        let operation = Arc::clone(&item.operation);
        let result = AssertUnwindSafe(async move { operation().await })
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                warn!("Operation for {} panicked", item.dedup_key);
                Err(FetchError::Cancelled(item.dedup_key.clone()))
            });

        if let Err(ref err) = result
            && let Some(delay) = self.retry_policy.delay_for(err, item.attempts + 1)
        {
            debug!(
                "{} failed ({}), retrying in {:?}",
                item.dedup_key,
                err.kind(),
                delay
            );
            self.retry_after(item, delay);
            self.process();
            tokio::time::sleep(delay).await;
            self.process();
            return;
        }

        self.finish(&item.dedup_key, result);
        self.process();
    }

    /// Free the slot and hand the result to every attached caller
    fn finish(&self, dedup_key: &str, result: FetchResult<T>) {
        let waiters = {
            let mut state = self.lock();
            state.processing.remove(dedup_key);
            state.waiters.remove(dedup_key).unwrap_or_default()
        };

        debug!("{} resolved for {} caller(s)", dedup_key, waiters.len());
        for waiter in waiters {
            // A dropped receiver just means that caller stopped waiting
            let _ = waiter.send(result.clone());
        }
    }
}
