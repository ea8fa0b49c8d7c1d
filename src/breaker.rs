//! Per-endpoint circuit breaker
//!
//! Each endpoint carries its own CLOSED / OPEN / HALF_OPEN state. The
//! OPEN → HALF_OPEN transition is evaluated lazily whenever the state is
//! consulted; there is no background timer.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::{FetchError, FetchResult};

/// Circuit state for one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, failures are being counted
    Closed,
    /// Failure threshold exceeded, calls fail fast
    Open,
    /// Cooldown elapsed, trial calls allowed through
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds controlling state transitions
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Failures in CLOSED before opening
    pub failure_threshold: u32,
    /// Consecutive successes in HALF_OPEN before closing
    pub success_threshold: u32,
    /// Cooldown after the last failure before a trial is allowed
    pub timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_millis(30_000),
        }
    }
}

/// Breaker record for a single endpoint
#[derive(Debug, Clone)]
pub struct EndpointState {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure: Option<Instant>,
    /// Lifetime counters, never reset by transitions
    pub total_failures: u64,
    pub total_successes: u64,
}

impl Default for EndpointState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            total_failures: 0,
            total_successes: 0,
        }
    }
}

impl EndpointState {
    fn enter(&mut self, state: CircuitState) {
        self.state = state;
        self.failure_count = 0;
        self.success_count = 0;
    }
}

/// Per-endpoint detail exposed through [`BreakerStats`]
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Milliseconds since the last recorded failure
    pub last_failure_ms_ago: Option<u64>,
    pub total_failures: u64,
    pub total_successes: u64,
}

/// Aggregate breaker status for dashboards
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub global_state: CircuitState,
    pub total_endpoints: usize,
    pub total_failures: u64,
    pub total_successes: u64,
    pub success_rate: String,
    pub endpoints: BTreeMap<String, EndpointSnapshot>,
}

/// Circuit breaker keyed by endpoint name.
///
/// Internally synchronized so it can be shared across queued work; no lock
/// is held while an operation runs.
pub struct CircuitBreaker {
    config: BreakerConfig,
    endpoints: Mutex<HashMap<String, EndpointState>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, EndpointState>> {
        self.endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply the lazy OPEN → HALF_OPEN transition
    fn refresh(&self, endpoint: &str, record: &mut EndpointState, now: Instant) {
        if record.state != CircuitState::Open {
            return;
        }
        let cooled_down = record
            .last_failure
            .is_none_or(|at| now.duration_since(at) > self.config.timeout);
        if cooled_down {
            record.enter(CircuitState::HalfOpen);
            log::info!("Circuit for {} is HALF_OPEN, allowing trial requests", endpoint);
        }
    }

    /// Fail fast if the circuit for `endpoint` is OPEN.
    pub fn check(&self, endpoint: &str) -> FetchResult<()> {
        match self.state(endpoint) {
            CircuitState::Open => Err(FetchError::CircuitOpen(endpoint.to_string())),
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
        }
    }

    /// Run `operation` through the breaker, recording its outcome.
    ///
    /// When the circuit is OPEN the operation is never invoked. Errors from
    /// the operation are returned unchanged.
    pub async fn execute<T, F, Fut>(&self, endpoint: &str, operation: F) -> FetchResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<T>>,
    {
        self.check(endpoint)?;

        match operation().await {
            Ok(value) => {
                self.record_success(endpoint);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(endpoint);
                Err(err)
            }
        }
    }

    pub fn record_success(&self, endpoint: &str) {
        let now = Instant::now();
        let mut endpoints = self.lock();
        let record = endpoints.entry(endpoint.to_string()).or_default();
        self.refresh(endpoint, record, now);

        record.total_successes += 1;
        // OPEN still needs its timestamp to time the cooldown
        if record.state != CircuitState::Open {
            record.last_failure = None;
        }

        match record.state {
            CircuitState::HalfOpen => {
                record.success_count += 1;
                if record.success_count >= self.config.success_threshold {
                    record.enter(CircuitState::Closed);
                    log::info!("Circuit for {} is CLOSED", endpoint);
                }
            }
            CircuitState::Closed => {
                record.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, endpoint: &str) {
        let now = Instant::now();
        let mut endpoints = self.lock();
        let record = endpoints.entry(endpoint.to_string()).or_default();
        self.refresh(endpoint, record, now);

        record.total_failures += 1;

        match record.state {
            CircuitState::Closed => {
                record.failure_count += 1;
                record.last_failure = Some(now);
                if record.failure_count >= self.config.failure_threshold {
                    record.enter(CircuitState::Open);
                    log::info!(
                        "Circuit for {} is OPEN after {} failures",
                        endpoint,
                        self.config.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                record.enter(CircuitState::Open);
                record.last_failure = Some(now);
                log::info!("Trial request for {} failed, circuit is OPEN again", endpoint);
            }
            CircuitState::Open => {
                record.last_failure = Some(now);
            }
        }
    }

    /// Current state for `endpoint`. Unknown endpoints are CLOSED.
    pub fn state(&self, endpoint: &str) -> CircuitState {
        let now = Instant::now();
        let mut endpoints = self.lock();
        match endpoints.get_mut(endpoint) {
            Some(record) => {
                self.refresh(endpoint, record, now);
                record.state
            }
            None => CircuitState::Closed,
        }
    }

    /// Current state of every endpoint seen so far
    pub fn all_states(&self) -> BTreeMap<String, CircuitState> {
        let now = Instant::now();
        let mut endpoints = self.lock();
        endpoints
            .iter_mut()
            .map(|(endpoint, record)| {
                self.refresh(endpoint, record, now);
                (endpoint.clone(), record.state)
            })
            .collect()
    }

    /// Coarse summary across endpoints. Gating never uses this.
    pub fn global_state(&self) -> CircuitState {
        summarize(self.all_states().values().copied())
    }

    /// Reset `endpoint` to CLOSED with cleared counters
    pub fn force_close(&self, endpoint: &str) {
        let mut endpoints = self.lock();
        let record = endpoints.entry(endpoint.to_string()).or_default();
        record.enter(CircuitState::Closed);
        record.last_failure = None;
        log::info!("Circuit for {} force-closed", endpoint);
    }

    pub fn stats(&self) -> BreakerStats {
        let now = Instant::now();
        let mut endpoints = self.lock();

        let mut detail = BTreeMap::new();
        let mut total_failures = 0;
        let mut total_successes = 0;

        for (endpoint, record) in endpoints.iter_mut() {
            self.refresh(endpoint, record, now);
            total_failures += record.total_failures;
            total_successes += record.total_successes;
            detail.insert(
                endpoint.clone(),
                EndpointSnapshot {
                    state: record.state,
                    failure_count: record.failure_count,
                    success_count: record.success_count,
                    last_failure_ms_ago: record
                        .last_failure
                        .map(|at| now.duration_since(at).as_millis() as u64),
                    total_failures: record.total_failures,
                    total_successes: record.total_successes,
                },
            );
        }

        let total = total_failures + total_successes;
        let success_rate = if total == 0 {
            "N/A".to_string()
        } else {
            format!("{:.1}%", total_successes as f64 / total as f64 * 100.0)
        };

        BreakerStats {
            global_state: summarize(detail.values().map(|snapshot| snapshot.state)),
            total_endpoints: detail.len(),
            total_failures,
            total_successes,
            success_rate,
            endpoints: detail,
        }
    }
}

/// OPEN if anything is open, else HALF_OPEN if anything is probing
fn summarize(states: impl Iterator<Item = CircuitState>) -> CircuitState {
    let mut summary = CircuitState::Closed;
    for state in states {
        match state {
            CircuitState::Open => return CircuitState::Open,
            CircuitState::HalfOpen => summary = CircuitState::HalfOpen,
            CircuitState::Closed => {}
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(failure_threshold: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold,
            success_threshold: 2,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    #[test]
    fn test_default_config() {
        let config = BreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.success_threshold, 2);
        assert_eq!(config.timeout, Duration::from_millis(30_000));
    }

    #[test]
    fn test_unknown_endpoint_is_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state("quotes"), CircuitState::Closed);
        assert!(cb.all_states().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_failure_threshold() {
        let cb = breaker(3, 1000);

        cb.record_failure("quotes");
        cb.record_failure("quotes");
        assert_eq!(cb.state("quotes"), CircuitState::Closed);

        cb.record_failure("quotes");
        assert_eq!(cb.state("quotes"), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_timeout() {
        let cb = breaker(3, 1000);
        for _ in 0..3 {
            cb.record_failure("quotes");
        }

        tokio::time::advance(Duration::from_millis(900)).await;
        assert_eq!(cb.state("quotes"), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(cb.state("quotes"), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_successes() {
        let cb = breaker(3, 1000);
        for _ in 0..3 {
            cb.record_failure("quotes");
        }
        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(cb.state("quotes"), CircuitState::HalfOpen);

        cb.record_success("quotes");
        assert_eq!(cb.state("quotes"), CircuitState::HalfOpen);

        cb.record_success("quotes");
        assert_eq!(cb.state("quotes"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(3, 1000);
        for _ in 0..3 {
            cb.record_failure("quotes");
        }
        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(cb.state("quotes"), CircuitState::HalfOpen);

        cb.record_failure("quotes");
        assert_eq!(cb.state("quotes"), CircuitState::Open);

        // Timestamp was refreshed, so the cooldown starts over
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(cb.state("quotes"), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_fails_fast_when_open() {
        let cb = breaker(1, 1000);
        cb.record_failure("news");

        let calls = AtomicUsize::new(0);
        let result: FetchResult<u32> = cb
            .execute("news", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let err = result.unwrap_err();
        assert_eq!(err, FetchError::CircuitOpen("news".to_string()));
        assert_eq!(err.to_string(), "Circuit breaker is OPEN for news");
    }

    #[tokio::test]
    async fn test_execute_records_outcomes() {
        let cb = breaker(2, 1000);

        let ok: FetchResult<u32> = cb.execute("quotes", || async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err: FetchResult<u32> = cb
            .execute("quotes", || async {
                Err(FetchError::Server("boom".to_string()))
            })
            .await;
        assert_eq!(err.unwrap_err(), FetchError::Server("boom".to_string()));

        let stats = cb.stats();
        assert_eq!(stats.total_successes, 1);
        assert_eq!(stats.total_failures, 1);
        assert_eq!(stats.success_rate, "50.0%");
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoints_are_independent() {
        let cb = breaker(2, 1000);
        cb.record_failure("news");
        cb.record_failure("news");

        assert_eq!(cb.state("news"), CircuitState::Open);
        assert_eq!(cb.state("quotes"), CircuitState::Closed);
        assert!(cb.check("quotes").is_ok());
        assert!(cb.check("news").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_close() {
        let cb = breaker(1, 60_000);
        cb.record_failure("quotes");
        assert_eq!(cb.state("quotes"), CircuitState::Open);

        cb.force_close("quotes");
        assert_eq!(cb.state("quotes"), CircuitState::Closed);
        assert!(cb.check("quotes").is_ok());
    }

    #[test]
    fn test_success_resets_closed_failure_count() {
        let cb = breaker(3, 1000);
        cb.record_failure("quotes");
        cb.record_failure("quotes");
        cb.record_success("quotes");
        cb.record_failure("quotes");
        cb.record_failure("quotes");

        assert_eq!(cb.state("quotes"), CircuitState::Closed);
    }

    #[test]
    fn test_stats_without_traffic() {
        let cb = CircuitBreaker::default();
        let stats = cb.stats();

        assert_eq!(stats.global_state, CircuitState::Closed);
        assert_eq!(stats.total_endpoints, 0);
        assert_eq!(stats.success_rate, "N/A");
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_state_summarizes_endpoints() {
        let cb = breaker(1, 1000);
        cb.record_success("quotes");
        assert_eq!(cb.global_state(), CircuitState::Closed);

        cb.record_failure("news");
        assert_eq!(cb.global_state(), CircuitState::Open);
        assert_eq!(cb.stats().global_state, CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(cb.global_state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_state_serializes_screaming_case() {
        let json = serde_json::to_string(&CircuitState::HalfOpen).unwrap();
        assert_eq!(json, "\"HALF_OPEN\"");
    }
}
