//! Request counters and latency percentiles.
//!
//! Recording never fails: a poisoned lock is recovered rather than surfaced.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ErrorKind;

/// Default number of latency samples retained for percentile computation
pub const DEFAULT_SAMPLE_WINDOW: usize = 1000;

/// One completed operation
#[derive(Debug, Clone, Serialize)]
pub struct MetricSample {
    pub endpoint: String,
    pub success: bool,
    pub latency_ms: f64,
    pub timestamp: DateTime<Utc>,
}

/// Request counts for a single endpoint
#[derive(Debug, Clone, Default, Serialize)]
pub struct EndpointCounts {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
}

/// Aggregated view of everything recorded since the last reset
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: String,
    pub errors: BTreeMap<String, u64>,
    pub endpoints: BTreeMap<String, EndpointCounts>,
}

#[derive(Default)]
struct Counters {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    cache_hits: u64,
    cache_misses: u64,
    errors: BTreeMap<String, u64>,
    endpoints: BTreeMap<String, EndpointCounts>,
    samples: VecDeque<MetricSample>,
}

pub struct ApiMetrics {
    counters: Mutex<Counters>,
    sample_window: usize,
}

impl Default for ApiMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_WINDOW)
    }
}

impl ApiMetrics {
    pub fn new(sample_window: usize) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            sample_window: sample_window.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_request(&self, endpoint: &str, success: bool, latency_ms: f64) {
        let mut c = self.lock();

        c.total_requests += 1;
        if success {
            c.successful_requests += 1;
        } else {
            c.failed_requests += 1;
        }

        let counts = c.endpoints.entry(endpoint.to_string()).or_default();
        counts.requests += 1;
        if success {
            counts.successes += 1;
        } else {
            counts.failures += 1;
        }

        if c.samples.len() >= self.sample_window {
            c.samples.pop_front();
        }
        c.samples.push_back(MetricSample {
            endpoint: endpoint.to_string(),
            success,
            latency_ms,
            timestamp: Utc::now(),
        });
    }

    pub fn record_cache(&self, hit: bool) {
        let mut c = self.lock();
        if hit {
            c.cache_hits += 1;
        } else {
            c.cache_misses += 1;
        }
    }

    pub fn record_error(&self, kind: ErrorKind) {
        let mut c = self.lock();
        *c.errors.entry(kind.as_str().to_string()).or_insert(0) += 1;
    }

    /// Hit percentage with one decimal place, or "N/A" before any lookup
    pub fn cache_hit_rate(&self) -> String {
        let c = self.lock();
        format_hit_rate(c.cache_hits, c.cache_misses)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let c = self.lock();

        let mut latencies: Vec<f64> = c.samples.iter().map(|s| s.latency_ms).collect();
        latencies.sort_by(|a, b| a.total_cmp(b));

        let average_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        MetricsSnapshot {
            total_requests: c.total_requests,
            successful_requests: c.successful_requests,
            failed_requests: c.failed_requests,
            average_latency_ms,
            p50_latency_ms: percentile(&latencies, 0.50),
            p95_latency_ms: percentile(&latencies, 0.95),
            cache_hits: c.cache_hits,
            cache_misses: c.cache_misses,
            cache_hit_rate: format_hit_rate(c.cache_hits, c.cache_misses),
            errors: c.errors.clone(),
            endpoints: c.endpoints.clone(),
        }
    }

    /// Most recent samples, oldest first
    pub fn recent_samples(&self, limit: usize) -> Vec<MetricSample> {
        let c = self.lock();
        let skip = c.samples.len().saturating_sub(limit);
        c.samples.iter().skip(skip).cloned().collect()
    }

    pub fn reset(&self) {
        *self.lock() = Counters::default();
    }
}

fn format_hit_rate(hits: u64, misses: u64) -> String {
    let total = hits + misses;
    if total == 0 {
        return "N/A".to_string();
    }
    format!("{:.1}%", hits as f64 / total as f64 * 100.0)
}

/// Nearest-rank percentile over ascending `sorted` values
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[index]
}
