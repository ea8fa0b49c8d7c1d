//! Table output formatting

use stockdash_net::manager::AllStats;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Rows},
};

/// Format data as a table
pub fn format_table<T: Tabled>(data: &[T]) -> String {
    if data.is_empty() {
        return "No results found.".to_string();
    }

    let mut table = Table::new(data);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    table.to_string()
}

/// One statistic in the flattened stats table
#[derive(Debug, Tabled)]
pub struct StatRow {
    #[tabled(rename = "COMPONENT")]
    pub component: &'static str,
    #[tabled(rename = "STAT")]
    pub stat: String,
    #[tabled(rename = "VALUE")]
    pub value: String,
}

fn row(component: &'static str, stat: &str, value: impl ToString) -> StatRow {
    StatRow {
        component,
        stat: stat.to_string(),
        value: value.to_string(),
    }
}

/// Flatten every component's statistics into table rows
pub fn stats_rows(stats: &AllStats) -> Vec<StatRow> {
    let mut rows = vec![
        row("cache", "size", stats.cache.size),
        row("cache", "max_size", stats.cache.max_size),
        row("breaker", "global_state", stats.circuit_breaker.global_state),
        row("breaker", "success_rate", &stats.circuit_breaker.success_rate),
        row("queue", "pending", stats.queue.pending),
        row("queue", "processing", stats.queue.processing),
        row("queue", "deduplicated", stats.queue.deduplicated),
        row("offline", "pending", stats.offline.pending),
        row("offline", "is_online", stats.offline.is_online),
        row("metrics", "total_requests", stats.metrics.total_requests),
        row("metrics", "failed_requests", stats.metrics.failed_requests),
        row("metrics", "cache_hit_rate", &stats.metrics.cache_hit_rate),
        row(
            "metrics",
            "avg_latency_ms",
            format!("{:.1}", stats.metrics.average_latency_ms),
        ),
        row(
            "metrics",
            "p95_latency_ms",
            format!("{:.1}", stats.metrics.p95_latency_ms),
        ),
    ];

    for (endpoint, snapshot) in &stats.circuit_breaker.endpoints {
        rows.push(row("breaker", endpoint, snapshot.state));
    }
    for (kind, count) in &stats.metrics.errors {
        rows.push(row("errors", kind, count));
    }
    rows
}
