//! `stockdash get` - fetch paths through the data manager

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use stockdash_net::manager::AllStats;
use stockdash_net::{DataCategory, FetchOptions, Result};

use crate::cli::args::GlobalOptions;
use crate::cli::{CommandContext, GetArgs, OutputFormat};
use crate::output::json::format_json;
use crate::output::table::{format_table, stats_rows};

/// Outcome of fetching one path
#[derive(Debug, Serialize)]
pub struct FetchOutcome {
    pub path: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "PATH")]
    path: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "RESULT")]
    result: String,
}

#[derive(Serialize)]
struct GetReport<'a> {
    results: &'a [FetchOutcome],
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<&'a AllStats>,
}

/// Cache key for an API path: `<category>:<path>`
fn cache_key(category: DataCategory, path: &str) -> String {
    let label = serde_json::to_value(category)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    format!("{}:{}", label, path.trim_start_matches('/'))
}

/// Breaker bucket for an API path: its first segment
fn endpoint_for_path(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    trimmed.split('/').next().unwrap_or(trimmed).to_string()
}

pub async fn run(opts: &GlobalOptions, args: &GetArgs) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let manager = ctx.data_manager();
    let fetcher = ctx.fetcher()?;
    let category = DataCategory::from(args.category);

    let mut outcomes = Vec::new();
    for _ in 0..args.repeat.max(1) {
        let fetches = args.paths.iter().map(|path| {
            let key = cache_key(category, path);
            let options = FetchOptions::for_category(category)
                .endpoint(endpoint_for_path(path))
                .skip_cache(ctx.no_cache);
            let operation = fetcher.get_operation(path);
            let manager = &manager;
            async move {
                let result = manager.fetch_value(&key, operation, options).await;
                FetchOutcome {
                    path: path.clone(),
                    key,
                    data: result.as_ref().ok().cloned(),
                    error: result.err().map(|e| e.to_string()),
                }
            }
        });
        outcomes = futures::future::join_all(fetches).await;
    }

    let stats = args.stats.then(|| manager.all_stats());
    print_outcomes(ctx.format, &outcomes, stats.as_ref())?;

    if outcomes.iter().all(|o| o.error.is_some()) {
        return Err(stockdash_net::Error::Other(format!(
            "All {} request(s) failed",
            outcomes.len()
        )));
    }
    Ok(())
}

fn print_outcomes(
    format: OutputFormat,
    outcomes: &[FetchOutcome],
    stats: Option<&AllStats>,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let report = GetReport {
                results: outcomes,
                stats,
            };
            println!("{}", format_json(&report)?);
        }
        OutputFormat::Table => {
            let rows: Vec<OutcomeRow> = outcomes
                .iter()
                .map(|o| OutcomeRow {
                    path: o.path.clone(),
                    status: if o.error.is_some() { "error" } else { "ok" }.to_string(),
                    result: match (&o.data, &o.error) {
                        (_, Some(err)) => err.clone(),
                        (Some(data), None) => data.to_string(),
                        (None, None) => String::new(),
                    },
                })
                .collect();
            println!("{}", format_table(&rows));
            if let Some(stats) = stats {
                println!("{}", format_table(&stats_rows(stats)));
            }
        }
        OutputFormat::Pretty => {
            for outcome in outcomes {
                match (&outcome.data, &outcome.error) {
                    (_, Some(err)) => {
                        println!("{} {} {}", "✗".red(), outcome.path.bold(), err.red())
                    }
                    (Some(data), None) => {
                        println!("{} {}", "✓".green(), outcome.path.bold());
                        println!("{}", serde_json::to_string_pretty(data)?);
                    }
                    (None, None) => {}
                }
            }
            if let Some(stats) = stats {
                println!();
                print_stats_pretty(stats);
            }
        }
    }
    Ok(())
}

fn print_stats_pretty(stats: &AllStats) {
    let metrics = &stats.metrics;
    let breaker = &stats.circuit_breaker;

    println!("{}", "Network Layer Statistics".bold());
    println!("────────────────────────────────────────");
    println!(
        "Cache:          {}/{} entries, hit rate {}",
        stats.cache.size, stats.cache.max_size, metrics.cache_hit_rate
    );
    println!(
        "Requests:       {} total, {} ok, {} failed",
        metrics.total_requests, metrics.successful_requests, metrics.failed_requests
    );
    println!(
        "Latency:        avg {:.1}ms, p50 {:.1}ms, p95 {:.1}ms",
        metrics.average_latency_ms, metrics.p50_latency_ms, metrics.p95_latency_ms
    );
    println!(
        "Circuit:        {} ({} endpoint(s), success rate {})",
        breaker.global_state.as_str().cyan(),
        breaker.total_endpoints,
        breaker.success_rate
    );
    println!(
        "Queue:          {} pending, {} processing, {} deduplicated",
        stats.queue.pending, stats.queue.processing, stats.queue.deduplicated
    );
    println!("Offline queue:  {} pending", stats.offline.pending);

    if !metrics.errors.is_empty() {
        let errors: Vec<String> = metrics
            .errors
            .iter()
            .map(|(kind, count)| format!("{}={}", kind, count))
            .collect();
        println!("Errors:         {}", errors.join(", ").yellow());
    }
}
