//! Database query metrics
//!
//! Passive observer: a bounded ring of recent query timings with slow-query
//! flagging and a text report for operators.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solebox_feedback::LogContext;
use tokio::time::Instant;

use crate::logging::StructuredLogger;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Recent queries kept; the oldest is evicted first
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Queries strictly slower than this are flagged and logged
    #[serde(default = "default_slow_query_threshold_ms")]
    pub slow_query_threshold_ms: f64,
}

fn default_capacity() -> usize {
    100
}
fn default_slow_query_threshold_ms() -> f64 {
    1_000.0
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            slow_query_threshold_ms: default_slow_query_threshold_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMetric {
    pub operation_name: String,
    pub duration_ms: f64,
    pub rows_affected: Option<u64>,
    pub is_slow_query: bool,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate over the recorded queries (all, or one operation).
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct QueryStats {
    pub count: usize,
    pub avg_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    pub slow_query_count: usize,
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl QueryStats {
    fn from_metrics<'a>(metrics: impl Iterator<Item = &'a QueryMetric>) -> Self {
        let mut stats = QueryStats::default();
        let mut total = 0.0;
        for metric in metrics {
            if stats.count == 0 {
                stats.min_duration_ms = metric.duration_ms;
            }
            stats.count += 1;
            total += metric.duration_ms;
            stats.min_duration_ms = stats.min_duration_ms.min(metric.duration_ms);
            stats.max_duration_ms = stats.max_duration_ms.max(metric.duration_ms);
            if metric.is_slow_query {
                stats.slow_query_count += 1;
            }
            stats.last_timestamp = Some(metric.timestamp);
        }
        if stats.count > 0 {
            stats.avg_duration_ms = total / stats.count as f64;
        }
        stats
    }
}

pub struct DatabaseMetrics {
    config: MetricsConfig,
    logger: StructuredLogger,
    metrics: Mutex<VecDeque<QueryMetric>>,
}

impl DatabaseMetrics {
    pub fn new(config: MetricsConfig, logger: StructuredLogger) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            config: MetricsConfig { capacity, ..config },
            logger,
            metrics: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record_query(&self, operation_name: &str, duration_ms: f64, rows_affected: Option<u64>) {
        let is_slow_query = duration_ms > self.config.slow_query_threshold_ms;
        let metric = QueryMetric {
            operation_name: operation_name.to_string(),
            duration_ms,
            rows_affected,
            is_slow_query,
            timestamp: Utc::now(),
        };

        {
            let mut metrics = self.lock();
            if metrics.len() >= self.config.capacity {
                metrics.pop_front();
            }
            metrics.push_back(metric);
        }

        if is_slow_query {
            self.logger.warn(
                format!("Slow query detected: {operation_name}"),
                Some(
                    LogContext::new()
                        .with("operation", operation_name)
                        .with("duration_ms", duration_ms.round())
                        .with("rows_affected", rows_affected)
                        .with("threshold_ms", self.config.slow_query_threshold_ms),
                ),
            );
        }
    }

    pub fn get_stats(&self, operation_name: Option<&str>) -> QueryStats {
        let metrics = self.lock();
        QueryStats::from_metrics(
            metrics
                .iter()
                .filter(|m| operation_name.is_none_or(|name| m.operation_name == name)),
        )
    }

    /// The `limit` slowest recorded queries, slowest first.
    pub fn get_slowest_operations(&self, limit: usize) -> Vec<QueryMetric> {
        let mut all = self.get_all_metrics();
        all.sort_by(|a, b| b.duration_ms.total_cmp(&a.duration_ms));
        all.truncate(limit);
        all
    }

    /// Per-operation summary, one line per operation name.
    pub fn get_report(&self) -> String {
        let metrics = self.get_all_metrics();
        if metrics.is_empty() {
            return "No database queries recorded".to_string();
        }

        let mut by_operation: BTreeMap<&str, Vec<&QueryMetric>> = BTreeMap::new();
        for metric in &metrics {
            by_operation
                .entry(metric.operation_name.as_str())
                .or_default()
                .push(metric);
        }

        let mut report = format!("Database Query Report ({} queries)\n", metrics.len());
        for (operation, entries) in by_operation {
            let stats = QueryStats::from_metrics(entries.into_iter());
            let last = stats
                .last_timestamp
                .map(|ts| ts.to_rfc3339())
                .unwrap_or_default();
            let _ = writeln!(
                report,
                "  {operation}: count={} avg={:.1}ms max={:.1}ms slow={} last={last}",
                stats.count, stats.avg_duration_ms, stats.max_duration_ms, stats.slow_query_count,
            );
        }
        report
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Every retained metric, oldest first.
    pub fn get_all_metrics(&self) -> Vec<QueryMetric> {
        self.lock().iter().cloned().collect()
    }

    /// Time a fallible query future and record it, whatever its outcome.
    pub async fn time_query<T, E, Fut>(&self, operation_name: &str, query: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let result = query.await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.record_query(operation_name, duration_ms, None);
        result
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueryMetric>> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
