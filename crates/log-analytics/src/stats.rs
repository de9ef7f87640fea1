// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Running counters derived from store and query activity.
//!
//! Counters are process scoped: they start at zero and are never persisted. The cache hit
//! rate is a simple ratio over the last `window` queries.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Write;
use std::time::{Duration, Instant};

use crate::record::LogLevel;

pub const DEFAULT_HIT_RATE_WINDOW: usize = 1_000;

/// Upper bounds, in seconds, of the latency histogram buckets. `+Inf` is implicit.
pub const DEFAULT_LATENCY_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Fixed-bucket latency histogram. Each observation lands in the first bucket whose bound
/// it does not exceed; rendering accumulates them into Prometheus' cumulative `le` buckets.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyHistogram {
    counts: [u64; DEFAULT_LATENCY_BUCKETS.len()],
    sum: f64,
    count: u64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        LatencyHistogram {
            counts: [0; DEFAULT_LATENCY_BUCKETS.len()],
            sum: 0.0,
            count: 0,
        }
    }
}

impl LatencyHistogram {
    pub fn observe(&mut self, elapsed: Duration) {
        let seconds = elapsed.as_secs_f64();
        self.sum += seconds;
        self.count += 1;
        if let Some(i) = DEFAULT_LATENCY_BUCKETS.iter().position(|b| seconds <= *b) {
            self.counts[i] += 1;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    fn render(&self, out: &mut String, name: &str, help: &str) {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} histogram");
        let mut cumulative = 0;
        for (bound, count) in DEFAULT_LATENCY_BUCKETS.iter().zip(self.counts) {
            cumulative += count;
            let _ = writeln!(out, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
        }
        let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {}", self.count);
        let _ = writeln!(out, "{name}_sum {}", self.sum);
        let _ = writeln!(out, "{name}_count {}", self.count);
    }
}

/// Point-in-time view of the counters, as served by `GET /stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_received: u64,
    pub total_processed: u64,
    pub buffer_size: usize,
    pub cache_hit_rate: f64,
    pub uptime_seconds: u64,
}

/// Simplified stats used by the older dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyStats {
    pub total_logs: usize,
}

#[derive(Debug)]
pub struct StatsAggregator {
    started_at: Instant,
    total_received: u64,
    received_by_level: [u64; LogLevel::ALL.len()],
    total_processed: u64,
    total_evicted: u64,
    buffer_size: usize,
    total_queries: u64,
    total_cache_hits: u64,
    window: VecDeque<bool>,
    window_hits: usize,
    window_size: usize,
    processing_latency: LatencyHistogram,
    query_duration: LatencyHistogram,
    active_processors: u64,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        StatsAggregator::new(DEFAULT_HIT_RATE_WINDOW)
    }
}

impl StatsAggregator {
    pub fn new(window_size: usize) -> Self {
        StatsAggregator::with_start(Instant::now(), window_size)
    }

    /// Uses `started_at` as the process start for uptime. A window of 0 is treated as 1.
    pub fn with_start(started_at: Instant, window_size: usize) -> Self {
        let window_size = window_size.max(1);
        StatsAggregator {
            started_at,
            total_received: 0,
            received_by_level: [0; LogLevel::ALL.len()],
            total_processed: 0,
            total_evicted: 0,
            buffer_size: 0,
            total_queries: 0,
            total_cache_hits: 0,
            window: VecDeque::with_capacity(window_size.min(DEFAULT_HIT_RATE_WINDOW)),
            window_hits: 0,
            window_size,
            processing_latency: LatencyHistogram::default(),
            query_duration: LatencyHistogram::default(),
            active_processors: 0,
        }
    }

    /// Counts one successful append and records the store occupancy after it.
    pub fn record_ingest(&mut self, level: LogLevel, buffer_size: usize) {
        self.total_received += 1;
        self.received_by_level[level.index()] += 1;
        self.buffer_size = buffer_size;
    }

    pub fn record_eviction(&mut self, count: u64) {
        self.total_evicted += count;
    }

    pub fn record_processed(&mut self, count: usize) {
        self.total_processed += count as u64;
    }

    pub fn set_buffer_size(&mut self, buffer_size: usize) {
        self.buffer_size = buffer_size;
    }

    /// Time spent handling one ingest, accepted or rejected.
    pub fn observe_ingest_latency(&mut self, elapsed: Duration) {
        self.processing_latency.observe(elapsed);
    }

    pub fn observe_query_duration(&mut self, elapsed: Duration) {
        self.query_duration.observe(elapsed);
    }

    pub fn processing_latency(&self) -> &LatencyHistogram {
        &self.processing_latency
    }

    pub fn query_duration(&self) -> &LatencyHistogram {
        &self.query_duration
    }

    /// Tracks running flushers: `true` when one starts, `false` when it stops.
    pub fn set_processor_active(&mut self, active: bool) {
        if active {
            self.active_processors += 1;
        } else {
            self.active_processors = self.active_processors.saturating_sub(1);
        }
    }

    pub fn active_processors(&self) -> u64 {
        self.active_processors
    }

    pub fn record_query(&mut self, cache_hit: bool) {
        self.total_queries += 1;
        if cache_hit {
            self.total_cache_hits += 1;
            self.window_hits += 1;
        }
        self.window.push_back(cache_hit);
        if self.window.len() > self.window_size && self.window.pop_front() == Some(true) {
            self.window_hits -= 1;
        }
    }

    /// Fraction of the last `window` queries served from cache, 0.0 before any query.
    pub fn cache_hit_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window_hits as f64 / self.window.len() as f64
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_received: self.total_received,
            total_processed: self.total_processed,
            buffer_size: self.buffer_size,
            cache_hit_rate: self.cache_hit_rate(),
            uptime_seconds: self.uptime_seconds(),
        }
    }

    pub fn legacy(&self) -> LegacyStats {
        LegacyStats {
            total_logs: self.buffer_size,
        }
    }

    /// Renders the counters in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        let cache_misses = self.total_queries - self.total_cache_hits;

        // Writing into a String cannot fail.
        let _ = writeln!(out, "# HELP logs_received_total Total logs received");
        let _ = writeln!(out, "# TYPE logs_received_total counter");
        for level in LogLevel::ALL {
            let _ = writeln!(
                out,
                "logs_received_total{{level=\"{level}\"}} {}",
                self.received_by_level[level.index()]
            );
        }
        for (name, help, kind, value) in [
            ("logs_processed_total", "Total logs processed", "counter", self.total_processed),
            ("logs_evicted_total", "Total logs evicted from the buffer", "counter", self.total_evicted),
            ("log_buffer_size", "Current buffer size", "gauge", self.buffer_size as u64),
            ("queries_total", "Total queries served", "counter", self.total_queries),
            ("cache_hits_total", "Total cache hits", "counter", self.total_cache_hits),
            ("cache_misses_total", "Total cache misses", "counter", cache_misses),
            ("active_log_processors", "Number of active processors", "gauge", self.active_processors),
            ("uptime_seconds", "Seconds since process start", "gauge", self.uptime_seconds()),
        ] {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} {kind}");
            let _ = writeln!(out, "{name} {value}");
        }
        self.processing_latency.render(
            &mut out,
            "log_processing_latency_seconds",
            "Processing latency",
        );
        self.query_duration
            .render(&mut out, "query_duration_seconds", "Query duration");
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_snapshot_is_zero() {
        let stats = StatsAggregator::default();
        let snapshot = stats.snapshot();

        assert_eq!(snapshot.total_received, 0);
        assert_eq!(snapshot.total_processed, 0);
        assert_eq!(snapshot.buffer_size, 0);
        assert_eq!(snapshot.cache_hit_rate, 0.0);
        assert_eq!(stats.legacy(), LegacyStats { total_logs: 0 });
    }

    #[test]
    fn test_record_ingest_counts_and_tracks_occupancy() {
        let mut stats = StatsAggregator::default();
        stats.record_ingest(LogLevel::Info, 1);
        stats.record_ingest(LogLevel::Error, 2);
        // a full buffer keeps occupancy flat while received keeps growing
        stats.record_ingest(LogLevel::Info, 2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_received, 3);
        assert_eq!(snapshot.buffer_size, 2);
        assert_eq!(stats.legacy().total_logs, 2);
    }

    #[test]
    fn test_processed_is_distinct_from_received() {
        let mut stats = StatsAggregator::default();
        for n in 1..=5 {
            stats.record_ingest(LogLevel::Debug, n);
        }
        stats.record_processed(3);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_received, 5);
        assert_eq!(snapshot.total_processed, 3);
    }

    #[test]
    fn test_set_buffer_size_is_a_gauge() {
        let mut stats = StatsAggregator::default();
        stats.record_ingest(LogLevel::Info, 5);
        stats.set_buffer_size(3);

        assert_eq!(stats.snapshot().buffer_size, 3);
        assert_eq!(stats.snapshot().total_received, 1);
        assert!(stats.render_prometheus().contains("log_buffer_size 3\n"));
    }

    #[test]
    fn test_hit_rate_simple_ratio() {
        let mut stats = StatsAggregator::new(10);
        stats.record_query(false);
        stats.record_query(true);
        stats.record_query(true);
        stats.record_query(false);

        assert_eq!(stats.cache_hit_rate(), 0.5);
    }

    #[test]
    fn test_hit_rate_window_slides() {
        let mut stats = StatsAggregator::new(2);
        stats.record_query(true);
        stats.record_query(true);
        assert_eq!(stats.cache_hit_rate(), 1.0);

        stats.record_query(false);
        assert_eq!(stats.cache_hit_rate(), 0.5);

        stats.record_query(false);
        assert_eq!(stats.cache_hit_rate(), 0.0);
    }

    #[test]
    fn test_uptime_from_start() {
        // A freshly booted host may not have 90s of monotonic history to go back.
        let Some(started) = Instant::now().checked_sub(Duration::from_secs(90)) else {
            return;
        };
        let stats = StatsAggregator::with_start(started, 10);
        assert!(stats.snapshot().uptime_seconds >= 90);
    }

    #[test]
    fn test_snapshot_json_field_names() {
        let mut stats = StatsAggregator::default();
        stats.record_ingest(LogLevel::Info, 1);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        let mut keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();

        assert_eq!(
            keys,
            vec![
                "buffer_size",
                "cache_hit_rate",
                "total_processed",
                "total_received",
                "uptime_seconds"
            ]
        );
    }

    #[test]
    fn test_render_prometheus() {
        let mut stats = StatsAggregator::default();
        stats.record_ingest(LogLevel::Error, 1);
        stats.record_ingest(LogLevel::Error, 2);
        stats.record_eviction(1);
        stats.record_query(true);
        stats.record_query(false);

        let text = stats.render_prometheus();

        assert!(text.contains("logs_received_total{level=\"ERROR\"} 2\n"));
        assert!(text.contains("logs_received_total{level=\"INFO\"} 0\n"));
        assert!(text.contains("# TYPE log_buffer_size gauge\n"));
        assert!(text.contains("log_buffer_size 2\n"));
        assert!(text.contains("logs_evicted_total 1\n"));
        assert!(text.contains("cache_hits_total 1\n"));
        assert!(text.contains("cache_misses_total 1\n"));
    }

    #[test]
    fn test_uptime_from_recent_start() {
        let stats = StatsAggregator::with_start(Instant::now(), 10);
        assert!(stats.snapshot().uptime_seconds < 5);
    }

    #[test]
    fn test_latency_histogram_buckets() {
        let mut histogram = LatencyHistogram::default();
        histogram.observe(Duration::from_millis(2));
        histogram.observe(Duration::from_millis(30));
        histogram.observe(Duration::from_secs(20));

        assert_eq!(histogram.count(), 3);
        assert!((histogram.sum() - 20.032).abs() < 1e-9);

        let mut out = String::new();
        histogram.render(&mut out, "op_seconds", "Op latency");
        assert!(out.contains("# TYPE op_seconds histogram\n"));
        assert!(out.contains("op_seconds_bucket{le=\"0.005\"} 1\n"));
        assert!(out.contains("op_seconds_bucket{le=\"0.025\"} 1\n"));
        assert!(out.contains("op_seconds_bucket{le=\"0.05\"} 2\n"));
        assert!(out.contains("op_seconds_bucket{le=\"10\"} 2\n"));
        assert!(out.contains("op_seconds_bucket{le=\"+Inf\"} 3\n"));
        assert!(out.contains("op_seconds_count 3\n"));
    }

    #[test]
    fn test_render_latency_and_processor_metrics() {
        let mut stats = StatsAggregator::default();
        stats.observe_ingest_latency(Duration::from_millis(1));
        stats.observe_query_duration(Duration::from_millis(200));
        stats.observe_query_duration(Duration::from_millis(300));
        stats.set_processor_active(true);

        let text = stats.render_prometheus();

        assert!(text.contains("# TYPE log_processing_latency_seconds histogram\n"));
        assert!(text.contains("log_processing_latency_seconds_count 1\n"));
        assert!(text.contains("# TYPE query_duration_seconds histogram\n"));
        assert!(text.contains("query_duration_seconds_bucket{le=\"0.25\"} 1\n"));
        assert!(text.contains("query_duration_seconds_bucket{le=\"0.5\"} 2\n"));
        assert!(text.contains("query_duration_seconds_count 2\n"));
        assert!(text.contains("active_log_processors 1\n"));

        stats.set_processor_active(false);
        stats.set_processor_active(false);
        assert_eq!(stats.active_processors(), 0);
    }
}
