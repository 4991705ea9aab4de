// SPDX-License-Identifier: MIT
//
// FinLink: Financial Message Gateway
//
// https://github.com/finlink/finlink

//! Metrics collection and reporting

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Connector metrics collector
#[derive(Clone)]
pub struct GatewayMetrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    start_time: Instant,

    // Inbound
    fetched_total: AtomicU64,
    fetch_failures: AtomicU64,
    bytes_in: AtomicU64,

    // Outbound
    published_total: AtomicU64,
    publish_failures: AtomicU64,
    bytes_out: AtomicU64,

    // Delivery pipeline
    auth_failures: AtomicU64,
    retries_total: AtomicU64,
    aborts_total: AtomicU64,
    commits_total: AtomicU64,

    // Mediator latency tracking (microseconds)
    mediator_latencies: RwLock<Vec<u64>>,
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                start_time: Instant::now(),
                fetched_total: AtomicU64::new(0),
                fetch_failures: AtomicU64::new(0),
                bytes_in: AtomicU64::new(0),
                published_total: AtomicU64::new(0),
                publish_failures: AtomicU64::new(0),
                bytes_out: AtomicU64::new(0),
                auth_failures: AtomicU64::new(0),
                retries_total: AtomicU64::new(0),
                aborts_total: AtomicU64::new(0),
                commits_total: AtomicU64::new(0),
                mediator_latencies: RwLock::new(Vec::with_capacity(10000)),
            }),
        }
    }

    // Inbound metrics
    pub fn record_fetch(&self, bytes: usize, latency_micros: u64) {
        self.inner.fetched_total.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);

        let mut latencies = self.inner.mediator_latencies.write();
        latencies.push(latency_micros);
        if latencies.len() > 10000 {
            latencies.drain(0..5000);
        }
    }

    pub fn record_fetch_failure(&self) {
        self.inner.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fetched_total(&self) -> u64 {
        self.inner.fetched_total.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self) -> u64 {
        self.inner.fetch_failures.load(Ordering::Relaxed)
    }

    pub fn bytes_in(&self) -> u64 {
        self.inner.bytes_in.load(Ordering::Relaxed)
    }

    // Outbound metrics
    pub fn record_publish(&self, bytes: usize) {
        self.inner.published_total.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.inner.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn published_total(&self) -> u64 {
        self.inner.published_total.load(Ordering::Relaxed)
    }

    // Pipeline metrics
    pub fn record_auth_failure(&self) {
        self.inner.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.inner.retries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort(&self) {
        self.inner.aborts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self) {
        self.inner.commits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_failures(&self) -> u64 {
        self.inner.auth_failures.load(Ordering::Relaxed)
    }

    pub fn retries_total(&self) -> u64 {
        self.inner.retries_total.load(Ordering::Relaxed)
    }

    pub fn aborts_total(&self) -> u64 {
        self.inner.aborts_total.load(Ordering::Relaxed)
    }

    pub fn commits_total(&self) -> u64 {
        self.inner.commits_total.load(Ordering::Relaxed)
    }

    // Derived metrics
    pub fn uptime_seconds(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }

    pub fn latency_percentile(&self, percentile: f64) -> Option<u64> {
        let latencies = self.inner.mediator_latencies.read();
        if latencies.is_empty() {
            return None;
        }

        let mut sorted = latencies.clone();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64 * percentile).ceil() as usize).min(sorted.len() - 1);
        Some(sorted[index])
    }

    pub fn latency_p50(&self) -> Option<u64> {
        self.latency_percentile(0.50)
    }

    pub fn latency_p99(&self) -> Option<u64> {
        self.latency_percentile(0.99)
    }

    /// Generate Prometheus-compatible metrics output
    pub fn prometheus_format(&self) -> String {
        let mut output = String::new();

        let counters = [
            ("finlink_fetched_total", "Messages fetched", self.fetched_total()),
            ("finlink_fetch_failures", "Failed fetches", self.fetch_failures()),
            ("finlink_published_total", "Messages published", self.published_total()),
            (
                "finlink_publish_failures",
                "Failed publishes",
                self.inner.publish_failures.load(Ordering::Relaxed),
            ),
            ("finlink_auth_failures", "Authentication failures", self.auth_failures()),
            ("finlink_retries_total", "Delivery retries", self.retries_total()),
            ("finlink_aborts_total", "Rejected deliveries", self.aborts_total()),
            ("finlink_commits_total", "Committed deliveries", self.commits_total()),
            ("finlink_bytes_in", "Inbound bytes", self.bytes_in()),
            (
                "finlink_bytes_out",
                "Outbound bytes",
                self.inner.bytes_out.load(Ordering::Relaxed),
            ),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, value));
        }

        output.push_str("# HELP finlink_uptime_seconds Connector uptime in seconds\n");
        output.push_str("# TYPE finlink_uptime_seconds gauge\n");
        output.push_str(&format!("finlink_uptime_seconds {}\n", self.uptime_seconds()));

        if let Some(p50) = self.latency_p50() {
            output.push_str("# HELP finlink_mediator_p50_microseconds Mediator latency 50th percentile\n");
            output.push_str("# TYPE finlink_mediator_p50_microseconds gauge\n");
            output.push_str(&format!("finlink_mediator_p50_microseconds {}\n", p50));
        }

        if let Some(p99) = self.latency_p99() {
            output.push_str("# HELP finlink_mediator_p99_microseconds Mediator latency 99th percentile\n");
            output.push_str("# TYPE finlink_mediator_p99_microseconds gauge\n");
            output.push_str(&format!("finlink_mediator_p99_microseconds {}\n", p99));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = GatewayMetrics::new();

        metrics.record_fetch(1024, 100);
        metrics.record_fetch(2048, 200);
        metrics.record_auth_failure();
        metrics.record_retry();
        metrics.record_commit();

        assert_eq!(metrics.fetched_total(), 2);
        assert_eq!(metrics.bytes_in(), 3072);
        assert_eq!(metrics.auth_failures(), 1);
        assert_eq!(metrics.retries_total(), 1);
        assert_eq!(metrics.commits_total(), 1);
    }

    #[test]
    fn test_latency_percentiles() {
        let metrics = GatewayMetrics::new();

        for i in 1..=100 {
            metrics.record_fetch(100, i);
        }

        let p50 = metrics.latency_p50().unwrap();
        assert!((45..=55).contains(&p50));

        let p99 = metrics.latency_p99().unwrap();
        assert!((95..=100).contains(&p99));
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = GatewayMetrics::new();
        metrics.record_fetch(10, 5);
        let output = metrics.prometheus_format();
        assert!(output.contains("finlink_fetched_total 1"));
        assert!(output.contains("# TYPE finlink_auth_failures counter"));
    }
}
