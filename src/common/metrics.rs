//! Quorum and replica metrics
//!
//! Prometheus-compatible counters for the coordination layer:
//! - Requests by method
//! - Quorum outcomes
//! - Replica failures, timeouts and late events
//! - Worker pool saturation

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::coordinator::quorum::Method;

/// Counter for tracking monotonically increasing totals
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge for tracking current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Global metrics registry
#[derive(Debug)]
pub struct QuorumMetrics {
    pub get_requests: Counter,
    pub put_requests: Counter,
    pub delete_requests: Counter,

    pub quorum_success: Counter,
    pub quorum_failure: Counter,

    pub replica_success: Counter,
    pub replica_failures: Counter,
    pub replica_timeouts: Counter,

    /// Events that arrived after their request was finalized
    pub late_events: Counter,
    /// Events beyond the number of contacted replicas
    pub excess_events: Counter,

    pub rejected_tasks: Counter,
    pub queued_tasks: Gauge,

    start_time: Instant,
}

impl QuorumMetrics {
    pub fn new() -> Self {
        Self {
            get_requests: Counter::new(),
            put_requests: Counter::new(),
            delete_requests: Counter::new(),
            quorum_success: Counter::new(),
            quorum_failure: Counter::new(),
            replica_success: Counter::new(),
            replica_failures: Counter::new(),
            replica_timeouts: Counter::new(),
            late_events: Counter::new(),
            excess_events: Counter::new(),
            rejected_tasks: Counter::new(),
            queued_tasks: Gauge::new(),
            start_time: Instant::now(),
        }
    }

    pub fn record_request(&self, method: Method) {
        match method {
            Method::Get => self.get_requests.inc(),
            Method::Put => self.put_requests.inc(),
            Method::Delete => self.delete_requests.inc(),
        }
    }

    pub fn record_outcome(&self, success: bool) {
        if success {
            self.quorum_success.inc();
        } else {
            self.quorum_failure.inc();
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP shardkv_requests_total Client requests by method\n");
        out.push_str("# TYPE shardkv_requests_total counter\n");
        for (method, counter) in [
            ("get", &self.get_requests),
            ("put", &self.put_requests),
            ("delete", &self.delete_requests),
        ] {
            let _ = writeln!(
                out,
                "shardkv_requests_total{{method=\"{}\"}} {}",
                method,
                counter.get()
            );
        }

        let counters: [(&str, &str, &Counter); 8] = [
            (
                "shardkv_quorum_success_total",
                "Requests that reached quorum",
                &self.quorum_success,
            ),
            (
                "shardkv_quorum_failure_total",
                "Requests that missed quorum",
                &self.quorum_failure,
            ),
            (
                "shardkv_replica_success_total",
                "Successful replica acknowledgments",
                &self.replica_success,
            ),
            (
                "shardkv_replica_failures_total",
                "Replica calls that failed",
                &self.replica_failures,
            ),
            (
                "shardkv_replica_timeouts_total",
                "Replica calls that timed out",
                &self.replica_timeouts,
            ),
            (
                "shardkv_late_events_total",
                "Replica events after finalize",
                &self.late_events,
            ),
            (
                "shardkv_excess_events_total",
                "Replica events beyond the contacted set",
                &self.excess_events,
            ),
            (
                "shardkv_rejected_tasks_total",
                "Replica calls rejected by a saturated pool",
                &self.rejected_tasks,
            ),
        ];
        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, counter.get());
        }

        out.push_str("# HELP shardkv_queued_tasks Replica calls waiting for a worker\n");
        out.push_str("# TYPE shardkv_queued_tasks gauge\n");
        let _ = writeln!(out, "shardkv_queued_tasks {}", self.queued_tasks.get());

        out.push_str("# HELP shardkv_uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE shardkv_uptime_seconds gauge\n");
        let _ = writeln!(out, "shardkv_uptime_seconds {}", self.uptime_seconds());

        out
    }
}

impl Default for QuorumMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<QuorumMetrics> =
    once_cell::sync::Lazy::new(QuorumMetrics::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();

        assert_eq!(counter.get(), 0);
        counter.inc();
        assert_eq!(counter.get(), 1);
        counter.inc();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new();

        assert_eq!(gauge.get(), 0);
        gauge.set(10);
        assert_eq!(gauge.get(), 10);
    }

    #[test]
    fn test_record_request_and_outcome() {
        let registry = QuorumMetrics::new();

        registry.record_request(Method::Get);
        registry.record_request(Method::Put);
        registry.record_request(Method::Put);
        registry.record_outcome(true);
        registry.record_outcome(false);

        assert_eq!(registry.get_requests.get(), 1);
        assert_eq!(registry.put_requests.get(), 2);
        assert_eq!(registry.quorum_success.get(), 1);
        assert_eq!(registry.quorum_failure.get(), 1);
    }

    #[test]
    fn test_prometheus_output() {
        let registry = QuorumMetrics::new();
        registry.record_request(Method::Delete);
        registry.late_events.inc();

        let out = registry.to_prometheus();
        assert!(out.contains("shardkv_requests_total{method=\"delete\"} 1"));
        assert!(out.contains("shardkv_late_events_total 1"));
        assert!(out.contains("# TYPE shardkv_queued_tasks gauge"));
    }
}
