//! Retry metrics
//!
//! Counters written by the retry executor. One instance lives as long as its
//! executor; values only grow until [`RetryMetrics::reset`] is called.

use crate::priority::RequestPriority;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default, Clone)]
struct Counts {
    total_attempts: u64,
    total_successes: u64,
    total_failures: u64,
    total_retries: u64,
    total_rejected: u64,
    total_cancelled: u64,
    backoff_time_total: Duration,
    priority_stats: BTreeMap<RequestPriority, u64>,
}

/// Thread-safe retry counters
#[derive(Debug, Default)]
pub struct RetryMetrics {
    counts: Mutex<Counts>,
}

/// Point-in-time copy of [`RetryMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Calls to `execute`
    pub total_attempts: u64,
    /// Calls that ended in success
    pub total_successes: u64,
    /// Calls that ended in an operation failure or exhaustion
    pub total_failures: u64,
    /// Retries scheduled across all calls
    pub total_retries: u64,
    /// Calls refused by an open circuit
    pub total_rejected: u64,
    /// Calls abandoned through cancellation
    pub total_cancelled: u64,
    /// Accumulated backoff time
    #[serde(rename = "backoff_time_total_ms", serialize_with = "serialize_millis")]
    pub backoff_time_total: Duration,
    /// Calls per priority
    pub priority_stats: BTreeMap<RequestPriority, u64>,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl RetryMetrics {
    /// Create empty metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one `execute` call at the given priority
    pub fn record_attempt(&self, priority: RequestPriority) {
        let mut counts = self.lock();
        counts.total_attempts += 1;
        *counts.priority_stats.entry(priority).or_default() += 1;
    }

    /// Count a successful call
    pub fn record_success(&self) {
        self.lock().total_successes += 1;
    }

    /// Count a failed call
    pub fn record_failure(&self) {
        self.lock().total_failures += 1;
    }

    /// Count a scheduled retry and the backoff it waits
    pub fn record_retry(&self, backoff: Duration) {
        let mut counts = self.lock();
        counts.total_retries += 1;
        counts.backoff_time_total = counts.backoff_time_total.saturating_add(backoff);
    }

    /// Count a call refused by the circuit breaker
    pub fn record_rejected(&self) {
        self.lock().total_rejected += 1;
    }

    /// Count a cancelled call
    pub fn record_cancelled(&self) {
        self.lock().total_cancelled += 1;
    }

    /// Calls to `execute`
    #[must_use]
    pub fn total_attempts(&self) -> u64 {
        self.lock().total_attempts
    }

    /// Successful calls
    #[must_use]
    pub fn total_successes(&self) -> u64 {
        self.lock().total_successes
    }

    /// Failed calls
    #[must_use]
    pub fn total_failures(&self) -> u64 {
        self.lock().total_failures
    }

    /// Retries scheduled
    #[must_use]
    pub fn total_retries(&self) -> u64 {
        self.lock().total_retries
    }

    /// Accumulated backoff time
    #[must_use]
    pub fn backoff_time_total(&self) -> Duration {
        self.lock().backoff_time_total
    }

    /// Calls seen for one priority
    #[must_use]
    pub fn priority_count(&self, priority: RequestPriority) -> u64 {
        self.lock()
            .priority_stats
            .get(&priority)
            .copied()
            .unwrap_or(0)
    }

    /// Take a consistent copy of all counters
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counts = self.lock().clone();
        MetricsSnapshot {
            total_attempts: counts.total_attempts,
            total_successes: counts.total_successes,
            total_failures: counts.total_failures,
            total_retries: counts.total_retries,
            total_rejected: counts.total_rejected,
            total_cancelled: counts.total_cancelled,
            backoff_time_total: counts.backoff_time_total,
            priority_stats: counts.priority_stats,
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        *self.lock() = Counts::default();
    }

    /// Export metrics in Prometheus format
    #[must_use]
    pub fn export_prometheus(&self, prefix: &str) -> String {
        self.snapshot().to_prometheus(prefix)
    }

    fn lock(&self) -> MutexGuard<'_, Counts> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MetricsSnapshot {
    /// Render in Prometheus text format, metric names prefixed with `prefix`
    #[must_use]
    pub fn to_prometheus(&self, prefix: &str) -> String {
        let mut output = String::new();

        let counters = [
            ("attempts_total", self.total_attempts),
            ("successes_total", self.total_successes),
            ("failures_total", self.total_failures),
            ("retries_total", self.total_retries),
            ("rejected_total", self.total_rejected),
            ("cancelled_total", self.total_cancelled),
        ];
        for (name, value) in counters {
            let _ = write!(
                output,
                "# TYPE {prefix}_{name} counter\n{prefix}_{name} {value}\n"
            );
        }

        let _ = write!(
            output,
            "# TYPE {prefix}_backoff_seconds_total counter\n{prefix}_backoff_seconds_total {}\n",
            self.backoff_time_total.as_secs_f64()
        );

        let _ = writeln!(output, "# TYPE {prefix}_priority_attempts_total counter");
        for (priority, count) in &self.priority_stats {
            let _ = writeln!(
                output,
                "{prefix}_priority_attempts_total{{priority=\"{priority}\"}} {count}"
            );
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempts_bucket_by_priority() {
        let metrics = RetryMetrics::new();
        metrics.record_attempt(RequestPriority::High);
        metrics.record_attempt(RequestPriority::High);
        metrics.record_attempt(RequestPriority::Low);

        assert_eq!(metrics.total_attempts(), 3);
        assert_eq!(metrics.priority_count(RequestPriority::High), 2);
        assert_eq!(metrics.priority_count(RequestPriority::Low), 1);
        assert_eq!(metrics.priority_count(RequestPriority::Critical), 0);
    }

    #[test]
    fn test_retry_accumulates_backoff() {
        let metrics = RetryMetrics::new();
        metrics.record_retry(Duration::from_millis(100));
        metrics.record_retry(Duration::from_millis(250));

        assert_eq!(metrics.total_retries(), 2);
        assert_eq!(metrics.backoff_time_total(), Duration::from_millis(350));
    }

    #[test]
    fn test_reset_clears_everything() {
        let metrics = RetryMetrics::new();
        metrics.record_attempt(RequestPriority::Normal);
        metrics.record_success();
        metrics.record_failure();
        metrics.record_rejected();
        metrics.record_retry(Duration::from_secs(1));

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_snapshot_serializes_backoff_in_millis() {
        let metrics = RetryMetrics::new();
        metrics.record_attempt(RequestPriority::Critical);
        metrics.record_retry(Duration::from_millis(1500));

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["backoff_time_total_ms"], 1500);
        assert_eq!(json["priority_stats"]["critical"], 1);
    }

    #[test]
    fn test_export_prometheus() {
        let metrics = RetryMetrics::new();
        metrics.record_attempt(RequestPriority::Normal);
        metrics.record_success();

        let output = metrics.export_prometheus("vulnkb_fetch");
        assert!(output.contains("# TYPE vulnkb_fetch_attempts_total counter"));
        assert!(output.contains("vulnkb_fetch_successes_total 1"));
        assert!(output.contains("vulnkb_fetch_priority_attempts_total{priority=\"normal\"} 1"));
    }
}
