//! Metrics collection and reporting

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Describe every metric this crate emits. Call once after installing a
/// recorder.
pub fn describe_metrics() {
    ::metrics::describe_counter!(
        "modelcast_publishes_total",
        "Artifacts published (artifact and pointer written)"
    );
    ::metrics::describe_counter!(
        "modelcast_publish_failures_total",
        "Publishes that failed before the pointer was updated"
    );
    ::metrics::describe_counter!(
        "modelcast_notify_failures_total",
        "Publishes whose change notification could not be broadcast"
    );
    ::metrics::describe_histogram!(
        "modelcast_publish_duration_us",
        ::metrics::Unit::Microseconds,
        "Time spent in the three publish steps"
    );
    ::metrics::describe_counter!(
        "modelcast_activations_total",
        "Versions activated by the loader"
    );
    ::metrics::describe_counter!(
        "modelcast_duplicates_ignored_total",
        "Notifications for the already active version"
    );
    ::metrics::describe_counter!(
        "modelcast_decode_failures_total",
        "Fetched records that could not be decoded"
    );
    ::metrics::describe_counter!(
        "modelcast_handler_rejections_total",
        "Artifacts the consumer refused to activate"
    );
    ::metrics::describe_counter!(
        "modelcast_read_retries_total",
        "Store reads retried after a transient failure"
    );
    ::metrics::describe_counter!(
        "modelcast_resubscriptions_total",
        "Notification channel subscriptions re-established"
    );
    ::metrics::describe_gauge!(
        "modelcast_active_model",
        "1 for the version currently active in this process"
    );
}

/// Protocol metrics collector
#[derive(Clone, Default)]
pub struct ProtocolMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    publishes: AtomicU64,
    publish_failures: AtomicU64,
    notify_failures: AtomicU64,
    activations: AtomicU64,
    duplicates_ignored: AtomicU64,
    decode_failures: AtomicU64,
    handler_rejections: AtomicU64,
    read_retries: AtomicU64,
    resubscriptions: AtomicU64,
    active_version: Mutex<Option<String>>,
}

impl ProtocolMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a publish whose artifact and pointer writes succeeded
    pub fn record_publish(&self, duration_us: u64) {
        self.inner.publishes.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("modelcast_publishes_total").increment(1);
        ::metrics::histogram!("modelcast_publish_duration_us").record(duration_us as f64);
    }

    /// Record a publish that failed in one of the write steps
    pub fn record_publish_failure(&self) {
        self.inner.publish_failures.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("modelcast_publish_failures_total").increment(1);
    }

    /// Record a lost change notification
    pub fn record_notify_failure(&self) {
        self.inner.notify_failures.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("modelcast_notify_failures_total").increment(1);
    }

    /// Record an activation and move the active-model gauge to `version_id`
    pub fn record_activation(&self, version_id: &str) {
        self.inner.activations.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("modelcast_activations_total").increment(1);

        let mut active = self.inner.active_version.lock();
        if let Some(previous) = active.take() {
            ::metrics::gauge!("modelcast_active_model", "version_id" => previous).set(0.0);
        }
        ::metrics::gauge!("modelcast_active_model", "version_id" => version_id.to_string()).set(1.0);
        *active = Some(version_id.to_string());
    }

    /// Record a notification for the version that was already active
    pub fn record_duplicate(&self) {
        self.inner.duplicates_ignored.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("modelcast_duplicates_ignored_total").increment(1);
    }

    /// Record a record that failed to decode
    pub fn record_decode_failure(&self) {
        self.inner.decode_failures.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("modelcast_decode_failures_total").increment(1);
    }

    /// Record an artifact the consumer refused
    pub fn record_handler_rejection(&self) {
        self.inner.handler_rejections.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("modelcast_handler_rejections_total").increment(1);
    }

    /// Record a retried read
    pub fn record_read_retry(&self) {
        self.inner.read_retries.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("modelcast_read_retries_total").increment(1);
    }

    /// Record a re-established subscription
    pub fn record_resubscription(&self) {
        self.inner.resubscriptions.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!("modelcast_resubscriptions_total").increment(1);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            publishes: self.inner.publishes.load(Ordering::Relaxed),
            publish_failures: self.inner.publish_failures.load(Ordering::Relaxed),
            notify_failures: self.inner.notify_failures.load(Ordering::Relaxed),
            activations: self.inner.activations.load(Ordering::Relaxed),
            duplicates_ignored: self.inner.duplicates_ignored.load(Ordering::Relaxed),
            decode_failures: self.inner.decode_failures.load(Ordering::Relaxed),
            handler_rejections: self.inner.handler_rejections.load(Ordering::Relaxed),
            read_retries: self.inner.read_retries.load(Ordering::Relaxed),
            resubscriptions: self.inner.resubscriptions.load(Ordering::Relaxed),
            active_version: self.inner.active_version.lock().clone(),
        }
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub publishes: u64,
    pub publish_failures: u64,
    pub notify_failures: u64,
    pub activations: u64,
    pub duplicates_ignored: u64,
    pub decode_failures: u64,
    pub handler_rejections: u64,
    pub read_retries: u64,
    pub resubscriptions: u64,
    pub active_version: Option<String>,
}

impl MetricsSnapshot {
    /// Fraction of publishes whose notification was lost
    pub fn notify_failure_rate(&self) -> f64 {
        if self.publishes == 0 {
            0.0
        } else {
            self.notify_failures as f64 / self.publishes as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collection() {
        let metrics = ProtocolMetrics::new();

        metrics.record_publish(120);
        metrics.record_publish(80);
        metrics.record_notify_failure();
        metrics.record_activation("v1");
        metrics.record_activation("v2");
        metrics.record_duplicate();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.publishes, 2);
        assert_eq!(snapshot.notify_failures, 1);
        assert_eq!(snapshot.activations, 2);
        assert_eq!(snapshot.duplicates_ignored, 1);
        assert_eq!(snapshot.active_version.as_deref(), Some("v2"));
        assert_eq!(snapshot.notify_failure_rate(), 0.5);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = ProtocolMetrics::new();
        let clone = metrics.clone();

        clone.record_decode_failure();
        assert_eq!(metrics.snapshot().decode_failures, 1);
    }
}
