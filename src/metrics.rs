//! Process-wide counters exposed by the metrics endpoint

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::task::StreamCounts;

/// Gateway counters
#[derive(Default)]
pub struct Metrics {
    streams_started: AtomicU64,
    uploads_succeeded: AtomicU64,
    uploads_failed: AtomicU64,
    webhook_attempts: AtomicU64,
    webhook_failures: AtomicU64,
    startup_time: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            startup_time: AtomicU64::new(now),
            ..Default::default()
        }
    }

    pub fn stream_started(&self) {
        self.streams_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upload_succeeded(&self) {
        self.uploads_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upload_failed(&self) {
        self.uploads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_attempted(&self) {
        self.webhook_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_failed(&self) {
        self.webhook_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Counter snapshot combined with the registry's stream counts
    pub fn snapshot(&self, streams: StreamCounts) -> MetricsSnapshot {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        MetricsSnapshot {
            streams_started: self.streams_started.load(Ordering::Relaxed),
            active_streams: streams.active,
            idle_streams: streams.idle,
            stopped_streams: streams.stopped,
            uploads_succeeded: self.uploads_succeeded.load(Ordering::Relaxed),
            uploads_failed: self.uploads_failed.load(Ordering::Relaxed),
            webhook_attempts: self.webhook_attempts.load(Ordering::Relaxed),
            webhook_failures: self.webhook_failures.load(Ordering::Relaxed),
            uptime_secs: now.saturating_sub(self.startup_time.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time view of the gateway's counters
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub streams_started: u64,
    pub active_streams: u64,
    pub idle_streams: u64,
    pub stopped_streams: u64,
    pub uploads_succeeded: u64,
    pub uploads_failed: u64,
    pub webhook_attempts: u64,
    pub webhook_failures: u64,
    pub uptime_secs: u64,
}

static GLOBAL_METRICS: OnceLock<Arc<Metrics>> = OnceLock::new();

/// Process-wide metrics instance
pub fn global_metrics() -> Arc<Metrics> {
    GLOBAL_METRICS
        .get_or_init(|| Arc::new(Metrics::new()))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = Metrics::new();
        metrics.stream_started();
        metrics.upload_succeeded();
        metrics.upload_failed();
        metrics.webhook_attempted();

        let snapshot = metrics.snapshot(StreamCounts {
            active: 1,
            idle: 2,
            stopped: 3,
        });

        assert_eq!(snapshot.streams_started, 1);
        assert_eq!(snapshot.uploads_succeeded, 1);
        assert_eq!(snapshot.uploads_failed, 1);
        assert_eq!(snapshot.webhook_attempts, 1);
        assert_eq!(snapshot.active_streams, 1);
        assert_eq!(snapshot.idle_streams, 2);
        assert_eq!(snapshot.stopped_streams, 3);
    }

    #[test]
    fn test_global_metrics_is_shared() {
        let a = global_metrics();
        let b = global_metrics();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
