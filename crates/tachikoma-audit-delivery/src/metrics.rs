//! Delivery counters.

use serde::Serialize;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters owned by one [`BufferedStore`](crate::BufferedStore).
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    events_accepted: AtomicU64,
    events_dropped: AtomicU64,
    batches_written: AtomicU64,
    events_written: AtomicU64,
    write_retries: AtomicU64,
    batches_dead_lettered: AtomicU64,
    events_dead_lettered: AtomicU64,
    batches_failed: AtomicU64,
    events_lost: AtomicU64,
}

/// Point-in-time copy of [`DeliveryMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_accepted: u64,
    pub events_dropped: u64,
    pub batches_written: u64,
    pub events_written: u64,
    pub write_retries: u64,
    /// Batches handed to the dead-letter queue.
    pub batches_dead_lettered: u64,
    pub events_dead_lettered: u64,
    /// Batches neither written nor handed to the dead-letter queue.
    pub batches_failed: u64,
    pub events_lost: u64,
}

impl DeliveryMetrics {
    pub(crate) fn event_accepted(&self) {
        self.events_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn batch_written(&self, events: usize) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.events_written.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub(crate) fn write_retried(&self) {
        self.write_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn batch_dead_lettered(&self, events: usize) {
        self.batches_dead_lettered.fetch_add(1, Ordering::Relaxed);
        self.events_dead_lettered.fetch_add(events as u64, Ordering::Relaxed);
    }

    /// A batch that could not be fully handed to the dead-letter queue.
    pub(crate) fn batch_failed(&self, events_lost: usize, events_salvaged: usize) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.events_lost.fetch_add(events_lost as u64, Ordering::Relaxed);
        self.events_dead_lettered
            .fetch_add(events_salvaged as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            events_written: self.events_written.load(Ordering::Relaxed),
            write_retries: self.write_retries.load(Ordering::Relaxed),
            batches_dead_lettered: self.batches_dead_lettered.load(Ordering::Relaxed),
            events_dead_lettered: self.events_dead_lettered.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            events_lost: self.events_lost.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Render in Prometheus text format.
    pub fn render_prometheus(&self) -> String {
        let counters = [
            ("audit_events_accepted_total", self.events_accepted),
            ("audit_events_dropped_total", self.events_dropped),
            ("audit_batches_written_total", self.batches_written),
            ("audit_events_written_total", self.events_written),
            ("audit_write_retries_total", self.write_retries),
            ("audit_batches_dead_lettered_total", self.batches_dead_lettered),
            ("audit_events_dead_lettered_total", self.events_dead_lettered),
            ("audit_batches_failed_total", self.batches_failed),
            ("audit_events_lost_total", self.events_lost),
        ];

        let mut output = String::new();
        for (name, value) in counters {
            let _ = write!(output, "# TYPE {} counter\n{} {}\n", name, name, value);
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_updates() {
        let metrics = DeliveryMetrics::default();
        metrics.event_accepted();
        metrics.event_accepted();
        metrics.event_dropped();
        metrics.batch_written(2);
        metrics.batch_failed(7, 3);

        let snap = metrics.snapshot();
        assert_eq!(snap.events_accepted, 2);
        assert_eq!(snap.events_dropped, 1);
        assert_eq!(snap.batches_written, 1);
        assert_eq!(snap.events_written, 2);
        assert_eq!(snap.batches_failed, 1);
        assert_eq!(snap.events_lost, 7);
        assert_eq!(snap.events_dead_lettered, 3);
        assert_eq!(snap.batches_dead_lettered, 0);
    }

    #[test]
    fn test_prometheus_rendering() {
        let metrics = DeliveryMetrics::default();
        metrics.event_dropped();

        let text = metrics.snapshot().render_prometheus();
        assert!(text.contains("# TYPE audit_events_dropped_total counter\naudit_events_dropped_total 1\n"));
        assert!(text.contains("audit_batches_failed_total 0\n"));
    }
}
