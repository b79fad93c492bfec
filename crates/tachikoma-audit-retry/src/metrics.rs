//! Worker counters.

use serde::Serialize;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct WorkerMetrics {
    claimed: AtomicU64,
    acked: AtomicU64,
    rescheduled: AtomicU64,
    dead_lettered: AtomicU64,
    replay_failures: AtomicU64,
    queue_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerMetricsSnapshot {
    pub claimed: u64,
    pub acked: u64,
    pub rescheduled: u64,
    pub dead_lettered: u64,
    pub replay_failures: u64,
    pub queue_errors: u64,
}

impl WorkerMetrics {
    pub(crate) fn add_claimed(&self, n: usize) {
        self.claimed.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rescheduled(&self) {
        self.rescheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn replay_failed(&self) {
        self.replay_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn queue_error(&self) {
        self.queue_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerMetricsSnapshot {
        WorkerMetricsSnapshot {
            claimed: self.claimed.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            rescheduled: self.rescheduled.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            replay_failures: self.replay_failures.load(Ordering::Relaxed),
            queue_errors: self.queue_errors.load(Ordering::Relaxed),
        }
    }
}

impl WorkerMetricsSnapshot {
    /// Render in Prometheus text format.
    pub fn render_prometheus(&self) -> String {
        let counters = [
            ("audit_dlq_claimed_total", self.claimed),
            ("audit_dlq_acked_total", self.acked),
            ("audit_dlq_rescheduled_total", self.rescheduled),
            ("audit_dlq_dead_lettered_total", self.dead_lettered),
            ("audit_dlq_replay_failures_total", self.replay_failures),
            ("audit_dlq_queue_errors_total", self.queue_errors),
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
    fn test_counters_and_rendering() {
        let metrics = WorkerMetrics::default();
        metrics.add_claimed(3);
        metrics.acked();
        metrics.replay_failed();
        metrics.dead_lettered();

        let snap = metrics.snapshot();
        assert_eq!(snap.claimed, 3);
        assert_eq!(snap.acked, 1);
        assert_eq!(snap.rescheduled, 0);

        let text = snap.render_prometheus();
        assert!(text.contains("# TYPE audit_dlq_claimed_total counter\naudit_dlq_claimed_total 3\n"));
        assert!(text.contains("audit_dlq_dead_lettered_total 1\n"));
    }
}
