//! Out-of-band replay of dead-lettered Tachikoma audit events.
//!
//! A [`RetryWorker`] claims due messages from a dead-letter queue, replays
//! each through a storage client and then acknowledges it, reschedules it
//! on the [`RetrySchedule`], or moves it to the dead-letter store once the
//! retry budget is spent.

mod error;
mod metrics;
mod schedule;
mod worker;

pub use error::WorkerError;
pub use metrics::{WorkerMetrics, WorkerMetricsSnapshot};
pub use schedule::RetrySchedule;
pub use worker::{PollSummary, ReplayOutcome, RetryWorker};
