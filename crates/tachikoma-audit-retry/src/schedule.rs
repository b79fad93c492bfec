//! Escalating replay schedule.

use crate::WorkerError;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tachikoma_audit_dlq::chrono_duration;
use tachikoma_common_config::WorkerConfig;

/// Delays between replays of a dead-lettered event.
///
/// The delay after a failed replay is looked up by the number of failures
/// recorded before it, clamped to the last entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl RetrySchedule {
    /// Build a schedule. Entries must be non-zero and non-decreasing.
    pub fn new(delays: Vec<Duration>) -> Result<Self, WorkerError> {
        if delays.is_empty() {
            return Err(WorkerError::InvalidSchedule("schedule is empty".to_string()));
        }
        if delays.iter().any(Duration::is_zero) {
            return Err(WorkerError::InvalidSchedule("schedule contains a zero delay".to_string()));
        }
        if delays.windows(2).any(|w| w[1] < w[0]) {
            return Err(WorkerError::InvalidSchedule("schedule must be non-decreasing".to_string()));
        }
        Ok(Self { delays })
    }

    pub fn from_config(config: &WorkerConfig) -> Result<Self, WorkerError> {
        Self::new(config.schedule())
    }

    /// Delay before the next replay of a message that had failed
    /// `prior_attempts` times before this failure.
    pub fn delay_after(&self, prior_attempts: u32) -> Duration {
        let index = (prior_attempts as usize).min(self.delays.len() - 1);
        self.delays[index]
    }

    /// Next eligible time, measured from `now` or from the current
    /// next-retry time, whichever is later.
    pub fn next_retry_at(
        &self,
        prior_attempts: u32,
        now: DateTime<Utc>,
        current: DateTime<Utc>,
    ) -> DateTime<Utc> {
        now.max(current) + chrono_duration(self.delay_after(prior_attempts))
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            delays: WorkerConfig::default().schedule(),
        }
    }
}
