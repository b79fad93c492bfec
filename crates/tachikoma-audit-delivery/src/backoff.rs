//! Delay between in-process write attempts.

use std::time::Duration;
use tachikoma_common_config::{BackoffFormula, RetryConfig};

/// Backoff applied by the flusher between attempts on one batch.
#[derive(Debug, Clone)]
pub struct InProcessBackoff {
    formula: BackoffFormula,
    base: Duration,
    max: Duration,
}

impl InProcessBackoff {
    pub fn new(formula: BackoffFormula, base: Duration, max: Duration) -> Self {
        Self { formula, base, max }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.backoff,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Delay after the `attempt`-th failed attempt (1-based), capped at the maximum.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let factor: u32 = match self.formula {
            BackoffFormula::Quadratic => attempt.saturating_mul(attempt),
            BackoffFormula::Exponential => 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX),
            BackoffFormula::Fixed => 1,
        };
        self.base.saturating_mul(factor).min(self.max)
    }
}
