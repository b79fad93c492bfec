//! Worker errors.

use tachikoma_audit_dlq::DlqError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid retry schedule: {0}")]
    InvalidSchedule(String),

    #[error("dead-letter queue error: {0}")]
    Dlq(#[from] DlqError),
}
