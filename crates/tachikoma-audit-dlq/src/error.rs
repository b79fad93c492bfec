//! Queue errors.

use crate::MessageId;
use thiserror::Error;

/// Result alias for queue operations.
pub type DlqResult<T> = Result<T, DlqError>;

/// Errors returned by a dead-letter queue.
#[derive(Debug, Error)]
pub enum DlqError {
    #[error("dead-letter queue unavailable: {0}")]
    Unavailable(String),

    #[error("message {0} not found")]
    NotFound(MessageId),

    #[error("stale update for message {id}: stored attempts {stored}, update has {update}")]
    StaleUpdate { id: MessageId, stored: u32, update: u32 },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt queue row: {0}")]
    Corrupt(String),

    #[error("queue task failed: {0}")]
    Task(String),
}

impl DlqError {
    /// Whether the queue itself could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Database(_) | Self::Task(_))
    }
}
