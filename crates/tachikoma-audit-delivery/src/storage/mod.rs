//! The storage contract and its implementations.

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteAuditStore;

use crate::classify::{classify, ErrorClass};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tachikoma_audit_types::{AuditEvent, AuditEventId};
use thiserror::Error;
use tokio::time::Instant;

/// Storage errors, tagged at the source with what went wrong.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage write timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("storage rejected write ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid event{}: {message}", event_id.map(|id| format!(" {}", id)).unwrap_or_default())]
    Validation {
        event_id: Option<AuditEventId>,
        message: String,
    },

    #[error("storage write cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Other(String),
}

impl StorageError {
    /// Shorthand for [`classify`].
    pub fn class(&self) -> ErrorClass {
        classify(self)
    }
}

/// Per-call deadline handed to the storage client.
#[derive(Debug, Clone, Copy)]
pub struct WriteContext {
    deadline: Instant,
}

impl WriteContext {
    /// A context expiring `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Persists batches of audit events.
///
/// Implementations must be safe to call concurrently. A batch either
/// persists as a whole or the call returns an error.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn store_batch(&self, ctx: &WriteContext, events: &[AuditEvent]) -> Result<(), StorageError>;
}

#[async_trait]
impl<T: StorageClient + ?Sized> StorageClient for Arc<T> {
    async fn store_batch(&self, ctx: &WriteContext, events: &[AuditEvent]) -> Result<(), StorageError> {
        (**self).store_batch(ctx, events).await
    }
}
