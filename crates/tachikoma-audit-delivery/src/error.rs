//! Producer-facing errors.

use tachikoma_audit_types::AuditEventId;
use thiserror::Error;

/// Errors returned by [`BufferedStore`](crate::BufferedStore).
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The buffer is at capacity; the event was not accepted.
    #[error("audit buffer full (capacity {capacity}): dropped event {event_id} with correlation id {correlation_id}")]
    BufferFull {
        event_id: AuditEventId,
        correlation_id: String,
        capacity: usize,
    },

    /// The store has been closed.
    #[error("audit store closed: rejected event with correlation id {correlation_id}")]
    Closed { correlation_id: String },

    /// Some accepted or offered events were not delivered anywhere.
    #[error(
        "audit data lost: {dropped} events dropped, {failed_batches} failed batches, {unflushed} events unflushed at shutdown"
    )]
    DataLoss {
        dropped: u64,
        failed_batches: u64,
        unflushed: u64,
    },
}

impl DeliveryError {
    /// Whether this error reports lost data.
    pub fn is_data_loss(&self) -> bool {
        matches!(self, Self::DataLoss { .. })
    }
}
