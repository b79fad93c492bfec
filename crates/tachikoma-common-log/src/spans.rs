//! Tracing spans for the audit delivery pipeline.

use tracing::{info_span, Span};

/// Span covering one batch flush, including its in-process retries.
pub fn flush_span(batch_size: usize) -> Span {
    info_span!(
        "audit_flush",
        batch_size,
        attempts = tracing::field::Empty,
        error = tracing::field::Empty
    )
}

/// Span covering the replay of one DLQ message.
pub fn replay_span(message_id: u64, attempt: u32) -> Span {
    info_span!(
        "audit_replay",
        message_id,
        attempt,
        outcome = tracing::field::Empty,
        error = tracing::field::Empty
    )
}

/// Span covering the lifetime of a retry worker.
pub fn worker_span(group: &str, consumer: &str) -> Span {
    info_span!("audit_retry_worker", group = %group, consumer = %consumer)
}

/// Record an error on the current span, if it declares an `error` field.
pub fn record_error(error: &dyn std::error::Error) {
    Span::current().record("error", tracing::field::display(error));
}

/// Re-export of tracing::instrument for convenience.
pub use tracing::instrument;
