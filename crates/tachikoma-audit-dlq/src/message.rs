//! Queue message types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tachikoma_audit_types::AuditEvent;

/// Identifier assigned to a message at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event awaiting redelivery, with its retry bookkeeping.
///
/// The event itself is never modified. Only [`DlqMessage::record_failure`]
/// changes the bookkeeping, and only the retry worker calls it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqMessage {
    id: MessageId,
    event: AuditEvent,
    enqueued_at: DateTime<Utc>,
    attempts: u32,
    last_error: String,
    next_retry_at: DateTime<Utc>,
}

impl DlqMessage {
    /// A freshly enqueued message: zero attempts, eligible immediately.
    pub(crate) fn new(id: MessageId, event: AuditEvent, cause: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            event,
            enqueued_at: now,
            attempts: 0,
            last_error: cause.to_string(),
            next_retry_at: now,
        }
    }

    pub(crate) fn restore(
        id: MessageId,
        event: AuditEvent,
        enqueued_at: DateTime<Utc>,
        attempts: u32,
        last_error: String,
        next_retry_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event,
            enqueued_at,
            attempts,
            last_error,
            next_retry_at,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn event(&self) -> &AuditEvent {
        &self.event
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Failed replay attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Most recent failure, or the enqueue cause before any replay.
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    /// Earliest time the message may be claimed.
    pub fn next_retry_at(&self) -> DateTime<Utc> {
        self.next_retry_at
    }

    /// Record a failed replay and push the next retry out.
    ///
    /// `next_retry_at` must be later than the current value; an earlier
    /// instant is bumped to one millisecond past it so the sequence stays
    /// strictly increasing.
    pub fn record_failure(&mut self, error: impl Into<String>, next_retry_at: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = error.into();
        self.next_retry_at = if next_retry_at > self.next_retry_at {
            next_retry_at
        } else {
            self.next_retry_at + chrono::Duration::milliseconds(1)
        };
    }

    pub(crate) fn into_dead_letter(self, dead_lettered_at: DateTime<Utc>) -> DeadLetterRecord {
        DeadLetterRecord {
            message_id: self.id,
            event: self.event,
            enqueued_at: self.enqueued_at,
            attempts: self.attempts,
            last_error: self.last_error,
            dead_lettered_at,
        }
    }
}

/// A message that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub message_id: MessageId,
    pub event: AuditEvent,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: String,
    pub dead_lettered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tachikoma_audit_types::AuditCategory;

    fn message() -> DlqMessage {
        let event = AuditEvent::builder(AuditCategory::System, "startup").build();
        DlqMessage::new(MessageId(1), event, "store unavailable", Utc::now())
    }

    #[test]
    fn test_new_message_is_immediately_eligible() {
        let msg = message();
        assert_eq!(msg.attempts(), 0);
        assert_eq!(msg.next_retry_at(), msg.enqueued_at());
        assert_eq!(msg.last_error(), "store unavailable");
    }

    #[test]
    fn test_record_failure_increments_and_moves_forward() {
        let mut msg = message();
        let later = msg.next_retry_at() + chrono::Duration::minutes(1);

        msg.record_failure("timeout", later);
        assert_eq!(msg.attempts(), 1);
        assert_eq!(msg.last_error(), "timeout");
        assert_eq!(msg.next_retry_at(), later);
    }

    #[test]
    fn test_record_failure_never_moves_backwards() {
        let mut msg = message();
        let before = msg.next_retry_at();

        msg.record_failure("timeout", before - chrono::Duration::minutes(5));
        assert!(msg.next_retry_at() > before);
    }

    #[test]
    fn test_dead_letter_keeps_history() {
        let mut msg = message();
        msg.record_failure("rejected", msg.next_retry_at() + chrono::Duration::hours(1));
        let now = Utc::now();

        let record = msg.clone().into_dead_letter(now);
        assert_eq!(record.message_id, msg.id());
        assert_eq!(record.attempts, 1);
        assert_eq!(record.last_error, "rejected");
        assert_eq!(&record.event, msg.event());
        assert_eq!(record.dead_lettered_at, now);
    }
}
