//! The dead-letter queue contract.

use crate::{DeadLetterRecord, DlqMessage, DlqResult, MessageId};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tachikoma_audit_types::AuditEvent;
use tachikoma_common_config::DlqConfig;

/// Tuning shared by queue implementations.
#[derive(Debug, Clone)]
pub struct DlqSettings {
    /// Maximum messages claimed per read.
    pub read_batch_size: usize,
    /// Age after which an unacknowledged claim lapses.
    pub claim_timeout: Duration,
    /// How often a blocked read re-checks for eligible messages.
    pub poll_interval: Duration,
}

impl Default for DlqSettings {
    fn default() -> Self {
        Self::from_config(&DlqConfig::default())
    }
}

impl DlqSettings {
    pub fn from_config(config: &DlqConfig) -> Self {
        Self {
            read_batch_size: config.read_batch_size.max(1),
            claim_timeout: config.claim_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// A durable queue of undeliverable audit events.
///
/// Within a consumer group each message is claimed by at most one consumer
/// at a time. A message leaves the queue only through
/// [`ack_message`](Self::ack_message) or
/// [`move_to_dead_letter`](Self::move_to_dead_letter); anything claimed but
/// never resolved becomes eligible again once its claim lapses.
#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    /// Append one event with the failure that sent it here.
    async fn enqueue(&self, event: AuditEvent, cause: &str) -> DlqResult<MessageId>;

    /// Claim up to a batch of messages whose retry time has passed.
    ///
    /// Blocks up to `max_wait` when nothing is eligible and returns an empty
    /// batch if nothing becomes eligible in time.
    async fn read_messages(
        &self,
        group: &str,
        consumer: &str,
        max_wait: Duration,
    ) -> DlqResult<Vec<DlqMessage>>;

    /// Remove a delivered message from the queue.
    async fn ack_message(&self, group: &str, id: MessageId) -> DlqResult<()>;

    /// Persist updated bookkeeping and release the claim.
    ///
    /// Rejects an update carrying fewer attempts than the stored message.
    async fn reschedule(&self, message: &DlqMessage) -> DlqResult<()>;

    /// Move a message to the terminal dead-letter store.
    ///
    /// Fails with `NotFound` if the message already left the queue, so each
    /// message is dead-lettered at most once.
    async fn move_to_dead_letter(&self, message: &DlqMessage) -> DlqResult<()>;

    /// Number of messages still awaiting redelivery.
    async fn pending_len(&self) -> DlqResult<usize>;

    /// Most recent dead letters, newest first.
    async fn dead_letters(&self, limit: usize) -> DlqResult<Vec<DeadLetterRecord>>;
}

#[async_trait]
impl<T: DeadLetterQueue + ?Sized> DeadLetterQueue for Arc<T> {
    async fn enqueue(&self, event: AuditEvent, cause: &str) -> DlqResult<MessageId> {
        (**self).enqueue(event, cause).await
    }

    async fn read_messages(
        &self,
        group: &str,
        consumer: &str,
        max_wait: Duration,
    ) -> DlqResult<Vec<DlqMessage>> {
        (**self).read_messages(group, consumer, max_wait).await
    }

    async fn ack_message(&self, group: &str, id: MessageId) -> DlqResult<()> {
        (**self).ack_message(group, id).await
    }

    async fn reschedule(&self, message: &DlqMessage) -> DlqResult<()> {
        (**self).reschedule(message).await
    }

    async fn move_to_dead_letter(&self, message: &DlqMessage) -> DlqResult<()> {
        (**self).move_to_dead_letter(message).await
    }

    async fn pending_len(&self) -> DlqResult<usize> {
        (**self).pending_len().await
    }

    async fn dead_letters(&self, limit: usize) -> DlqResult<Vec<DeadLetterRecord>> {
        (**self).dead_letters(limit).await
    }
}
