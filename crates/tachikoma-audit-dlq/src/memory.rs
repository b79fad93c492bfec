//! In-process dead-letter queue.

use crate::clock::chrono_duration;
use crate::{
    Clock, DeadLetterQueue, DeadLetterRecord, DlqError, DlqMessage, DlqResult, DlqSettings,
    MessageId, SystemClock,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tachikoma_audit_types::AuditEvent;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

struct Claim {
    consumer: String,
    claimed_at: DateTime<Utc>,
}

#[derive(Default)]
struct QueueState {
    next_id: u64,
    messages: BTreeMap<MessageId, DlqMessage>,
    claims: HashMap<(String, MessageId), Claim>,
    dead_letters: Vec<DeadLetterRecord>,
}

impl QueueState {
    fn release(&mut self, id: MessageId) {
        self.claims.retain(|(_, claimed), _| *claimed != id);
    }
}

/// A dead-letter queue held in memory.
///
/// Messages do not survive the process. Availability can be toggled to
/// exercise the paths taken when the queue cannot be reached.
pub struct MemoryDeadLetterQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    available: AtomicBool,
    clock: Arc<dyn Clock>,
    settings: DlqSettings,
}

impl MemoryDeadLetterQueue {
    pub fn new(clock: Arc<dyn Clock>, settings: DlqSettings) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            available: AtomicBool::new(true),
            clock,
            settings,
        }
    }

    /// Mark the queue reachable or unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> DlqResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DlqError::Unavailable("memory queue marked unavailable".to_string()))
        }
    }

    fn claim(&self, group: &str, consumer: &str) -> Vec<DlqMessage> {
        let now = self.clock.now();
        let timeout = chrono_duration(self.settings.claim_timeout);
        let mut state = self.state.lock();
        let QueueState {
            messages, claims, ..
        } = &mut *state;

        claims.retain(|(g, id), claim| {
            let live = claim.claimed_at + timeout > now;
            if !live {
                debug!(group = %g, message_id = id.0, consumer = %claim.consumer, "Claim lapsed");
            }
            live
        });

        let mut eligible: Vec<&DlqMessage> = messages
            .values()
            .filter(|m| m.next_retry_at() <= now)
            .filter(|m| !claims.contains_key(&(group.to_string(), m.id())))
            .collect();
        eligible.sort_by_key(|m| (m.next_retry_at(), m.id()));
        eligible.truncate(self.settings.read_batch_size);

        let batch: Vec<DlqMessage> = eligible.into_iter().cloned().collect();
        for message in &batch {
            claims.insert(
                (group.to_string(), message.id()),
                Claim {
                    consumer: consumer.to_string(),
                    claimed_at: now,
                },
            );
        }
        batch
    }
}

impl Default for MemoryDeadLetterQueue {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), DlqSettings::default())
    }
}

#[async_trait]
impl DeadLetterQueue for MemoryDeadLetterQueue {
    async fn enqueue(&self, event: AuditEvent, cause: &str) -> DlqResult<MessageId> {
        self.ensure_available()?;

        let id = {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = MessageId(state.next_id);
            let message = DlqMessage::new(id, event, cause, self.clock.now());
            state.messages.insert(id, message);
            id
        };

        self.notify.notify_waiters();
        Ok(id)
    }

    async fn read_messages(
        &self,
        group: &str,
        consumer: &str,
        max_wait: Duration,
    ) -> DlqResult<Vec<DlqMessage>> {
        let deadline = Instant::now() + max_wait;

        loop {
            // Registered before the check so an enqueue in between still wakes us.
            let notified = self.notify.notified();

            self.ensure_available()?;
            let batch = self.claim(group, consumer);
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }

            let wake = (Instant::now() + self.settings.poll_interval).min(deadline);
            let _ = tokio::time::timeout_at(wake, notified).await;
        }
    }

    async fn ack_message(&self, _group: &str, id: MessageId) -> DlqResult<()> {
        self.ensure_available()?;

        let mut state = self.state.lock();
        state.messages.remove(&id).ok_or(DlqError::NotFound(id))?;
        state.release(id);
        Ok(())
    }

    async fn reschedule(&self, message: &DlqMessage) -> DlqResult<()> {
        self.ensure_available()?;

        {
            let mut state = self.state.lock();
            let stored = state
                .messages
                .get_mut(&message.id())
                .ok_or(DlqError::NotFound(message.id()))?;
            if message.attempts() < stored.attempts() {
                return Err(DlqError::StaleUpdate {
                    id: message.id(),
                    stored: stored.attempts(),
                    update: message.attempts(),
                });
            }
            *stored = message.clone();
            state.release(message.id());
        }

        self.notify.notify_waiters();
        Ok(())
    }

    async fn move_to_dead_letter(&self, message: &DlqMessage) -> DlqResult<()> {
        self.ensure_available()?;

        let mut state = self.state.lock();
        state
            .messages
            .remove(&message.id())
            .ok_or(DlqError::NotFound(message.id()))?;
        state.release(message.id());
        let record = message.clone().into_dead_letter(self.clock.now());
        state.dead_letters.push(record);
        Ok(())
    }

    async fn pending_len(&self) -> DlqResult<usize> {
        self.ensure_available()?;
        Ok(self.state.lock().messages.len())
    }

    async fn dead_letters(&self, limit: usize) -> DlqResult<Vec<DeadLetterRecord>> {
        self.ensure_available()?;
        let state = self.state.lock();
        Ok(state.dead_letters.iter().rev().take(limit).cloned().collect())
    }
}
