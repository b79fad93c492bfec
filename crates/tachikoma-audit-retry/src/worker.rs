//! The replay loop.

use crate::metrics::{WorkerMetrics, WorkerMetricsSnapshot};
use crate::{RetrySchedule, WorkerError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tachikoma_audit_delivery::{classify, ErrorClass, StorageClient, StorageError, WriteContext};
use tachikoma_audit_dlq::{Clock, DeadLetterQueue, DlqError, DlqMessage};
use tachikoma_common_async::{with_timeout, ShutdownSignal};
use tachikoma_common_config::WorkerConfig;
use tachikoma_common_log::spans::{record_error, replay_span, worker_span};
use tracing::{debug, error, info, warn, Instrument};

/// What happened to one claimed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayOutcome {
    /// Written to storage and removed from the queue.
    Acked,
    /// Failed again; back in the queue with a later retry time.
    Rescheduled,
    /// Retry budget spent; moved to the dead-letter store.
    DeadLettered,
    /// The queue refused the follow-up; the claim will lapse and the
    /// message will be redelivered.
    Abandoned,
}

/// Totals for one read-and-replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub claimed: usize,
    pub acked: usize,
    pub rescheduled: usize,
    pub dead_lettered: usize,
    pub abandoned: usize,
}

impl PollSummary {
    fn record(&mut self, outcome: ReplayOutcome) {
        match outcome {
            ReplayOutcome::Acked => self.acked += 1,
            ReplayOutcome::Rescheduled => self.rescheduled += 1,
            ReplayOutcome::DeadLettered => self.dead_lettered += 1,
            ReplayOutcome::Abandoned => self.abandoned += 1,
        }
    }
}

/// Replays dead-lettered events into storage.
///
/// Replicas sharing a consumer group split the queue between them; each
/// message is held by one replica at a time.
pub struct RetryWorker {
    dlq: Arc<dyn DeadLetterQueue>,
    storage: Arc<dyn StorageClient>,
    clock: Arc<dyn Clock>,
    schedule: RetrySchedule,
    group: String,
    consumer: String,
    max_attempts: u32,
    read_wait: Duration,
    replay_timeout: Duration,
    error_backoff: Duration,
    dead_letter_on_permanent: bool,
    metrics: WorkerMetrics,
}

impl RetryWorker {
    pub fn new(
        config: &WorkerConfig,
        dlq: Arc<dyn DeadLetterQueue>,
        storage: Arc<dyn StorageClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, WorkerError> {
        Ok(Self {
            dlq,
            storage,
            clock,
            schedule: RetrySchedule::from_config(config)?,
            group: config.consumer_group.clone(),
            consumer: config.resolved_consumer_name(),
            max_attempts: config.max_attempts.max(1),
            read_wait: config.read_wait(),
            replay_timeout: config.replay_timeout(),
            error_backoff: config.error_backoff(),
            dead_letter_on_permanent: config.dead_letter_on_permanent,
            metrics: WorkerMetrics::default(),
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn metrics(&self) -> WorkerMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run until `shutdown` fires.
    ///
    /// Shutdown interrupts a blocked read but lets a claimed batch finish.
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        async {
            info!(read_wait_ms = self.read_wait.as_millis() as u64, "Retry worker started");

            while !shutdown.is_triggered() {
                let read = tokio::select! {
                    _ = shutdown.wait() => break,
                    read = self.read_batch() => read,
                };

                match read {
                    Ok(messages) => {
                        let summary = self.process_batch(messages).await;
                        if summary.claimed > 0 {
                            info!(
                                claimed = summary.claimed,
                                acked = summary.acked,
                                rescheduled = summary.rescheduled,
                                dead_lettered = summary.dead_lettered,
                                "Replay pass complete"
                            );
                        }
                    }
                    Err(e) => {
                        error!(error = %e, backoff_ms = self.error_backoff.as_millis() as u64, "Failed to read dead-letter queue");
                        tokio::select! {
                            _ = shutdown.wait() => break,
                            _ = tokio::time::sleep(self.error_backoff) => {}
                        }
                    }
                }
            }

            info!("Retry worker stopped");
        }
        .instrument(worker_span(&self.group, &self.consumer))
        .await
    }

    /// Claim one batch and replay it.
    pub async fn poll_once(&self) -> Result<PollSummary, WorkerError> {
        let messages = self.read_batch().await?;
        Ok(self.process_batch(messages).await)
    }

    async fn read_batch(&self) -> Result<Vec<DlqMessage>, WorkerError> {
        let messages = self
            .dlq
            .read_messages(&self.group, &self.consumer, self.read_wait)
            .await
            .map_err(|e| {
                self.metrics.queue_error();
                e
            })?;
        self.metrics.add_claimed(messages.len());
        Ok(messages)
    }

    async fn process_batch(&self, messages: Vec<DlqMessage>) -> PollSummary {
        let mut summary = PollSummary {
            claimed: messages.len(),
            ..PollSummary::default()
        };

        for message in messages {
            let span = replay_span(message.id().0, message.attempts() + 1);
            let outcome = self.replay(message).instrument(span.clone()).await;
            span.record("outcome", tracing::field::debug(outcome));
            summary.record(outcome);
        }
        summary
    }

    async fn replay(&self, mut message: DlqMessage) -> ReplayOutcome {
        let ctx = WriteContext::with_timeout(self.replay_timeout);
        let events = std::slice::from_ref(message.event());
        let result = with_timeout(self.replay_timeout, self.storage.store_batch(&ctx, events))
            .await
            .unwrap_or_else(|elapsed| Err(StorageError::Timeout(elapsed.after)));

        let error = match result {
            Ok(()) => {
                return match self.dlq.ack_message(&self.group, message.id()).await {
                    Ok(()) => {
                        self.metrics.acked();
                        info!(event_id = %message.event().id(), "Replayed dead-lettered event");
                        ReplayOutcome::Acked
                    }
                    Err(e) => self.abandon(&message, "ack", e),
                };
            }
            Err(error) => error,
        };

        self.metrics.replay_failed();
        record_error(&error);
        let class = classify(&error);
        let prior = message.attempts();
        let next = self
            .schedule
            .next_retry_at(prior, self.clock.now(), message.next_retry_at());
        message.record_failure(error.to_string(), next);

        let permanent = class == ErrorClass::Permanent && self.dead_letter_on_permanent;
        if message.attempts() >= self.max_attempts || permanent {
            return match self.dlq.move_to_dead_letter(&message).await {
                Ok(()) => {
                    self.metrics.dead_lettered();
                    warn!(
                        event_id = %message.event().id(),
                        correlation_id = %message.event().correlation_id(),
                        attempts = message.attempts(),
                        error = %error,
                        "Audit event moved to the dead-letter store"
                    );
                    ReplayOutcome::DeadLettered
                }
                Err(e) => self.abandon(&message, "dead-letter", e),
            };
        }

        match self.dlq.reschedule(&message).await {
            Ok(()) => {
                self.metrics.rescheduled();
                debug!(
                    attempts = message.attempts(),
                    next_retry_at = %message.next_retry_at(),
                    error = %error,
                    class = %class,
                    "Replay failed, rescheduled"
                );
                ReplayOutcome::Rescheduled
            }
            Err(e) => self.abandon(&message, "reschedule", e),
        }
    }

    fn abandon(&self, message: &DlqMessage, step: &str, error: DlqError) -> ReplayOutcome {
        self.metrics.queue_error();
        record_error(&error);
        match error {
            DlqError::NotFound(_) | DlqError::StaleUpdate { .. } => warn!(
                message_id = %message.id(),
                step,
                error = %error,
                "Message already handled by another consumer"
            ),
            _ => error!(
                message_id = %message.id(),
                step,
                error = %error,
                "Dead-letter queue update failed; message will be redelivered"
            ),
        }
        ReplayOutcome::Abandoned
    }
}
