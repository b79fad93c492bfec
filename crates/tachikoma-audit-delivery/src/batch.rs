//! Batching and flushing of buffered events.

use crate::backoff::InProcessBackoff;
use crate::classify::classify;
use crate::metrics::DeliveryMetrics;
use crate::storage::{StorageClient, StorageError, WriteContext};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tachikoma_audit_dlq::DeadLetterQueue;
use tachikoma_audit_types::AuditEvent;
use tachikoma_common_async::{with_timeout, ShutdownSignal};
use tachikoma_common_config::DeliveryConfig;
use tachikoma_common_log::spans::{flush_span, record_error};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument, Span};

/// Flush tuning derived from [`DeliveryConfig`].
#[derive(Debug, Clone)]
pub(crate) struct FlushSettings {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub write_timeout: Duration,
    pub max_attempts: u32,
    pub backoff: InProcessBackoff,
    pub enqueue_timeout: Duration,
}

impl FlushSettings {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            batch_size: config.buffer.batch_size.max(1),
            flush_interval: config.buffer.flush_interval(),
            write_timeout: config.buffer.write_timeout(),
            max_attempts: config.retry.max_attempts.max(1),
            backoff: InProcessBackoff::from_config(&config.retry),
            enqueue_timeout: config.dlq.enqueue_timeout(),
        }
    }
}

/// Accumulates events until a batch is full.
pub(crate) struct BatchCollector {
    batch_size: usize,
    current: Vec<AuditEvent>,
}

impl BatchCollector {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            current: Vec::with_capacity(batch_size),
        }
    }

    /// Add an event; returns the batch once it reaches the size threshold.
    pub fn add(&mut self, event: AuditEvent) -> Option<Vec<AuditEvent>> {
        self.current.push(event);
        if self.current.len() >= self.batch_size {
            Some(self.take_batch())
        } else {
            None
        }
    }

    pub fn take_batch(&mut self) -> Vec<AuditEvent> {
        std::mem::replace(&mut self.current, Vec::with_capacity(self.batch_size))
    }

    pub fn has_pending(&self) -> bool {
        !self.current.is_empty()
    }
}

/// Background task draining the buffer into storage.
///
/// Once `closing` fires, a failed write is not retried: the batch goes to
/// the dead-letter queue, and so does every batch drained after it.
pub(crate) struct Flusher {
    receiver: mpsc::Receiver<AuditEvent>,
    storage: Arc<dyn StorageClient>,
    dlq: Option<Arc<dyn DeadLetterQueue>>,
    metrics: Arc<DeliveryMetrics>,
    pending: Arc<AtomicU64>,
    settings: FlushSettings,
    closing: ShutdownSignal,
    drain_failure: Option<StorageError>,
}

impl Flusher {
    pub fn new(
        receiver: mpsc::Receiver<AuditEvent>,
        storage: Arc<dyn StorageClient>,
        dlq: Option<Arc<dyn DeadLetterQueue>>,
        metrics: Arc<DeliveryMetrics>,
        pending: Arc<AtomicU64>,
        settings: FlushSettings,
        closing: ShutdownSignal,
    ) -> Self {
        Self {
            receiver,
            storage,
            dlq,
            metrics,
            pending,
            settings,
            closing,
            drain_failure: None,
        }
    }

    /// Run until the buffer is closed and drained.
    ///
    /// A batch is flushed when it reaches `batch_size` or when
    /// `flush_interval` has passed since the previous flush.
    pub async fn run(mut self) {
        let mut collector = BatchCollector::new(self.settings.batch_size);
        let mut next_flush = Instant::now() + self.settings.flush_interval;

        loop {
            tokio::select! {
                received = self.receiver.recv() => match received {
                    Some(event) => {
                        if let Some(batch) = collector.add(event) {
                            debug!(batch_size = batch.len(), "Flushing batch (size limit)");
                            self.flush(batch).await;
                            next_flush = Instant::now() + self.settings.flush_interval;
                        }
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(next_flush) => {
                    if collector.has_pending() {
                        let batch = collector.take_batch();
                        debug!(batch_size = batch.len(), "Flushing batch (time limit)");
                        self.flush(batch).await;
                    }
                    next_flush = Instant::now() + self.settings.flush_interval;
                }
            }
        }

        if collector.has_pending() {
            let batch = collector.take_batch();
            debug!(batch_size = batch.len(), "Flushing final batch");
            self.flush(batch).await;
        }
        info!("Audit flusher stopped");
    }

    async fn flush(&mut self, batch: Vec<AuditEvent>) {
        let len = batch.len();
        let span = flush_span(len);

        let result = match &self.drain_failure {
            Some(cause) => {
                debug!(batch_size = len, "Storage already failed during close, skipping write");
                Err(cause.clone())
            }
            None => self.write_with_retry(&batch).instrument(span.clone()).await,
        };

        match result {
            Ok(attempts) => {
                self.metrics.batch_written(len);
                span.in_scope(|| debug!(batch_size = len, attempts, "Batch written"));
            }
            Err(error) => {
                if self.closing.is_triggered() && self.drain_failure.is_none() {
                    warn!(error = %error, "Storage failing during close; remaining batches go to the dead-letter queue");
                    self.drain_failure = Some(error.clone());
                }
                self.dead_letter(batch, &error).instrument(span).await;
            }
        }

        self.pending.fetch_sub(len as u64, Ordering::SeqCst);
    }

    /// Write a batch, retrying transient failures. Returns attempts used.
    async fn write_with_retry(&self, batch: &[AuditEvent]) -> Result<u32, StorageError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let ctx = WriteContext::with_timeout(self.settings.write_timeout);
            let result = with_timeout(self.settings.write_timeout, self.storage.store_batch(&ctx, batch))
                .await
                .unwrap_or_else(|elapsed| Err(StorageError::Timeout(elapsed.after)));

            let error = match result {
                Ok(()) => {
                    Span::current().record("attempts", attempt);
                    return Ok(attempt);
                }
                Err(error) => error,
            };

            let class = classify(&error);
            Span::current().record("attempts", attempt);
            record_error(&error);

            if !class.is_retryable() {
                warn!(attempt, error = %error, class = %class, "Permanent storage error, skipping retries");
                return Err(error);
            }
            if attempt >= self.settings.max_attempts {
                warn!(attempt, error = %error, class = %class, "Storage retries exhausted");
                return Err(error);
            }
            if self.closing.is_triggered() {
                warn!(attempt, error = %error, class = %class, "Buffer closing, skipping retries");
                return Err(error);
            }

            let delay = self.settings.backoff.delay_for(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                class = %class,
                "Batch write failed, retrying"
            );

            let mut closing = self.closing.clone();
            tokio::select! {
                _ = closing.wait() => {
                    warn!(attempt, error = %error, "Buffer closed during backoff, skipping retries");
                    return Err(error);
                }
                _ = tokio::time::sleep(delay) => {}
            }
            self.metrics.write_retried();
        }
    }

    /// Hand every event of a failed batch to the dead-letter queue.
    async fn dead_letter(&self, batch: Vec<AuditEvent>, cause: &StorageError) {
        let len = batch.len();
        let Some(dlq) = &self.dlq else {
            for event in &batch {
                error!(
                    data_loss = true,
                    event_id = %event.id(),
                    correlation_id = %event.correlation_id(),
                    error = %cause,
                    "DATA LOSS: batch write failed and no dead-letter queue is configured"
                );
            }
            self.metrics.batch_failed(len, 0);
            return;
        };

        let cause_text = cause.to_string();
        let mut enqueued = 0usize;
        let mut dlq_error: Option<String> = None;

        for event in batch {
            let event_id = event.id();
            let correlation_id = event.correlation_id().to_string();

            // After the first failed enqueue the rest of the batch is not attempted.
            if dlq_error.is_none() {
                match with_timeout(self.settings.enqueue_timeout, dlq.enqueue(event, &cause_text)).await {
                    Ok(Ok(message_id)) => {
                        enqueued += 1;
                        debug!(event_id = %event_id, message_id = %message_id, "Event dead-lettered for retry");
                        continue;
                    }
                    Ok(Err(e)) => dlq_error = Some(e.to_string()),
                    Err(elapsed) => dlq_error = Some(elapsed.to_string()),
                }
            }

            error!(
                data_loss = true,
                event_id = %event_id,
                correlation_id = %correlation_id,
                error = %cause_text,
                dlq_error = dlq_error.as_deref().unwrap_or_default(),
                "DATA LOSS: dead-letter queue unavailable"
            );
        }

        let lost = len - enqueued;
        if lost == 0 {
            self.metrics.batch_dead_lettered(len);
            warn!(batch_size = len, error = %cause_text, "Batch handed to dead-letter queue");
        } else {
            self.metrics.batch_failed(lost, enqueued);
            error!(
                data_loss = true,
                batch_size = len,
                lost,
                enqueued,
                "DATA LOSS: batch could not be persisted or dead-lettered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tachikoma_audit_types::AuditCategory;

    fn event() -> AuditEvent {
        AuditEvent::builder(AuditCategory::System, "tick").build()
    }

    #[test]
    fn test_collector_flushes_at_batch_size() {
        let mut collector = BatchCollector::new(3);
        assert!(collector.add(event()).is_none());
        assert!(collector.add(event()).is_none());

        let batch = collector.add(event()).unwrap();
        assert_eq!(batch.len(), 3);
        assert!(!collector.has_pending());
    }

    #[test]
    fn test_take_partial_batch() {
        let mut collector = BatchCollector::new(10);
        collector.add(event());
        collector.add(event());

        assert!(collector.has_pending());
        assert_eq!(collector.take_batch().len(), 2);
        assert!(!collector.has_pending());
    }

    #[test]
    fn test_settings_from_config() {
        let settings = FlushSettings::from_config(&DeliveryConfig::default());
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.flush_interval, Duration::from_secs(1));
        assert_eq!(settings.backoff.delay_for(2), Duration::from_secs(4));
    }
}
