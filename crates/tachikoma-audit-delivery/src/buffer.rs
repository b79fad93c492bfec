//! Producer-facing bounded buffer.

use crate::batch::{FlushSettings, Flusher};
use crate::metrics::{DeliveryMetrics, MetricsSnapshot};
use crate::storage::StorageClient;
use crate::DeliveryError;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tachikoma_audit_dlq::DeadLetterQueue;
use tachikoma_audit_types::AuditEvent;
use tachikoma_common_async::ShutdownHandle;
use tachikoma_common_config::DeliveryConfig;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Accepts audit events without blocking and delivers them in the background.
///
/// Every accepted event is written to storage, handed to the dead-letter
/// queue, or counted as lost. An event that cannot be accepted is reported
/// to the caller immediately. [`close`](Self::close) reports any loss.
pub struct BufferedStore {
    sender: RwLock<Option<mpsc::Sender<AuditEvent>>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
    closing: ShutdownHandle,
    metrics: Arc<DeliveryMetrics>,
    pending: Arc<AtomicU64>,
    unflushed: AtomicU64,
    capacity: usize,
    shutdown_timeout: Duration,
}

impl BufferedStore {
    /// Create the buffer and spawn its flusher on the current Tokio runtime.
    pub fn start(
        config: &DeliveryConfig,
        storage: Arc<dyn StorageClient>,
        dlq: Option<Arc<dyn DeadLetterQueue>>,
    ) -> Self {
        let capacity = config.buffer.capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let metrics = Arc::new(DeliveryMetrics::default());
        let pending = Arc::new(AtomicU64::new(0));
        let closing = ShutdownHandle::new();

        if dlq.is_none() {
            warn!("Audit buffer started without a dead-letter queue; failed batches will be lost");
        }

        let flusher = Flusher::new(
            receiver,
            storage,
            dlq,
            Arc::clone(&metrics),
            Arc::clone(&pending),
            FlushSettings::from_config(config),
            closing.subscribe(),
        );
        let handle = tokio::spawn(flusher.run());

        info!(
            capacity,
            batch_size = config.buffer.batch_size,
            flush_interval_ms = config.buffer.flush_interval_ms,
            "Audit buffer started"
        );

        Self {
            sender: RwLock::new(Some(sender)),
            flusher: Mutex::new(Some(handle)),
            closing,
            metrics,
            pending,
            unflushed: AtomicU64::new(0),
            capacity,
            shutdown_timeout: config.buffer.shutdown_timeout(),
        }
    }

    /// Offer an event to the buffer. Never blocks.
    ///
    /// Fails with [`DeliveryError::BufferFull`] when the buffer is at
    /// capacity and [`DeliveryError::Closed`] after [`close`](Self::close).
    pub fn store(&self, event: AuditEvent) -> Result<(), DeliveryError> {
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            return Err(DeliveryError::Closed {
                correlation_id: event.correlation_id().to_string(),
            });
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(event) {
            Ok(()) => {
                self.metrics.event_accepted();
                Ok(())
            }
            Err(TrySendError::Full(event)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                self.metrics.event_dropped();
                warn!(
                    event_id = %event.id(),
                    correlation_id = %event.correlation_id(),
                    capacity = self.capacity,
                    "Audit buffer full, event rejected"
                );
                Err(DeliveryError::BufferFull {
                    event_id: event.id(),
                    correlation_id: event.correlation_id().to_string(),
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(event)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                error!(correlation_id = %event.correlation_id(), "Audit flusher is gone");
                Err(DeliveryError::Closed {
                    correlation_id: event.correlation_id().to_string(),
                })
            }
        }
    }

    /// Stop accepting events, flush what is buffered and report any loss.
    ///
    /// Remaining batches get one write attempt each; a batch that fails is
    /// handed to the dead-letter queue instead of being retried. Waits at
    /// most the configured shutdown timeout for the flusher; events still in
    /// flight after that are counted as unflushed. Calling `close` again
    /// returns the same outcome without waiting.
    pub async fn close(&self) -> Result<(), DeliveryError> {
        let sender = self.sender.write().take();
        if sender.is_some() {
            self.closing.shutdown();
            drop(sender);
            info!("Closing audit buffer");

            let handle = self.flusher.lock().take();
            if let Some(mut handle) = handle {
                match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(error = %e, "Audit flusher task failed"),
                    Err(_) => {
                        handle.abort();
                        warn!(
                            timeout_ms = self.shutdown_timeout.as_millis() as u64,
                            "Audit flusher did not finish before the shutdown timeout"
                        );
                    }
                }
            }

            let unflushed = self.pending.load(Ordering::SeqCst);
            self.unflushed.store(unflushed, Ordering::SeqCst);
            if unflushed > 0 {
                error!(data_loss = true, unflushed, "DATA LOSS: events still buffered at shutdown");
            }
        }

        let snapshot = self.metrics.snapshot();
        let unflushed = self.unflushed.load(Ordering::SeqCst);
        if snapshot.events_dropped + snapshot.batches_failed + unflushed > 0 {
            return Err(DeliveryError::DataLoss {
                dropped: snapshot.events_dropped,
                failed_batches: snapshot.batches_failed,
                unflushed,
            });
        }

        Ok(())
    }

    /// Current counter values.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Accepted events not yet written, dead-lettered or lost.
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fraction of buffer slots in use.
    pub fn buffer_usage(&self) -> f64 {
        match self.sender.read().as_ref() {
            Some(sender) => 1.0 - (sender.capacity() as f64 / sender.max_capacity() as f64),
            None => 0.0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }
}
