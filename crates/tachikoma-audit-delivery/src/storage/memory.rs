//! In-memory storage client with scripted failures.

use super::{StorageClient, StorageError, WriteContext};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tachikoma_audit_types::AuditEvent;
use tokio::time::Instant;

/// Records every batch it accepts.
///
/// Queued failures are returned one per call, oldest first, before any
/// write succeeds. While marked unavailable every call fails.
#[derive(Default)]
pub struct MemoryStorage {
    batches: Mutex<Vec<Vec<AuditEvent>>>,
    failures: Mutex<VecDeque<StorageError>>,
    unavailable: AtomicBool,
    latency: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call with `error`.
    pub fn fail_next(&self, error: StorageError) {
        self.failures.lock().push_back(error);
    }

    /// Fail the next `n` calls with clones of `error`.
    pub fn fail_times(&self, n: usize, error: StorageError) {
        let mut failures = self.failures.lock();
        failures.extend(std::iter::repeat(error).take(n));
    }

    /// Fail every call with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Number of `store_batch` calls so far, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// When each `store_batch` call started, oldest first.
    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().clone()
    }

    /// Batches written so far.
    pub fn batches(&self) -> Vec<Vec<AuditEvent>> {
        self.batches.lock().clone()
    }

    /// All written events in write order.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn store_batch(&self, ctx: &WriteContext, events: &[AuditEvent]) -> Result<(), StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().push(Instant::now());

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            if latency >= ctx.remaining() {
                tokio::time::sleep_until(ctx.deadline()).await;
                return Err(StorageError::Timeout(latency));
            }
            tokio::time::sleep(latency).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory storage marked unavailable".to_string()));
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        self.batches.lock().push(events.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tachikoma_audit_types::AuditCategory;

    fn batch() -> Vec<AuditEvent> {
        vec![AuditEvent::builder(AuditCategory::Workflow, "step_started").build()]
    }

    #[tokio::test]
    async fn test_scripted_failures_then_success() {
        let storage = MemoryStorage::new();
        storage.fail_times(2, StorageError::Unavailable("down".to_string()));
        let ctx = WriteContext::with_timeout(Duration::from_secs(1));

        assert!(storage.store_batch(&ctx, &batch()).await.is_err());
        assert!(storage.store_batch(&ctx, &batch()).await.is_err());
        assert!(storage.store_batch(&ctx, &batch()).await.is_ok());

        assert_eq!(storage.call_count(), 3);
        assert_eq!(storage.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_until_restored() {
        let storage = MemoryStorage::new();
        let ctx = WriteContext::with_timeout(Duration::from_secs(1));

        storage.set_unavailable(true);
        assert!(matches!(
            storage.store_batch(&ctx, &batch()).await,
            Err(StorageError::Unavailable(_))
        ));

        storage.set_unavailable(false);
        storage.store_batch(&ctx, &batch()).await.unwrap();
        assert_eq!(storage.events().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_past_deadline_times_out() {
        let storage = MemoryStorage::new();
        storage.set_latency(Some(Duration::from_secs(5)));
        let ctx = WriteContext::with_timeout(Duration::from_secs(1));

        assert!(matches!(
            storage.store_batch(&ctx, &batch()).await,
            Err(StorageError::Timeout(_))
        ));
        assert!(storage.batches().is_empty());
    }
}
