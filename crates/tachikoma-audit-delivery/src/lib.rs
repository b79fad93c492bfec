//! Reliable delivery of Tachikoma audit events.
//!
//! Producers hand events to a [`BufferedStore`], which never blocks: it
//! accepts the event into a bounded buffer or fails immediately. A single
//! background flusher groups buffered events into batches by size or age
//! and writes them through a [`StorageClient`], retrying transient failures
//! with backoff. Batches that still cannot be written, or that storage
//! rejects outright, are handed event by event to a dead-letter queue for
//! out-of-band replay. If the queue is unreachable too, the loss is logged
//! with a `DATA LOSS` marker and reported by [`BufferedStore::close`].

mod backoff;
mod batch;
mod buffer;
mod classify;
mod error;
mod metrics;
pub mod storage;

pub use backoff::InProcessBackoff;
pub use buffer::BufferedStore;
pub use classify::{classify, ErrorClass};
pub use error::DeliveryError;
pub use metrics::{DeliveryMetrics, MetricsSnapshot};
pub use storage::{MemoryStorage, SqliteAuditStore, StorageClient, StorageError, WriteContext};
