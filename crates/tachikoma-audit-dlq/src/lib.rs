//! Dead-letter queue for undeliverable Tachikoma audit events.
//!
//! Events that cannot be persisted by the flusher land here one message per
//! event, each with its own attempt count and next-retry time. Consumers in
//! a named group compete for messages: a claim hides a message from the rest
//! of the group until it is acknowledged, rescheduled, dead-lettered, or the
//! claim lapses.
//!
//! - [`MemoryDeadLetterQueue`] - in-process queue with deterministic claims
//! - [`SqliteDeadLetterQueue`] - durable queue shared across processes

mod clock;
mod error;
mod memory;
mod message;
mod queue;
mod sqlite;

pub use clock::{chrono_duration, Clock, ManualClock, SystemClock};
pub use error::{DlqError, DlqResult};
pub use memory::MemoryDeadLetterQueue;
pub use message::{DeadLetterRecord, DlqMessage, MessageId};
pub use queue::{DeadLetterQueue, DlqSettings};
pub use sqlite::SqliteDeadLetterQueue;
