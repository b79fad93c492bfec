//! Audit event types for Tachikoma.
//!
//! An [`AuditEvent`] is immutable once built: fields are read through
//! accessors and ownership moves between the buffer, a batch and the
//! dead-letter queue.

mod category;
mod event;
mod id;
mod severity;

pub use category::AuditCategory;
pub use event::{AuditEvent, AuditEventBuilder};
pub use id::{AuditEventId, IdParseError};
pub use severity::AuditSeverity;
