//! Test utilities for Tachikoma crates.

use std::path::PathBuf;
use tachikoma_audit_types::{AuditCategory, AuditEvent, AuditSeverity};
use tempfile::TempDir;

/// Creates a temporary directory that is cleaned up on drop.
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Path for a database file inside a fresh temporary directory.
///
/// Keep the returned `TempDir` alive for as long as the path is used.
pub fn temp_db_path(name: &str) -> (TempDir, PathBuf) {
    let dir = temp_dir();
    let path = dir.path().join(name);
    (dir, path)
}

/// A deterministic event tagged with its sequence number.
pub fn sample_event(seq: usize) -> AuditEvent {
    AuditEvent::builder(AuditCategory::DataAccess, "record_read")
        .severity(AuditSeverity::Low)
        .correlation_id(format!("req-{}", seq))
        .field("seq", seq)
        .build()
}

/// `count` events numbered from zero.
pub fn sample_events(count: usize) -> Vec<AuditEvent> {
    (0..count).map(sample_event).collect()
}

/// Sequence number stored by [`sample_event`].
pub fn event_seq(event: &AuditEvent) -> Option<usize> {
    event
        .payload()
        .get("seq")
        .and_then(serde_json::Value::as_u64)
        .map(|n| n as usize)
}

/// Assert that a Result is Ok and return the value.
#[macro_export]
macro_rules! assert_ok {
    ($expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
}

/// Assert that a Result is Err and return the error.
#[macro_export]
macro_rules! assert_err {
    ($expr:expr) => {
        match $expr {
            Ok(v) => panic!("Expected Err, got Ok: {:?}", v),
            Err(e) => e,
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_temp_db_path_lives_in_dir() {
        let (dir, path) = temp_db_path("dlq.db");
        assert!(dir.path().is_dir());
        assert!(path.starts_with(dir.path()));
        assert!(!path.exists());
    }

    #[test]
    fn test_sample_events_are_distinct() {
        let events = sample_events(3);
        assert_ne!(events[0].id(), events[1].id());
        assert_eq!(events[2].correlation_id(), "req-2");
    }

    #[test]
    fn test_macros() {
        let ok: Result<u8, String> = Ok(3);
        assert_eq!(assert_ok!(ok), 3);

        let err: Result<u8, String> = Err("boom".to_string());
        assert_eq!(assert_err!(err), "boom");
    }

    proptest! {
        #[test]
        fn test_event_seq_roundtrip(seq in 0usize..1_000_000) {
            prop_assert_eq!(event_seq(&sample_event(seq)), Some(seq));
        }
    }
}
