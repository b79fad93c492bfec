//! Storage error classification.

use crate::StorageError;
use serde::Serialize;
use std::fmt;

/// How the flusher and the retry worker treat a storage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network, timeout or server-side unavailability. Retry.
    Transient,
    /// Malformed or rejected write. Retrying will not help.
    Permanent,
    /// Not recognised. Retried like `Transient`.
    Unknown,
}

impl ErrorClass {
    /// Whether another attempt may succeed.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Permanent)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Map a storage error to its class.
pub fn classify(error: &StorageError) -> ErrorClass {
    match error {
        StorageError::Unavailable(_)
        | StorageError::Timeout(_)
        | StorageError::Server { .. }
        | StorageError::Cancelled => ErrorClass::Transient,
        // Request timeout and rate limiting are worth another try.
        StorageError::Rejected { status: 408 | 429, .. } => ErrorClass::Transient,
        StorageError::Rejected { .. } | StorageError::Validation { .. } => ErrorClass::Permanent,
        StorageError::Other(_) => ErrorClass::Unknown,
    }
}
