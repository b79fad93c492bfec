//! Audit event identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const PREFIX: &str = "aud_";

/// Globally unique identifier for an audit event.
///
/// Downstream consumers deduplicate replays on this value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditEventId(Uuid);

impl AuditEventId {
    /// Create a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from string (with or without the `aud_` prefix).
    pub fn parse(s: &str) -> Result<Self, IdParseError> {
        let raw = s.strip_prefix(PREFIX).unwrap_or(s);
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| IdParseError::InvalidFormat(s.to_string()))
    }
}

impl Default for AuditEventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AuditEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PREFIX, self.0)
    }
}

impl fmt::Debug for AuditEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuditEventId({})", self)
    }
}

impl FromStr for AuditEventId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Error parsing an event ID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdParseError {
    /// The ID is not a (prefixed) UUID.
    #[error("invalid audit event ID: {0}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_has_prefix() {
        let id = AuditEventId::new();
        assert!(id.to_string().starts_with("aud_"));
    }

    #[test]
    fn test_parse_with_and_without_prefix() {
        let id = AuditEventId::new();
        assert_eq!(AuditEventId::parse(&id.to_string()).unwrap(), id);
        let bare = id.to_string().trim_start_matches(PREFIX).to_string();
        assert_eq!(AuditEventId::parse(&bare).unwrap(), id);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = "aud_not-a-uuid".parse::<AuditEventId>().unwrap_err();
        assert!(err.to_string().contains("aud_not-a-uuid"));
    }

    #[test]
    fn test_serializes_as_bare_uuid() {
        let id = AuditEventId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_string().trim_start_matches(PREFIX)));
    }
}
