//! Core audit event type.

use crate::{AuditCategory, AuditEventId, AuditSeverity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An immutable audit record.
///
/// Fields are private; once built an event is only read, moved or cloned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    id: AuditEventId,
    timestamp: DateTime<Utc>,
    category: AuditCategory,
    event_type: String,
    severity: AuditSeverity,
    correlation_id: String,
    #[serde(default)]
    payload: Value,
}

impl AuditEvent {
    /// Create a new event builder.
    pub fn builder(category: AuditCategory, event_type: impl Into<String>) -> AuditEventBuilder {
        AuditEventBuilder::new(category, event_type)
    }

    /// Unique event identifier.
    pub fn id(&self) -> AuditEventId {
        self.id
    }

    /// When the event occurred.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Event category.
    pub fn category(&self) -> AuditCategory {
        self.category
    }

    /// Specific event type within the category, e.g. `"login_failed"`.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Event severity.
    pub fn severity(&self) -> AuditSeverity {
        self.severity
    }

    /// Identifier shared by related events.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Opaque structured payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }
}

/// Builder for constructing audit events.
#[derive(Debug)]
pub struct AuditEventBuilder {
    id: Option<AuditEventId>,
    timestamp: Option<DateTime<Utc>>,
    category: AuditCategory,
    event_type: String,
    severity: AuditSeverity,
    correlation_id: Option<String>,
    payload: Option<Value>,
    fields: Map<String, Value>,
}

impl AuditEventBuilder {
    /// Create a new builder.
    pub fn new(category: AuditCategory, event_type: impl Into<String>) -> Self {
        Self {
            id: None,
            timestamp: None,
            category,
            event_type: event_type.into(),
            severity: AuditSeverity::default(),
            correlation_id: None,
            payload: None,
            fields: Map::new(),
        }
    }

    /// Use a specific ID instead of a fresh one.
    pub fn id(mut self, id: AuditEventId) -> Self {
        self.id = Some(id);
        self
    }

    /// Override the event time (defaults to now).
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the severity.
    pub fn severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Set correlation ID.
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Replace the whole payload.
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Add a single payload field. Ignored when an explicit payload is set.
    pub fn field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(json) = serde_json::to_value(value) {
            self.fields.insert(key.into(), json);
        }
        self
    }

    /// Build the event.
    ///
    /// Without an explicit correlation ID the event correlates with itself.
    pub fn build(self) -> AuditEvent {
        let id = self.id.unwrap_or_default();
        AuditEvent {
            id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            category: self.category,
            event_type: self.event_type,
            severity: self.severity,
            correlation_id: self.correlation_id.unwrap_or_else(|| id.to_string()),
            payload: self.payload.unwrap_or(Value::Object(self.fields)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let event = AuditEvent::builder(AuditCategory::Authentication, "login").build();
        assert_eq!(event.category(), AuditCategory::Authentication);
        assert_eq!(event.event_type(), "login");
        assert_eq!(event.severity(), AuditSeverity::Info);
        assert_eq!(event.correlation_id(), event.id().to_string());
        assert_eq!(event.payload(), &Value::Object(Map::new()));
    }

    #[test]
    fn test_fields_build_object_payload() {
        let event = AuditEvent::builder(AuditCategory::DataAccess, "record_read")
            .correlation_id("req-42")
            .severity(AuditSeverity::Low)
            .field("table", "invoices")
            .field("rows", 3)
            .build();

        assert_eq!(event.correlation_id(), "req-42");
        assert_eq!(event.payload()["table"], "invoices");
        assert_eq!(event.payload()["rows"], 3);
    }

    #[test]
    fn test_explicit_payload_wins() {
        let event = AuditEvent::builder(AuditCategory::Policy, "evaluated")
            .field("ignored", true)
            .payload(serde_json::json!(["a", "b"]))
            .build();
        assert_eq!(event.payload(), &serde_json::json!(["a", "b"]));
    }

    #[test]
    fn test_json_round_trip_preserves_identity() {
        let event = AuditEvent::builder(AuditCategory::Security, "intrusion_detected")
            .severity(AuditSeverity::Critical)
            .field("source_ip", "10.0.0.9")
            .build();

        let json = serde_json::to_string(&event).unwrap();
        let decoded: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_missing_payload_deserializes_as_null() {
        let event = AuditEvent::builder(AuditCategory::System, "startup").build();
        let mut json = serde_json::to_value(&event).unwrap();
        json.as_object_mut().unwrap().remove("payload");

        let decoded: AuditEvent = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.payload(), &Value::Null);
    }
}
