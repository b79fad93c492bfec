//! SQLite audit store.

use super::{StorageClient, StorageError, WriteContext};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tachikoma_audit_types::{AuditEvent, AuditEventId};
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_events (
    id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    category TEXT NOT NULL,
    event_type TEXT NOT NULL CHECK (event_type <> ''),
    severity TEXT NOT NULL,
    correlation_id TEXT NOT NULL,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_events_correlation ON audit_events(correlation_id);
CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);
"#;

/// Audit events persisted to a SQLite database.
///
/// Writes are keyed by event id and ignore duplicates, so replaying an
/// event that already landed is harmless.
#[derive(Clone)]
pub struct SqliteAuditStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Unavailable(format!("{}: {}", parent.display(), e)))?;
        }

        let conn = Connection::open(path).map_err(map_sqlite)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(map_sqlite)?;
        info!(path = %path.display(), "Opened audit store");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory().map_err(map_sqlite)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(map_sqlite)?;
        conn.execute_batch(SCHEMA).map_err(map_sqlite)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Number of stored events.
    pub async fn count(&self) -> Result<usize, StorageError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let count: i64 = conn
                .lock()
                .query_row("SELECT COUNT(*) FROM audit_events", [], |row| row.get(0))
                .map_err(map_sqlite)?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?
    }

    /// Whether an event with `id` has been stored.
    pub async fn contains(&self, id: AuditEventId) -> Result<bool, StorageError> {
        let conn = Arc::clone(&self.conn);
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let found: i64 = conn
                .lock()
                .query_row(
                    "SELECT COUNT(*) FROM audit_events WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .map_err(map_sqlite)?;
            Ok(found > 0)
        })
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?
    }
}

fn map_sqlite(error: rusqlite::Error) -> StorageError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                StorageError::Unavailable(error.to_string())
            }
            ErrorCode::ConstraintViolation => StorageError::Validation {
                event_id: None,
                message: error.to_string(),
            },
            ErrorCode::CannotOpen | ErrorCode::SystemIoFailure | ErrorCode::DiskFull => {
                StorageError::Unavailable(error.to_string())
            }
            _ => StorageError::Other(error.to_string()),
        },
        _ => StorageError::Other(error.to_string()),
    }
}

struct EventRow {
    id: String,
    timestamp: String,
    category: String,
    event_type: String,
    severity: String,
    correlation_id: String,
    payload: String,
}

impl EventRow {
    fn from_event(event: &AuditEvent) -> Result<Self, StorageError> {
        if event.event_type().trim().is_empty() {
            return Err(StorageError::Validation {
                event_id: Some(event.id()),
                message: "event_type must not be empty".to_string(),
            });
        }

        let payload = serde_json::to_string(event.payload()).map_err(|e| StorageError::Validation {
            event_id: Some(event.id()),
            message: e.to_string(),
        })?;

        Ok(Self {
            id: event.id().to_string(),
            timestamp: event.timestamp().to_rfc3339(),
            category: event.category().to_string(),
            event_type: event.event_type().to_string(),
            severity: event.severity().to_string(),
            correlation_id: event.correlation_id().to_string(),
            payload,
        })
    }
}

#[async_trait]
impl StorageClient for SqliteAuditStore {
    async fn store_batch(&self, ctx: &WriteContext, events: &[AuditEvent]) -> Result<(), StorageError> {
        let rows = events
            .iter()
            .map(EventRow::from_event)
            .collect::<Result<Vec<_>, _>>()?;

        if ctx.is_expired() {
            return Err(StorageError::Timeout(Duration::ZERO));
        }

        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            let tx = conn.transaction().map_err(map_sqlite)?;
            let mut inserted = 0;
            {
                let mut stmt = tx
                    .prepare_cached(
                        "INSERT OR IGNORE INTO audit_events
                         (id, timestamp, category, event_type, severity, correlation_id, payload)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    )
                    .map_err(map_sqlite)?;
                for row in &rows {
                    inserted += stmt
                        .execute(params![
                            row.id,
                            row.timestamp,
                            row.category,
                            row.event_type,
                            row.severity,
                            row.correlation_id,
                            row.payload,
                        ])
                        .map_err(map_sqlite)?;
                }
            }
            tx.commit().map_err(map_sqlite)?;
            debug!(batch_size = rows.len(), inserted, "Stored audit batch");
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tachikoma_audit_types::AuditCategory;

    fn ctx() -> WriteContext {
        WriteContext::with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_store_batch_is_idempotent() {
        let store = SqliteAuditStore::open_in_memory().unwrap();
        let events = vec![
            AuditEvent::builder(AuditCategory::Policy, "evaluated").build(),
            AuditEvent::builder(AuditCategory::Policy, "denied").build(),
        ];

        store.store_batch(&ctx(), &events).await.unwrap();
        store.store_batch(&ctx(), &events).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
        assert!(store.contains(events[1].id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_event_type_is_rejected_whole_batch() {
        let store = SqliteAuditStore::open_in_memory().unwrap();
        let events = vec![
            AuditEvent::builder(AuditCategory::Policy, "evaluated").build(),
            AuditEvent::builder(AuditCategory::Policy, "").build(),
        ];

        let err = store.store_batch(&ctx(), &events).await.unwrap_err();
        assert!(matches!(err, StorageError::Validation { event_id: Some(_), .. }));
        assert_eq!(err.class(), crate::ErrorClass::Permanent);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reopen_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let event = AuditEvent::builder(AuditCategory::System, "boot").build();

        SqliteAuditStore::open(&path)
            .unwrap()
            .store_batch(&ctx(), std::slice::from_ref(&event))
            .await
            .unwrap();

        let store = SqliteAuditStore::open(&path).unwrap();
        assert!(store.contains(event.id()).await.unwrap());
    }
}
