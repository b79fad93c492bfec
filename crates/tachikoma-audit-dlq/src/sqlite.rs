//! SQLite-backed dead-letter queue.

use crate::{
    Clock, DeadLetterQueue, DeadLetterRecord, DlqError, DlqMessage, DlqResult, DlqSettings,
    MessageId,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tachikoma_audit_types::AuditEvent;
use tokio::time::Instant;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS dlq_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    enqueued_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT NOT NULL,
    next_retry_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_dlq_messages_due ON dlq_messages(next_retry_at, id);

CREATE TABLE IF NOT EXISTS dlq_claims (
    message_id INTEGER NOT NULL,
    consumer_group TEXT NOT NULL,
    consumer TEXT NOT NULL,
    claimed_at INTEGER NOT NULL,
    PRIMARY KEY (message_id, consumer_group)
);

CREATE TABLE IF NOT EXISTS dlq_dead_letters (
    message_id INTEGER PRIMARY KEY,
    event_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    enqueued_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL,
    last_error TEXT NOT NULL,
    dead_lettered_at INTEGER NOT NULL
);
"#;

/// A dead-letter queue in a SQLite database.
///
/// Several worker processes may share one database file; claims are taken
/// inside an immediate transaction so two consumers never claim the same
/// message for the same group.
pub struct SqliteDeadLetterQueue {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
    settings: DlqSettings,
}

impl SqliteDeadLetterQueue {
    /// Open (or create) the queue at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
        settings: DlqSettings,
    ) -> DlqResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| DlqError::Unavailable(format!("{}: {}", parent.display(), e)))?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        info!(path = %path.display(), "Opened dead-letter queue");
        Self::with_connection(conn, clock, settings)
    }

    /// Open a private in-memory queue.
    pub fn open_in_memory(clock: Arc<dyn Clock>, settings: DlqSettings) -> DlqResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, clock, settings)
    }

    fn with_connection(
        conn: Connection,
        clock: Arc<dyn Clock>,
        settings: DlqSettings,
    ) -> DlqResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
            settings,
        })
    }

    async fn run<T, F>(&self, f: F) -> DlqResult<T>
    where
        F: FnOnce(&mut Connection) -> DlqResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| DlqError::Task(e.to_string()))?
    }

    async fn claim(&self, group: &str, consumer: &str) -> DlqResult<Vec<DlqMessage>> {
        let now = self.clock.now().timestamp_millis();
        let timeout = i64::try_from(self.settings.claim_timeout.as_millis()).unwrap_or(i64::MAX);
        let limit = i64::try_from(self.settings.read_batch_size).unwrap_or(i64::MAX);
        let group = group.to_string();
        let consumer = consumer.to_string();

        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let lapsed = tx.execute(
                "DELETE FROM dlq_claims WHERE claimed_at <= ?1",
                params![now.saturating_sub(timeout)],
            )?;
            if lapsed > 0 {
                debug!(lapsed, "Released lapsed claims");
            }

            let mut messages = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "SELECT id, payload, enqueued_at, attempts, last_error, next_retry_at
                     FROM dlq_messages m
                     WHERE m.next_retry_at <= ?1
                       AND NOT EXISTS (
                           SELECT 1 FROM dlq_claims c
                           WHERE c.message_id = m.id AND c.consumer_group = ?2
                       )
                     ORDER BY m.next_retry_at, m.id
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![now, group, limit], MessageRow::from_row)?;
                for row in rows {
                    messages.push(row?.into_message()?);
                }
            }

            for message in &messages {
                tx.execute(
                    "INSERT INTO dlq_claims (message_id, consumer_group, consumer, claimed_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![id_param(message.id()), group, consumer, now],
                )?;
            }

            tx.commit()?;
            Ok(messages)
        })
        .await
    }
}

struct MessageRow {
    id: i64,
    payload: String,
    enqueued_at: i64,
    attempts: u32,
    last_error: String,
    next_retry_at: i64,
}

impl MessageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            payload: row.get(1)?,
            enqueued_at: row.get(2)?,
            attempts: row.get(3)?,
            last_error: row.get(4)?,
            next_retry_at: row.get(5)?,
        })
    }

    fn into_message(self) -> DlqResult<DlqMessage> {
        let event: AuditEvent = serde_json::from_str(&self.payload)?;
        Ok(DlqMessage::restore(
            message_id(self.id)?,
            event,
            from_millis(self.enqueued_at)?,
            self.attempts,
            self.last_error,
            from_millis(self.next_retry_at)?,
        ))
    }
}

fn id_param(id: MessageId) -> i64 {
    i64::try_from(id.0).unwrap_or(i64::MAX)
}

fn message_id(raw: i64) -> DlqResult<MessageId> {
    u64::try_from(raw)
        .map(MessageId)
        .map_err(|_| DlqError::Corrupt(format!("negative message id {}", raw)))
}

fn from_millis(ms: i64) -> DlqResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| DlqError::Corrupt(format!("timestamp out of range: {}", ms)))
}

#[async_trait]
impl DeadLetterQueue for SqliteDeadLetterQueue {
    async fn enqueue(&self, event: AuditEvent, cause: &str) -> DlqResult<MessageId> {
        let now = self.clock.now().timestamp_millis();
        let payload = serde_json::to_string(&event)?;
        let event_id = event.id().to_string();
        let cause = cause.to_string();

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO dlq_messages (event_id, payload, enqueued_at, attempts, last_error, next_retry_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?3)",
                params![event_id, payload, now, cause],
            )?;
            message_id(conn.last_insert_rowid())
        })
        .await
    }

    async fn read_messages(
        &self,
        group: &str,
        consumer: &str,
        max_wait: Duration,
    ) -> DlqResult<Vec<DlqMessage>> {
        let deadline = Instant::now() + max_wait;

        loop {
            let batch = self.claim(group, consumer).await?;
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }

            let wake = (Instant::now() + self.settings.poll_interval).min(deadline);
            tokio::time::sleep_until(wake).await;
        }
    }

    async fn ack_message(&self, _group: &str, id: MessageId) -> DlqResult<()> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute("DELETE FROM dlq_messages WHERE id = ?1", params![id_param(id)])?;
            if removed == 0 {
                return Err(DlqError::NotFound(id));
            }
            tx.execute("DELETE FROM dlq_claims WHERE message_id = ?1", params![id_param(id)])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn reschedule(&self, message: &DlqMessage) -> DlqResult<()> {
        let id = message.id();
        let attempts = message.attempts();
        let last_error = message.last_error().to_string();
        let next_retry_at = message.next_retry_at().timestamp_millis();

        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let stored: u32 = tx
                .query_row(
                    "SELECT attempts FROM dlq_messages WHERE id = ?1",
                    params![id_param(id)],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(DlqError::NotFound(id))?;

            if attempts < stored {
                return Err(DlqError::StaleUpdate {
                    id,
                    stored,
                    update: attempts,
                });
            }

            tx.execute(
                "UPDATE dlq_messages SET attempts = ?2, last_error = ?3, next_retry_at = ?4 WHERE id = ?1",
                params![id_param(id), attempts, last_error, next_retry_at],
            )?;
            tx.execute("DELETE FROM dlq_claims WHERE message_id = ?1", params![id_param(id)])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn move_to_dead_letter(&self, message: &DlqMessage) -> DlqResult<()> {
        let record = message.clone().into_dead_letter(self.clock.now());
        let payload = serde_json::to_string(&record.event)?;

        self.run(move |conn| {
            let id = id_param(record.message_id);
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let removed = tx.execute("DELETE FROM dlq_messages WHERE id = ?1", params![id])?;
            if removed == 0 {
                return Err(DlqError::NotFound(record.message_id));
            }

            tx.execute("DELETE FROM dlq_claims WHERE message_id = ?1", params![id])?;
            tx.execute(
                "INSERT INTO dlq_dead_letters
                 (message_id, event_id, payload, enqueued_at, attempts, last_error, dead_lettered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    record.event.id().to_string(),
                    payload,
                    record.enqueued_at.timestamp_millis(),
                    record.attempts,
                    record.last_error,
                    record.dead_lettered_at.timestamp_millis(),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn pending_len(&self) -> DlqResult<usize> {
        self.run(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM dlq_messages", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
        .await
    }

    async fn dead_letters(&self, limit: usize) -> DlqResult<Vec<DeadLetterRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT message_id, payload, enqueued_at, attempts, last_error, dead_lettered_at
                 FROM dlq_dead_letters
                 ORDER BY dead_lettered_at DESC, message_id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (id, payload, enqueued_at, attempts, last_error, dead_lettered_at) = row?;
                records.push(DeadLetterRecord {
                    message_id: message_id(id)?,
                    event: serde_json::from_str(&payload)?,
                    enqueued_at: from_millis(enqueued_at)?,
                    attempts,
                    last_error,
                    dead_lettered_at: from_millis(dead_lettered_at)?,
                });
            }
            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use tachikoma_audit_types::AuditCategory;

    fn event(kind: &str) -> AuditEvent {
        AuditEvent::builder(AuditCategory::Security, kind)
            .correlation_id("req-1")
            .build()
    }

    fn queue(clock: &ManualClock) -> SqliteDeadLetterQueue {
        SqliteDeadLetterQueue::open_in_memory(Arc::new(clock.clone()), DlqSettings::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_read_preserves_event() {
        let clock = ManualClock::starting_now();
        let dlq = queue(&clock);
        let original = event("key_rotated");

        dlq.enqueue(original.clone(), "store unavailable").await.unwrap();
        let batch = dlq.read_messages("g", "c1", Duration::ZERO).await.unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].event(), &original);
        assert_eq!(batch[0].last_error(), "store unavailable");
    }

    #[tokio::test]
    async fn test_claims_are_per_group() {
        let clock = ManualClock::starting_now();
        let dlq = queue(&clock);
        dlq.enqueue(event("a"), "timeout").await.unwrap();

        assert_eq!(dlq.read_messages("g", "c1", Duration::ZERO).await.unwrap().len(), 1);
        assert!(dlq.read_messages("g", "c2", Duration::ZERO).await.unwrap().is_empty());

        clock.advance(Duration::from_secs(301));
        assert_eq!(dlq.read_messages("g", "c2", Duration::ZERO).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reschedule_and_stale_update() {
        let clock = ManualClock::starting_now();
        let dlq = queue(&clock);
        dlq.enqueue(event("a"), "timeout").await.unwrap();

        let original = dlq.read_messages("g", "c1", Duration::ZERO).await.unwrap().remove(0);
        let mut updated = original.clone();
        updated.record_failure("503", clock.now() + chrono::Duration::minutes(5));
        dlq.reschedule(&updated).await.unwrap();

        assert!(matches!(
            dlq.reschedule(&original).await,
            Err(DlqError::StaleUpdate { stored: 1, update: 0, .. })
        ));

        clock.advance(Duration::from_secs(300));
        let batch = dlq.read_messages("g", "c1", Duration::ZERO).await.unwrap();
        assert_eq!(batch[0].attempts(), 1);
        assert_eq!(batch[0].last_error(), "503");
    }

    #[tokio::test]
    async fn test_ack_and_dead_letter() {
        let clock = ManualClock::starting_now();
        let dlq = queue(&clock);
        let first = dlq.enqueue(event("a"), "timeout").await.unwrap();
        dlq.enqueue(event("b"), "timeout").await.unwrap();

        let batch = dlq.read_messages("g", "c1", Duration::ZERO).await.unwrap();
        dlq.ack_message("g", first).await.unwrap();
        dlq.move_to_dead_letter(&batch[1]).await.unwrap();

        assert_eq!(dlq.pending_len().await.unwrap(), 0);
        assert!(matches!(
            dlq.move_to_dead_letter(&batch[1]).await,
            Err(DlqError::NotFound(_))
        ));

        let letters = dlq.dead_letters(10).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].event.event_type(), "b");
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dlq.db");
        let clock = ManualClock::starting_now();

        {
            let dlq = SqliteDeadLetterQueue::open(&path, Arc::new(clock.clone()), DlqSettings::default())
                .unwrap();
            dlq.enqueue(event("a"), "timeout").await.unwrap();
        }

        let dlq = SqliteDeadLetterQueue::open(&path, Arc::new(clock.clone()), DlqSettings::default())
            .unwrap();
        assert_eq!(dlq.pending_len().await.unwrap(), 1);
    }
}
