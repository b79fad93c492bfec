//! Retry worker behaviour against in-memory and SQLite queues.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tachikoma_audit_delivery::{MemoryStorage, SqliteAuditStore, StorageClient, StorageError};
use tachikoma_audit_dlq::{
    Clock, DeadLetterQueue, DlqSettings, ManualClock, MemoryDeadLetterQueue, SqliteDeadLetterQueue,
};
use tachikoma_audit_retry::{PollSummary, RetryWorker};
use tachikoma_common_async::ShutdownHandle;
use tachikoma_common_config::WorkerConfig;
use tachikoma_test_utils::{assert_ok, event_seq, sample_event, sample_events, temp_db_path};

struct Harness {
    clock: ManualClock,
    dlq: Arc<MemoryDeadLetterQueue>,
    storage: Arc<MemoryStorage>,
    worker: RetryWorker,
}

fn worker_config(consumer: &str) -> WorkerConfig {
    WorkerConfig {
        consumer_name: Some(consumer.to_string()),
        read_wait_ms: 0,
        ..WorkerConfig::default()
    }
}

fn harness(config: WorkerConfig) -> Harness {
    let clock = ManualClock::starting_now();
    let dlq = Arc::new(MemoryDeadLetterQueue::new(
        Arc::new(clock.clone()),
        DlqSettings::default(),
    ));
    let storage = Arc::new(MemoryStorage::new());
    let worker = assert_ok!(RetryWorker::new(
        &config,
        dlq.clone(),
        storage.clone(),
        Arc::new(clock.clone()),
    ));
    Harness {
        clock,
        dlq,
        storage,
        worker,
    }
}

#[tokio::test]
async fn test_successful_replay_is_acked() {
    let h = harness(worker_config("replica-1"));
    let event = sample_event(7);
    assert_ok!(h.dlq.enqueue(event.clone(), "store unavailable").await);

    let summary = assert_ok!(h.worker.poll_once().await);
    assert_eq!(
        summary,
        PollSummary {
            claimed: 1,
            acked: 1,
            ..PollSummary::default()
        }
    );
    assert_eq!(h.storage.events(), vec![event]);
    assert_eq!(assert_ok!(h.dlq.pending_len().await), 0);
    assert_eq!(h.worker.metrics().acked, 1);
}

#[tokio::test]
async fn test_six_failures_follow_schedule_then_dead_letter() {
    let h = harness(worker_config("replica-1"));
    h.storage.set_unavailable(true);
    assert_ok!(h.dlq.enqueue(sample_event(0), "store unavailable").await);

    // First replay happens immediately after enqueue.
    let first = assert_ok!(h.worker.poll_once().await);
    assert_eq!(first.rescheduled, 1);

    let waits = [60u64, 300, 900, 3_600, 14_400];
    for (i, wait) in waits.iter().enumerate() {
        h.clock.advance(Duration::from_secs(wait - 1));
        let early = assert_ok!(h.worker.poll_once().await);
        assert_eq!(early.claimed, 0, "replay {} ran early", i + 2);

        h.clock.advance(Duration::from_secs(1));
        let due = assert_ok!(h.worker.poll_once().await);
        assert_eq!(due.claimed, 1, "replay {} did not run on time", i + 2);

        if i < waits.len() - 1 {
            assert_eq!(due.rescheduled, 1);
        } else {
            assert_eq!(due.dead_lettered, 1);
        }
    }

    assert_eq!(h.storage.call_count(), 6);
    assert_eq!(assert_ok!(h.dlq.pending_len().await), 0);

    let letters = assert_ok!(h.dlq.dead_letters(10).await);
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].attempts, 6);
    assert!(letters[0].last_error.contains("unavailable"));

    // Nothing left to retry, however long we wait.
    h.clock.advance(Duration::from_secs(7 * 86_400));
    assert_eq!(assert_ok!(h.worker.poll_once().await).claimed, 0);

    let metrics = h.worker.metrics();
    assert_eq!(metrics.replay_failures, 6);
    assert_eq!(metrics.rescheduled, 5);
    assert_eq!(metrics.dead_lettered, 1);
}

#[tokio::test]
async fn test_attempts_grow_and_recover() {
    let h = harness(worker_config("replica-1"));
    h.storage.fail_times(
        2,
        StorageError::Server {
            status: 502,
            message: "bad gateway".to_string(),
        },
    );
    assert_ok!(h.dlq.enqueue(sample_event(1), "timeout").await);

    let mut last_attempts = 0;
    let mut last_next = h.clock.now();
    for _ in 0..2 {
        assert_eq!(assert_ok!(h.worker.poll_once().await).rescheduled, 1);
        h.clock.advance(Duration::from_secs(86_400));

        // Peek through a separate group so the worker's group is unaffected.
        let peek = assert_ok!(h.dlq.read_messages("inspector", "peek", Duration::ZERO).await);
        assert!(peek[0].attempts() > last_attempts);
        assert!(peek[0].next_retry_at() > last_next);
        last_attempts = peek[0].attempts();
        last_next = peek[0].next_retry_at();
    }

    assert_eq!(assert_ok!(h.worker.poll_once().await).acked, 1);
    assert_eq!(h.storage.events().len(), 1);
}

#[tokio::test]
async fn test_permanent_errors_dead_letter_only_when_enabled() {
    let rejected = StorageError::Rejected {
        status: 400,
        message: "malformed".to_string(),
    };

    let lenient = harness(worker_config("replica-1"));
    lenient.storage.fail_next(rejected.clone());
    assert_ok!(lenient.dlq.enqueue(sample_event(0), "rejected").await);
    assert_eq!(assert_ok!(lenient.worker.poll_once().await).rescheduled, 1);

    let strict = harness(WorkerConfig {
        dead_letter_on_permanent: true,
        ..worker_config("replica-1")
    });
    strict.storage.fail_next(rejected);
    assert_ok!(strict.dlq.enqueue(sample_event(0), "rejected").await);
    assert_eq!(assert_ok!(strict.worker.poll_once().await).dead_lettered, 1);
    assert_eq!(assert_ok!(strict.dlq.dead_letters(1).await)[0].attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_replay_timeout_is_a_transient_failure() {
    let h = harness(WorkerConfig {
        replay_timeout_ms: 1_000,
        ..worker_config("replica-1")
    });
    h.storage.set_latency(Some(Duration::from_secs(30)));
    assert_ok!(h.dlq.enqueue(sample_event(0), "timeout").await);

    let summary = assert_ok!(h.worker.poll_once().await);
    assert_eq!(summary.rescheduled, 1);
    assert!(h.storage.events().is_empty());
}

#[tokio::test]
async fn test_unavailable_queue_surfaces_from_poll() {
    let h = harness(worker_config("replica-1"));
    h.dlq.set_available(false);

    assert!(h.worker.poll_once().await.is_err());
    assert_eq!(h.worker.metrics().queue_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_replays_until_shutdown() {
    let h = harness(WorkerConfig {
        read_wait_ms: 500,
        ..worker_config("replica-1")
    });
    let worker = Arc::new(h.worker);
    let shutdown = ShutdownHandle::new();

    let task = {
        let worker = Arc::clone(&worker);
        let signal = shutdown.subscribe();
        tokio::spawn(async move { worker.run(signal).await })
    };

    for event in sample_events(3) {
        assert_ok!(h.dlq.enqueue(event, "store unavailable").await);
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    shutdown.shutdown();
    assert_ok!(task.await);

    assert_eq!(h.storage.events().len(), 3);
    assert_eq!(worker.metrics().acked, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replicas_share_sqlite_queue_without_duplicates() {
    let (_dir, dlq_path) = temp_db_path("dlq.db");
    let (_store_dir, store_path) = temp_db_path("audit.db");
    let clock = ManualClock::starting_now();
    let settings = DlqSettings {
        read_batch_size: 5,
        ..DlqSettings::default()
    };

    let dlq: Arc<dyn DeadLetterQueue> = Arc::new(assert_ok!(SqliteDeadLetterQueue::open(
        &dlq_path,
        Arc::new(clock.clone()),
        settings,
    )));
    let storage = Arc::new(assert_ok!(SqliteAuditStore::open(&store_path)));
    let recorder = Arc::new(MemoryStorage::new());

    for event in sample_events(30) {
        assert_ok!(dlq.enqueue(event, "store unavailable").await);
    }

    let mut tasks = Vec::new();
    for name in ["replica-a", "replica-b", "replica-c"] {
        let worker = assert_ok!(RetryWorker::new(
            &worker_config(name),
            Arc::clone(&dlq),
            Arc::new(Tee {
                primary: storage.clone(),
                recorder: recorder.clone(),
            }),
            Arc::new(clock.clone()),
        ));
        tasks.push(tokio::spawn(async move {
            let mut total = 0;
            loop {
                let summary = worker.poll_once().await.unwrap();
                if summary.claimed == 0 {
                    return total;
                }
                total += summary.acked;
            }
        }));
    }

    let mut acked = 0;
    for task in tasks {
        acked += task.await.unwrap();
    }

    assert_eq!(acked, 30);
    assert_eq!(assert_ok!(storage.count().await), 30);
    let seqs: HashSet<usize> = recorder.events().iter().filter_map(event_seq).collect();
    assert_eq!(seqs.len(), 30);
    assert_eq!(recorder.events().len(), 30, "no event replayed twice");
    assert_eq!(assert_ok!(dlq.pending_len().await), 0);
}

/// Writes to the real store and records what was written.
struct Tee {
    primary: Arc<SqliteAuditStore>,
    recorder: Arc<MemoryStorage>,
}

#[async_trait::async_trait]
impl StorageClient for Tee {
    async fn store_batch(
        &self,
        ctx: &tachikoma_audit_delivery::WriteContext,
        events: &[tachikoma_audit_types::AuditEvent],
    ) -> Result<(), StorageError> {
        self.primary.store_batch(ctx, events).await?;
        self.recorder.store_batch(ctx, events).await
    }
}
