//! Configuration types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for audit delivery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Producer-facing buffer and batching.
    pub buffer: BufferConfig,
    /// In-process retry of batch writes.
    pub retry: RetryConfig,
    /// Dead-letter queue.
    pub dlq: DlqConfig,
    /// Out-of-band retry worker.
    pub worker: WorkerConfig,
    /// Audit store used by the standalone worker.
    pub storage: StorageConfig,
}

/// Buffer and batching configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum number of buffered events.
    pub capacity: usize,
    /// Events per batch; reaching it triggers a flush.
    pub batch_size: usize,
    /// Maximum time between flushes (ms).
    pub flush_interval_ms: u64,
    /// Deadline for a single storage write (ms).
    pub write_timeout_ms: u64,
    /// How long `close` waits for the final flush (ms).
    pub shutdown_timeout_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            batch_size: 100,
            flush_interval_ms: 1_000,
            write_timeout_ms: 10_000,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl BufferConfig {
    /// Flush interval as a duration.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Per-write deadline as a duration.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Shutdown timeout as a duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Shape of the delay between in-process write attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffFormula {
    /// `base * attempt^2`
    #[default]
    Quadratic,
    /// `base * 2^(attempt - 1)`
    Exponential,
    /// `base`
    Fixed,
}

/// In-process retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total write attempts per batch, including the first.
    pub max_attempts: u32,
    /// Backoff formula.
    pub backoff: BackoffFormula,
    /// Base delay (ms).
    pub base_delay_ms: u64,
    /// Upper bound on a single delay (ms).
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffFormula::Quadratic,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

/// Dead-letter queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DlqConfig {
    /// SQLite database holding the queue.
    pub path: PathBuf,
    /// Maximum messages claimed per read.
    pub read_batch_size: usize,
    /// Age after which an unacknowledged claim lapses (ms).
    ///
    /// Must exceed `read_batch_size * worker.replay_timeout_ms`.
    pub claim_timeout_ms: u64,
    /// How often a blocked read re-checks for eligible messages (ms).
    pub poll_interval_ms: u64,
    /// Deadline for a single enqueue (ms).
    pub enqueue_timeout_ms: u64,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".tachikoma/audit-dlq.db"),
            read_batch_size: 50,
            claim_timeout_ms: 600_000,
            poll_interval_ms: 500,
            enqueue_timeout_ms: 5_000,
        }
    }
}

impl DlqConfig {
    /// Claim timeout as a duration.
    pub fn claim_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_timeout_ms)
    }

    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Enqueue deadline as a duration.
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }
}

/// Retry worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Consumer group shared by all worker replicas.
    pub consumer_group: String,
    /// Name of this consumer within the group.
    pub consumer_name: Option<String>,
    /// Delay before each retry, indexed by prior attempt count (seconds).
    pub schedule_secs: Vec<u64>,
    /// Failed replays before a message is dead-lettered.
    pub max_attempts: u32,
    /// Maximum time a read blocks waiting for messages (ms).
    pub read_wait_ms: u64,
    /// Deadline for a single replay write (ms).
    pub replay_timeout_ms: u64,
    /// Pause after a failed queue read (ms).
    pub error_backoff_ms: u64,
    /// Dead-letter immediately on permanent storage errors.
    pub dead_letter_on_permanent: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumer_group: "audit-retry".to_string(),
            consumer_name: None,
            schedule_secs: vec![60, 300, 900, 3_600, 14_400, 86_400],
            max_attempts: 6,
            read_wait_ms: 5_000,
            replay_timeout_ms: 10_000,
            error_backoff_ms: 1_000,
            dead_letter_on_permanent: false,
        }
    }
}

impl WorkerConfig {
    /// Configured consumer name, or `<host>-<pid>`.
    pub fn resolved_consumer_name(&self) -> String {
        match &self.consumer_name {
            Some(name) => name.clone(),
            None => {
                let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
                format!("{}-{}", host, std::process::id())
            }
        }
    }

    /// Schedule as durations.
    pub fn schedule(&self) -> Vec<Duration> {
        self.schedule_secs.iter().copied().map(Duration::from_secs).collect()
    }

    /// Read wait as a duration.
    pub fn read_wait(&self) -> Duration {
        Duration::from_millis(self.read_wait_ms)
    }

    /// Replay deadline as a duration.
    pub fn replay_timeout(&self) -> Duration {
        Duration::from_millis(self.replay_timeout_ms)
    }

    /// Error backoff as a duration.
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Audit store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database receiving audit events.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".tachikoma/audit.db"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = DeliveryConfig::default();
        assert_eq!(config.buffer.capacity, 10_000);
        assert_eq!(config.buffer.batch_size, 100);
        assert_eq!(config.buffer.flush_interval(), Duration::from_secs(1));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff, BackoffFormula::Quadratic);
        assert_eq!(config.worker.max_attempts, 6);
        assert_eq!(
            config.worker.schedule(),
            vec![
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(900),
                Duration::from_secs(3_600),
                Duration::from_secs(14_400),
                Duration::from_secs(86_400),
            ]
        );
    }

    #[test]
    fn test_partial_yaml_merges_with_defaults() {
        let yaml = r#"
buffer:
  capacity: 500
retry:
  backoff: exponential
worker:
  consumer_group: audit-replay
"#;
        let config: DeliveryConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.buffer.capacity, 500);
        assert_eq!(config.buffer.batch_size, 100);
        assert_eq!(config.retry.backoff, BackoffFormula::Exponential);
        assert_eq!(config.worker.consumer_group, "audit-replay");
        assert_eq!(config.worker.max_attempts, 6);
    }

    #[test]
    fn test_explicit_consumer_name_is_used() {
        let config = WorkerConfig {
            consumer_name: Some("replica-a".to_string()),
            ..WorkerConfig::default()
        };
        assert_eq!(config.resolved_consumer_name(), "replica-a");
    }

    #[test]
    fn test_generated_consumer_name_has_pid() {
        let name = WorkerConfig::default().resolved_consumer_name();
        assert!(name.ends_with(&std::process::id().to_string()));
    }
}
