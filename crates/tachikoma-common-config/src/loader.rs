//! Configuration file loading and validation.

use crate::env::apply_env_overrides;
use crate::types::DeliveryConfig;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

/// Location of the config file relative to the project directory.
pub const CONFIG_FILE: &str = ".tachikoma/audit-delivery.yaml";

/// Config loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed to read config: {source}")]
    ReadError {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid YAML at line {}: {message}", line.map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    ParseError { line: Option<usize>, message: String },

    #[error("validation error: {message}")]
    ValidationError { message: String },

    #[error("environment variable not found: {var}")]
    EnvVarNotFound { var: String },

    #[error(transparent)]
    Env(#[from] crate::env::EnvError),
}

/// Configuration loader.
pub struct ConfigLoader {
    base_path: PathBuf,
}

impl ConfigLoader {
    /// Create a loader for the given project directory.
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            base_path: project_dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the config file this loader reads.
    pub fn config_path(&self) -> PathBuf {
        self.base_path.join(CONFIG_FILE)
    }

    /// Load configuration, falling back to defaults when no file exists.
    ///
    /// Environment overrides are applied in both cases.
    pub fn load(&self) -> Result<DeliveryConfig, ConfigError> {
        let config_path = self.config_path();

        let mut config = if config_path.exists() {
            self.parse_file(&config_path)?
        } else {
            DeliveryConfig::default()
        };

        apply_env_overrides(&mut config)?;
        validate(&config)?;
        Ok(config)
    }

    /// Load configuration from an explicit file, which must exist.
    pub fn load_from(&self, path: impl AsRef<Path>) -> Result<DeliveryConfig, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let mut config = self.parse_file(path)?;
        apply_env_overrides(&mut config)?;
        validate(&config)?;
        Ok(config)
    }

    fn parse_file(&self, path: &Path) -> Result<DeliveryConfig, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let expanded = self.expand_env_vars(&contents)?;

        serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError {
            line: e.location().map(|l| l.line()),
            message: e.to_string(),
        })
    }

    /// Expand environment variables in the form `${VAR}` or `${VAR:-default}`.
    fn expand_env_vars(&self, content: &str) -> Result<String, ConfigError> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| {
            Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("env var pattern is valid")
        });

        let mut result = content.to_string();
        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let default = cap.get(2).map(|m| m.as_str());

            let value = match std::env::var(var_name) {
                Ok(v) => v,
                Err(_) => match default {
                    Some(d) => d.to_string(),
                    None => {
                        return Err(ConfigError::EnvVarNotFound {
                            var: var_name.to_string(),
                        })
                    }
                },
            };

            result = result.replace(&cap[0], &value);
        }

        Ok(result)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        message: message.into(),
    }
}

/// Validate configuration values.
pub fn validate(config: &DeliveryConfig) -> Result<(), ConfigError> {
    let buffer = &config.buffer;
    if buffer.capacity == 0 {
        return Err(invalid("buffer.capacity must be greater than 0"));
    }
    if buffer.batch_size == 0 {
        return Err(invalid("buffer.batch_size must be greater than 0"));
    }
    if buffer.batch_size > buffer.capacity {
        return Err(invalid("buffer.batch_size must not exceed buffer.capacity"));
    }
    if buffer.flush_interval_ms == 0 {
        return Err(invalid("buffer.flush_interval_ms must be greater than 0"));
    }
    if buffer.write_timeout_ms == 0 {
        return Err(invalid("buffer.write_timeout_ms must be greater than 0"));
    }

    if config.retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts must be greater than 0"));
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        return Err(invalid("retry.max_delay_ms must be at least retry.base_delay_ms"));
    }

    if config.dlq.read_batch_size == 0 {
        return Err(invalid("dlq.read_batch_size must be greater than 0"));
    }
    if config.dlq.poll_interval_ms == 0 {
        return Err(invalid("dlq.poll_interval_ms must be greater than 0"));
    }
    if config.dlq.claim_timeout_ms == 0 {
        return Err(invalid("dlq.claim_timeout_ms must be greater than 0"));
    }

    let worker = &config.worker;
    if worker.consumer_group.trim().is_empty() {
        return Err(invalid("worker.consumer_group must not be empty"));
    }
    if worker.max_attempts == 0 {
        return Err(invalid("worker.max_attempts must be greater than 0"));
    }
    if worker.schedule_secs.is_empty() {
        return Err(invalid("worker.schedule_secs must not be empty"));
    }
    if worker.schedule_secs.iter().any(|s| *s == 0) {
        return Err(invalid("worker.schedule_secs entries must be greater than 0"));
    }
    if worker.schedule_secs.windows(2).any(|w| w[1] < w[0]) {
        return Err(invalid("worker.schedule_secs must be non-decreasing"));
    }
    if worker.replay_timeout_ms == 0 {
        return Err(invalid("worker.replay_timeout_ms must be greater than 0"));
    }

    // A claim must outlive the slowest replay of a full batch, or the tail
    // of the batch lapses and is claimed again while still in hand.
    let batch_replay_ms = (config.dlq.read_batch_size as u64).saturating_mul(worker.replay_timeout_ms);
    if config.dlq.claim_timeout_ms <= batch_replay_ms {
        return Err(invalid(format!(
            "dlq.claim_timeout_ms ({}) must exceed dlq.read_batch_size * worker.replay_timeout_ms ({})",
            config.dlq.claim_timeout_ms, batch_replay_ms
        )));
    }

    Ok(())
}
