//! Environment variable handling.

use crate::types::DeliveryConfig;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Environment variable errors.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("failed to load .env file: {0}")]
    DotenvError(#[from] dotenvy::Error),
}

/// Environment variable names.
pub mod vars {
    pub const TACHIKOMA_CONFIG_PATH: &str = "TACHIKOMA_CONFIG_PATH";
    pub const TACHIKOMA_LOG_LEVEL: &str = "TACHIKOMA_LOG_LEVEL";

    // Delivery overrides
    pub const BUFFER_CAPACITY: &str = "TACHIKOMA_AUDIT_BUFFER_CAPACITY";
    pub const BATCH_SIZE: &str = "TACHIKOMA_AUDIT_BATCH_SIZE";
    pub const FLUSH_INTERVAL_MS: &str = "TACHIKOMA_AUDIT_FLUSH_INTERVAL_MS";
    pub const RETRY_MAX_ATTEMPTS: &str = "TACHIKOMA_AUDIT_RETRY_MAX_ATTEMPTS";
    pub const DLQ_PATH: &str = "TACHIKOMA_AUDIT_DLQ_PATH";
    pub const CONSUMER_GROUP: &str = "TACHIKOMA_AUDIT_CONSUMER_GROUP";
    pub const CONSUMER_NAME: &str = "TACHIKOMA_AUDIT_CONSUMER_NAME";
    pub const STORE_PATH: &str = "TACHIKOMA_AUDIT_STORE_PATH";

    pub const RUST_LOG: &str = "RUST_LOG";
}

/// Environment configuration.
pub struct Environment {
    _guard: (),
}

impl Environment {
    /// Initialize environment from `.env` then `.env.local` (later overrides earlier).
    pub fn init() -> Result<Self, EnvError> {
        for file in [".env", ".env.local"] {
            match dotenvy::from_filename_override(file) {
                Ok(_) => {}
                Err(e) if e.not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(Self { _guard: () })
    }
}

fn parse_int<T: FromStr>(var: &str, raw: Option<String>) -> Result<Option<T>, EnvError> {
    match raw {
        Some(v) => v.trim().parse().map(Some).map_err(|_| EnvError::InvalidValue {
            var: var.to_string(),
            message: format!("expected integer, got '{}'", v),
        }),
        None => Ok(None),
    }
}

/// Apply `TACHIKOMA_AUDIT_*` overrides from the process environment.
pub fn apply_env_overrides(config: &mut DeliveryConfig) -> Result<(), EnvError> {
    apply_overrides_with(config, |var| env::var(var).ok())
}

/// Apply overrides using an arbitrary variable lookup.
pub fn apply_overrides_with<F>(config: &mut DeliveryConfig, lookup: F) -> Result<(), EnvError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = parse_int(vars::BUFFER_CAPACITY, lookup(vars::BUFFER_CAPACITY))? {
        config.buffer.capacity = v;
    }
    if let Some(v) = parse_int(vars::BATCH_SIZE, lookup(vars::BATCH_SIZE))? {
        config.buffer.batch_size = v;
    }
    if let Some(v) = parse_int(vars::FLUSH_INTERVAL_MS, lookup(vars::FLUSH_INTERVAL_MS))? {
        config.buffer.flush_interval_ms = v;
    }
    if let Some(v) = parse_int(vars::RETRY_MAX_ATTEMPTS, lookup(vars::RETRY_MAX_ATTEMPTS))? {
        config.retry.max_attempts = v;
    }
    if let Some(path) = lookup(vars::DLQ_PATH) {
        config.dlq.path = PathBuf::from(path);
    }
    if let Some(group) = lookup(vars::CONSUMER_GROUP) {
        config.worker.consumer_group = group;
    }
    if let Some(name) = lookup(vars::CONSUMER_NAME) {
        config.worker.consumer_name = Some(name);
    }
    if let Some(path) = lookup(vars::STORE_PATH) {
        config.storage.path = PathBuf::from(path);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_integer_parsing() {
        assert_eq!(parse_int::<u32>("X", Some("42".into())).unwrap(), Some(42));
        assert_eq!(parse_int::<u32>("X", None).unwrap(), None);
        match parse_int::<u32>("X", Some("many".into())) {
            Err(EnvError::InvalidValue { var, message }) => {
                assert_eq!(var, "X");
                assert!(message.contains("many"));
            }
            other => panic!("Expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_overrides_apply_on_top_of_config() {
        let mut config = DeliveryConfig::default();
        let lookup = lookup_from(&[
            (vars::BUFFER_CAPACITY, "64"),
            (vars::BATCH_SIZE, "8"),
            (vars::RETRY_MAX_ATTEMPTS, "2"),
            (vars::DLQ_PATH, "/tmp/dlq.db"),
            (vars::CONSUMER_GROUP, "replayers"),
            (vars::CONSUMER_NAME, "replayer-1"),
        ]);

        apply_overrides_with(&mut config, lookup).unwrap();
        assert_eq!(config.buffer.capacity, 64);
        assert_eq!(config.buffer.batch_size, 8);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.dlq.path, PathBuf::from("/tmp/dlq.db"));
        assert_eq!(config.worker.consumer_group, "replayers");
        assert_eq!(config.worker.consumer_name.as_deref(), Some("replayer-1"));
        assert_eq!(config.buffer.flush_interval_ms, 1_000);
    }

    #[test]
    fn test_invalid_override_is_reported() {
        let mut config = DeliveryConfig::default();
        let result = apply_overrides_with(&mut config, lookup_from(&[(vars::BATCH_SIZE, "-3")]));
        assert!(matches!(result, Err(EnvError::InvalidValue { .. })));
    }

    #[test]
    fn test_environment_init_without_files() {
        assert!(Environment::init().is_ok());
    }
}
