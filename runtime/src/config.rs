//! Configuration for the Store and the Effect Orchestrator.
//!
//! Both configs are plain builder-style structs with sensible defaults. They
//! can also be read from `STATELY_*` environment variables:
//!
//! | Variable | Field | Default |
//! |---|---|---|
//! | `STATELY_STORE_LABEL` | `StoreConfig::label` | `store` |
//! | `STATELY_QUEUE_WARN_THRESHOLD` | `StoreConfig::queue_warn_threshold` | `1024` |
//! | `STATELY_DLQ_MAX_SIZE` | `OrchestratorConfig::dlq_max_size` | `1000` |
//! | `STATELY_EFFECT_MAX_RETRIES` | `OrchestratorConfig::default_retry.max_retries` | `0` |
//! | `STATELY_EFFECT_RETRY_DELAY_MS` | `OrchestratorConfig::default_retry.initial_delay` | `100` |
//! | `STATELY_SHUTDOWN_TIMEOUT_MS` | `OrchestratorConfig::shutdown_timeout` | `5000` |
//!
//! # Example
//!
//! ```ignore
//! let store_config = StoreConfig::from_env()?.with_label("books");
//! let orchestrator_config = OrchestratorConfig::default()
//!     .with_dlq_max_size(500)
//!     .with_shutdown_timeout(Duration::from_secs(2));
//! ```

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable holds a value that does not parse
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
    },

    /// Configuration validation failed
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key, value })
        })
        .transpose()
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Configuration for Store instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Label attached to logs and metrics of this store
    pub label: String,
    /// Pending-queue length at which a warning is logged
    pub queue_warn_threshold: usize,
}

impl StoreConfig {
    /// Load configuration from `STATELY_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set but invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(label) = lookup("STATELY_STORE_LABEL") {
            config.label = label;
        }
        if let Some(threshold) = parse_var(&lookup, "STATELY_QUEUE_WARN_THRESHOLD")? {
            config.queue_warn_threshold = threshold;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for an empty label or a zero
    /// queue threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.label.trim().is_empty() {
            return Err(ConfigError::Validation("store label must not be empty".to_string()));
        }
        if self.queue_warn_threshold == 0 {
            return Err(ConfigError::Validation(
                "queue_warn_threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the store label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the queue warning threshold
    #[must_use]
    pub const fn with_queue_warn_threshold(mut self, threshold: usize) -> Self {
        self.queue_warn_threshold = threshold;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            label: "store".to_string(),
            queue_warn_threshold: 1024,
        }
    }
}

/// Configuration for the Effect Orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum size of the dead letter queue
    pub dlq_max_size: usize,
    /// Retry policy for effects that do not declare their own
    pub default_retry: RetryPolicy,
    /// How long `shutdown` waits for workers before aborting them
    pub shutdown_timeout: Duration,
}

impl OrchestratorConfig {
    /// Load configuration from `STATELY_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set but invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(size) = parse_var(&lookup, "STATELY_DLQ_MAX_SIZE")? {
            config.dlq_max_size = size;
        }
        if let Some(retries) = parse_var(&lookup, "STATELY_EFFECT_MAX_RETRIES")? {
            config.default_retry.max_retries = retries;
        }
        if let Some(delay_ms) = parse_var(&lookup, "STATELY_EFFECT_RETRY_DELAY_MS")? {
            config.default_retry.initial_delay = Duration::from_millis(delay_ms);
        }
        if let Some(timeout_ms) = parse_var(&lookup, "STATELY_SHUTDOWN_TIMEOUT_MS")? {
            config.shutdown_timeout = Duration::from_millis(timeout_ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for a zero shutdown timeout or a
    /// non-positive backoff multiplier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "shutdown_timeout must be greater than zero".to_string(),
            ));
        }
        if self.default_retry.multiplier <= 0.0 {
            return Err(ConfigError::Validation(
                "retry multiplier must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the DLQ maximum size
    #[must_use]
    pub const fn with_dlq_max_size(mut self, max_size: usize) -> Self {
        self.dlq_max_size = max_size;
        self
    }

    /// Set the default retry policy
    #[must_use]
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    /// Set the shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dlq_max_size: 1000,
            default_retry: RetryPolicy::none(),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}
