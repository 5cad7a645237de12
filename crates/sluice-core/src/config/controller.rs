use crate::config::retry::RetryPolicy;
use crate::error::{Result, SluiceError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the controller (gateway, completion tracking, pipeline)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// How long a caller waits for an operation before `DeadlineExceeded`
    /// Default: 2 minutes
    #[serde(default = "default_completion_timeout_ms")]
    pub completion_timeout_ms: u64,

    /// How often the completion tracker re-reads the store (milliseconds)
    /// Default: 50ms
    #[serde(default = "default_completion_poll_interval_ms")]
    pub completion_poll_interval_ms: u64,

    /// Number of handlers that may run concurrently across streams
    /// Default: 4
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Maximum requests read from the queue per fetch
    /// Default: 64
    #[serde(default = "default_read_batch_size")]
    pub read_batch_size: usize,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_completion_timeout_ms() -> u64 {
    120_000
}

fn default_completion_poll_interval_ms() -> u64 {
    50
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_read_batch_size() -> usize {
    64
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            completion_timeout_ms: default_completion_timeout_ms(),
            completion_poll_interval_ms: default_completion_poll_interval_ms(),
            worker_pool_size: default_worker_pool_size(),
            read_batch_size: default_read_batch_size(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data)
            .map_err(|e| SluiceError::Config(format!("invalid controller config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.completion_timeout_ms == 0 {
            return Err(SluiceError::Config(
                "completion_timeout_ms must be positive".into(),
            ));
        }
        if self.worker_pool_size == 0 {
            return Err(SluiceError::Config(
                "worker_pool_size must be at least 1".into(),
            ));
        }
        if self.read_batch_size == 0 {
            return Err(SluiceError::Config(
                "read_batch_size must be at least 1".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(SluiceError::Config(
                "retry.multiplier must be >= 1.0".into(),
            ));
        }
        Ok(())
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    pub fn completion_poll_interval(&self) -> Duration {
        Duration::from_millis(self.completion_poll_interval_ms)
    }

    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_completion_poll_interval(mut self, interval: Duration) -> Self {
        self.completion_poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    pub fn with_read_batch_size(mut self, size: usize) -> Self {
        self.read_batch_size = size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
