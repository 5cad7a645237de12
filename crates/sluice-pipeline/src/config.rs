//! Pipeline configuration.

use serde::{Deserialize, Serialize};
use sluice_core::config::{ControllerConfig, RetryPolicy};
use std::time::Duration;

/// Configuration for the [`crate::RequestProcessor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of handlers running at once across all streams.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Requests fetched from the queue per read.
    #[serde(default = "default_read_batch_size")]
    pub read_batch_size: usize,

    /// Upper bound on how long an idle subscription sleeps before
    /// re-reading the queue.
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,

    /// Backoff for `Retryable` outcomes.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_read_batch_size() -> usize {
    64
}

fn default_idle_wait_ms() -> u64 {
    100
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            read_batch_size: default_read_batch_size(),
            idle_wait_ms: default_idle_wait_ms(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    pub fn with_read_batch_size(mut self, size: usize) -> Self {
        self.read_batch_size = size;
        self
    }

    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl From<&ControllerConfig> for PipelineConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            worker_pool_size: config.worker_pool_size,
            read_batch_size: config.read_batch_size,
            idle_wait_ms: config.completion_poll_interval_ms.max(1),
            retry: config.retry.clone(),
        }
    }
}
