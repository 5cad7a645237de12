//! Timeout governor
//!
//! Holds the completion timeout as a shared atomic so it can be changed while
//! the controller runs. The value is read when an operation registers; an
//! operation already waiting keeps the deadline it started with.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TimeoutGovernor {
    timeout_ms: Arc<AtomicU64>,
}

impl TimeoutGovernor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout_ms: Arc::new(AtomicU64::new(as_millis(timeout))),
        }
    }

    /// Timeout applied to operations registered from now on
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Acquire))
    }

    pub fn set_completion_timeout(&self, timeout: Duration) {
        let previous = self.timeout_ms.swap(as_millis(timeout), Ordering::AcqRel);
        tracing::info!(
            previous_ms = previous,
            timeout_ms = as_millis(timeout),
            "Completion timeout changed"
        );
    }
}

fn as_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1)
}
