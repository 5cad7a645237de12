use crate::types::request::RequestId;
use serde::{Deserialize, Serialize};

/// Result of one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "reason", rename_all = "snake_case")]
pub enum TaskResult {
    Succeeded,
    /// Terminal; the stream is left in a well-defined state.
    Failed(String),
    /// Transient; the pipeline reschedules with backoff.
    Retryable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub request_id: RequestId,
    pub result: TaskResult,
}

impl TaskOutcome {
    pub fn succeeded(request_id: RequestId) -> Self {
        Self {
            request_id,
            result: TaskResult::Succeeded,
        }
    }

    pub fn failed(request_id: RequestId, reason: impl Into<String>) -> Self {
        Self {
            request_id,
            result: TaskResult::Failed(reason.into()),
        }
    }

    pub fn retryable(request_id: RequestId, reason: impl Into<String>) -> Self {
        Self {
            request_id,
            result: TaskResult::Retryable(reason.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.result, TaskResult::Retryable(_))
    }
}
