use crate::types::{OperationKind, RequestId, StreamId, StreamState};
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SluiceError {
    #[error("Precondition failed: {operation} not allowed on stream {stream} in state {state}")]
    PreconditionFailed {
        stream: StreamId,
        operation: OperationKind,
        state: StreamState,
    },

    #[error("Conflict: another operation is transitioning stream {0}")]
    Conflict(StreamId),

    #[error("Queue append failed: {0}")]
    QueueAppendFailed(String),

    #[error("Queue append failed ({append_error}) and stream {stream} could not be released: {reason}")]
    ReleaseFailed {
        stream: StreamId,
        append_error: String,
        reason: String,
    },

    #[error("Deadline exceeded after {timeout:?} waiting for request {request_id}")]
    DeadlineExceeded {
        request_id: RequestId,
        timeout: Duration,
    },

    #[error("Request {request_id} failed: {reason}")]
    PipelineFailure { request_id: RequestId, reason: String },

    #[error("Stream not found: {0}")]
    StreamNotFound(StreamId),

    #[error("Stream already exists: {0}")]
    StreamExists(StreamId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shutting down")]
    ShuttingDown,

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl SluiceError {
    /// Whether a pipeline handler should retry after this error.
    ///
    /// Only transient infrastructure failures qualify; anything describing the
    /// request or the stream itself is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SluiceError::StoreUnavailable(_) | SluiceError::Io(_) | SluiceError::Queue(_)
        )
    }
}

impl From<serde_json::Error> for SluiceError {
    fn from(err: serde_json::Error) -> Self {
        SluiceError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SluiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_infrastructure_errors_are_retryable() {
        assert!(SluiceError::StoreUnavailable("down".into()).is_retryable());
        assert!(SluiceError::Queue("closed".into()).is_retryable());
        assert!(!SluiceError::Conflict(StreamId::new("s", "t")).is_retryable());
        assert!(!SluiceError::InvalidArgument("bad".into()).is_retryable());
    }

    #[test]
    fn precondition_message_names_operation_and_state() {
        let err = SluiceError::PreconditionFailed {
            stream: StreamId::new("scope", "orders"),
            operation: OperationKind::Delete,
            state: StreamState::Active,
        };
        let msg = err.to_string();
        assert!(msg.contains("delete"));
        assert!(msg.contains("scope/orders"));
        assert!(msg.contains("ACTIVE"));
    }
}
