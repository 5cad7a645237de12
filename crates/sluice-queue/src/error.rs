use sluice_core::error::SluiceError;
use sluice_core::traits::QueueOffset;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request of {size} bytes exceeds max_request_size {max}")]
    RequestTooLarge { size: usize, max: usize },

    #[error("Corrupt queue log at byte {position}: {reason}")]
    Corrupt { position: u64, reason: String },

    #[error("Cannot acknowledge up to {requested}: tail is {tail}")]
    InvalidAcknowledge {
        requested: QueueOffset,
        tail: QueueOffset,
    },

    #[error("Append rejected: {0}")]
    AppendRejected(String),

    #[error("Blocking queue task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, QueueError>;

impl From<QueueError> for SluiceError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Io(e) => SluiceError::Io(e),
            other => SluiceError::Queue(other.to_string()),
        }
    }
}
