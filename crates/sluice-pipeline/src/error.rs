//! Error types for the pipeline.

use sluice_core::error::SluiceError;
use sluice_core::types::OperationKind;
use std::io;
use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that stop the pipeline itself; per-request failures are
/// [`sluice_core::TaskOutcome`]s instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No handler registered for an operation kind.
    #[error("No handler registered for {0}")]
    HandlerNotFound(OperationKind),

    /// `run` called while the processor is already running.
    #[error("Pipeline is already running")]
    AlreadyRunning,

    /// Failed-request ledger could not be read or written.
    #[error("Failed-request ledger error: {0}")]
    Ledger(#[from] io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error from the queue or another injected capability.
    #[error(transparent)]
    Core(#[from] SluiceError),
}

impl From<PipelineError> for SluiceError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Core(e) => e,
            PipelineError::Ledger(e) => SluiceError::Io(e),
            other => SluiceError::Other(anyhow::Error::new(other)),
        }
    }
}
