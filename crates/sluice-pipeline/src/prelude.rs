//! Convenience re-exports for common types.

pub use crate::config::PipelineConfig;
pub use crate::error::{PipelineError, Result};
pub use crate::failures::{FailedRequest, FailedRequestLog};
pub use crate::handler::{HandlerRegistry, RequestHandler};
pub use crate::processor::{ProcessorBuilder, RequestProcessor, ShutdownHandle};
pub use sluice_core::traits::{MetadataStore, OutcomeListener, RequestQueue};
pub use sluice_core::types::{OperationKind, OperationRequest, TaskOutcome, TaskResult};
pub use std::sync::Arc;
