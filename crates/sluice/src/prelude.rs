//! Sluice Prelude
//!
//! ```
//! use sluice::prelude::*;
//! ```

// Entry points
pub use crate::{Controller, ControllerBuilder, ControllerService};

// Completion
pub use crate::{CompletionTracker, OperationStatus, PendingOperation, TimeoutGovernor};

// Core types
pub use crate::{
    OperationPayload, Result, ScaleDirection, ScaleRequest, ScalingPolicy, SluiceError,
    StreamConfiguration, StreamCut, StreamId, StreamRecord, StreamState,
};

// Configs
pub use crate::{ControllerConfig, FileQueueConfig, RetryPolicy};

// Traits
pub use crate::{MetadataStore, OutcomeListener, RequestHandler, RequestQueue};

// Implementations
pub use crate::{FileRequestQueue, InMemoryMetadataStore, InMemoryRequestQueue};

pub use std::sync::Arc;
pub use std::time::Duration;
