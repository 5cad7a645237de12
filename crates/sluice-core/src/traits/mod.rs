pub mod cluster;
pub mod metadata;
pub mod queue;

pub use cluster::{Host, HostDiscovery, StaticHostDiscovery};
pub use metadata::{CasResult, MetadataStore};
pub use queue::{QueueOffset, QueuedRequest, RequestQueue, APPEND_WAKE_KEY};

use crate::types::{OperationRequest, TaskOutcome};

/// Receives terminal outcomes published by the pipeline.
pub trait OutcomeListener: Send + Sync {
    fn on_outcome(&self, request: &OperationRequest, outcome: &TaskOutcome);
}
