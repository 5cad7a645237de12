//! Sluice Core: types and capability traits for the stream control plane
//!
//! This crate defines the shared vocabulary of the control plane:
//! - Stream model: identity, lifecycle state, configuration, segments, cuts
//! - Operation requests flowing through the durable request queue
//! - Capability traits injected into the gateway and pipeline
//!   (metadata store, request queue, host discovery, outcome listeners)
//! - Error taxonomy, configuration and the observability handle
//!
//! Key rules:
//! - The metadata store is the single source of truth for stream state
//! - Every state change is a versioned compare-and-swap
//! - Control operations are recorded durably before they are acted upon

pub mod config;
pub mod error;
pub mod notify;
pub mod observe;
pub mod traits;
pub mod types;

pub use config::{ControllerConfig, RetryPolicy};
pub use error::{Result, SluiceError};
pub use observe::{ControllerMetrics, MetricsSnapshot};
pub use traits::{
    CasResult, Host, HostDiscovery, MetadataStore, OutcomeListener, QueueOffset, QueuedRequest,
    RequestQueue, StaticHostDiscovery, APPEND_WAKE_KEY,
};
pub use types::{
    KeyRange, OperationKind, OperationPayload, OperationRequest, RequestId, RetentionPolicy,
    ScaleDirection, ScaleRequest, ScalingPolicy, Segment, StreamConfiguration, StreamCut, StreamId,
    StreamRecord, StreamState, TaskOutcome, TaskResult,
};
pub use notify::ChangeNotifier;
