//! Sluice: asynchronous control plane for streams
//!
//! Administrative operations on a stream (update, scale, seal, truncate,
//! delete) are accepted by a gateway, recorded on a durable request queue,
//! and carried out by an idempotent request pipeline. Callers wait on a
//! completion handle bounded by an adjustable timeout.
//!
//! - **Gateway** ([`ControllerService`]): synchronous precondition checks and
//!   a compare-and-swap claim of the stream before anything is enqueued
//! - **Completion tracker** ([`CompletionTracker`]): resolves each caller's
//!   handle from store observation, a pipeline failure, or the deadline,
//!   whichever comes first
//! - **Timeout governor** ([`TimeoutGovernor`]): the runtime-adjustable
//!   completion timeout
//! - **Controller** ([`Controller`]): wires store, queue, pipeline and
//!   tracker together and owns the pipeline task
//!
//! A caller timing out only stops waiting. The pipeline keeps working on
//! the request and the stream converges regardless.
//!
//! # Quick Start
//!
//! ```no_run
//! use sluice::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! let controller = Controller::in_memory(ControllerConfig::default())?;
//! controller.start();
//!
//! let stream = StreamId::new("scope", "orders");
//! let service = controller.service();
//! service
//!     .create_stream(stream.clone(), StreamConfiguration::new(ScalingPolicy::fixed(4)))
//!     .await?;
//! service.seal_stream(stream.clone()).await?;
//!
//! controller.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod gateway;
pub mod governor;
pub mod prelude;
pub mod tracker;

pub use controller::{Controller, ControllerBuilder};
pub use gateway::ControllerService;
pub use governor::TimeoutGovernor;
pub use tracker::{has_committed, CompletionTracker, OperationStatus, PendingOperation};

pub use sluice_core::{
    config::{ControllerConfig, RetryPolicy},
    error::{Result, SluiceError},
    observe::{ControllerMetrics, MetricsSnapshot},
    traits::{
        CasResult, Host, HostDiscovery, MetadataStore, OutcomeListener, RequestQueue,
        StaticHostDiscovery,
    },
    types::{
        KeyRange, OperationKind, OperationPayload, OperationRequest, RequestId, RetentionPolicy,
        ScaleDirection, ScaleRequest, ScalingPolicy, Segment, StreamConfiguration, StreamCut,
        StreamId, StreamRecord, StreamState, TaskOutcome, TaskResult,
    },
};
pub use sluice_pipeline::{FailedRequest, FailedRequestLog, RequestHandler};
pub use sluice_queue::{FileQueueConfig, FileRequestQueue, InMemoryRequestQueue};
pub use sluice_store::InMemoryMetadataStore;
