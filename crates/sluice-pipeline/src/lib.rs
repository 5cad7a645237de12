//! Sluice Pipeline
//!
//! Consumes the durable request queue and drives each control operation from
//! its transitional state to its terminal state in the metadata store.
//!
//! # Overview
//!
//! - **Handlers**: one [`RequestHandler`] per operation kind, each a pure
//!   planning function plus a compare-and-swap commit
//! - **Dispatch**: a [`HandlerRegistry`] keyed by operation kind
//! - **Processor**: a worker pool that runs at most one handler per stream,
//!   retries transient failures with exponential backoff and acknowledges
//!   queue offsets only over a gap-free prefix of finished requests
//! - **Failures**: requests that fail terminally are kept in a
//!   [`FailedRequestLog`] and published to [`OutcomeListener`]s
//!
//! # Example
//!
//! ```ignore
//! use sluice_pipeline::prelude::*;
//!
//! let processor = Arc::new(
//!     RequestProcessor::builder(queue, HandlerRegistry::standard(store))
//!         .with_config(PipelineConfig::default().with_worker_pool_size(8))
//!         .build()?,
//! );
//! let shutdown = processor.shutdown_handle();
//! let task = processor.clone().spawn();
//! // ...
//! shutdown.shutdown();
//! task.await??;
//! ```

pub mod config;
pub mod error;
pub mod failures;
pub mod handler;
pub mod handlers;
pub mod processor;

pub mod prelude;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use failures::{FailedRequest, FailedRequestLog, DEFAULT_LEDGER_CAPACITY};
pub use handler::{HandlerRegistry, RequestHandler};
pub use processor::{ProcessorBuilder, RequestProcessor, ShutdownHandle};
pub use sluice_core::traits::OutcomeListener;
