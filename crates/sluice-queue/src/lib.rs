//! Durable request queue for the sluice control plane
//!
//! The gateway appends every accepted control operation here before it
//! acknowledges the caller; the pipeline consumes from the last acknowledged
//! offset, so an unfinished request is delivered again after a restart.
//!
//! Two implementations of [`RequestQueue`] are provided:
//! - [`FileRequestQueue`]: single append-only log file plus a `meta.json` cursor
//! - [`InMemoryRequestQueue`]: non-durable, with append failure injection for tests
//!
//! [`Subscription`] and [`AckWindow`] are the consumer side: a restartable
//! reader and a tracker that only advances the acknowledgement over a
//! contiguous prefix of finished offsets.

mod config;
mod error;
mod file;
mod memory;
mod subscription;

pub use config::FileQueueConfig;
pub use error::QueueError;
pub use file::{FileRequestQueue, QueueStats};
pub use memory::InMemoryRequestQueue;
pub use sluice_core::traits::{QueueOffset, QueuedRequest, RequestQueue, APPEND_WAKE_KEY};
pub use subscription::{AckWindow, Subscription};
