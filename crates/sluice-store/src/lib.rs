//! In-memory metadata store for sluice.
//!
//! [`InMemoryMetadataStore`] implements [`MetadataStore`] with a single
//! `RwLock`-guarded map, which makes every operation linearizable within one
//! process. It is the substitute for the networked store in tests and local
//! development.
//!
//! ## Limitations
//!
//! - **NOT durable**: all state is lost when the process exits
//! - **Single-process only**: no coordination across process boundaries

mod memory;

pub use memory::InMemoryMetadataStore;
pub use sluice_core::traits::{CasResult, MetadataStore};
