pub mod config;
pub mod failures;
pub mod queue;
