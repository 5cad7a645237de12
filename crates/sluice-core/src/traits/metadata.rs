use crate::error::Result;
use crate::types::{StreamId, StreamRecord, StreamState};
use crate::notify::ChangeNotifier;
use async_trait::async_trait;

/// Result of a conditional write against the metadata store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult {
    /// Write applied; carries the record's new version.
    Success { version: u64 },
    /// No record for the stream.
    NotFound,
    /// Record exists (returned by inserts).
    AlreadyExists { version: u64 },
    /// Someone else wrote first.
    VersionMismatch { actual: u64 },
}

impl CasResult {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Durable, linearizable per-stream state.
///
/// All coordination between the gateway and the pipeline goes through
/// conditional writes keyed on `StreamRecord::version`. Implementations
/// bump the version on every successful write and never expose a partially
/// applied record.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new record (version assigned by the store).
    ///
    /// Returns `CasResult::AlreadyExists` if the stream is present.
    async fn insert_stream(&self, record: StreamRecord) -> Result<CasResult>;

    /// Read the current record.
    async fn get_stream(&self, id: &StreamId) -> Result<Option<StreamRecord>>;

    /// Replace the record if its version still equals `expected_version`.
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        record: StreamRecord,
    ) -> Result<CasResult>;

    /// Remove the record if its version still equals `expected_version`.
    async fn remove_stream(&self, id: &StreamId, expected_version: u64) -> Result<CasResult>;

    /// List streams in a scope.
    async fn list_streams(&self, scope: &str) -> Result<Vec<StreamId>>;

    /// Unconditionally force the state, clearing any in-flight request.
    ///
    /// Administrative override for operators and test fixtures.
    async fn set_state(&self, id: &StreamId, state: StreamState) -> Result<()>;

    /// Push notifications for record changes, keyed by `StreamId::key`.
    ///
    /// Stores without push support return `None` and are polled.
    fn change_notifier(&self) -> Option<ChangeNotifier> {
        None
    }
}
