use async_trait::async_trait;
use parking_lot::RwLock;
use sluice_core::error::{Result, SluiceError};
use sluice_core::traits::{CasResult, MetadataStore};
use sluice_core::types::{StreamId, StreamRecord, StreamState};
use sluice_core::notify::ChangeNotifier;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// In-memory store for tests and development.
///
/// Writes bump `StreamRecord::version` and notify waiters keyed by
/// `StreamId::key`. Transient failures can be injected with
/// [`InMemoryMetadataStore::fail_next`].
#[derive(Debug)]
pub struct InMemoryMetadataStore {
    streams: RwLock<BTreeMap<StreamId, StreamRecord>>,
    notifier: ChangeNotifier,
    injected_failures: AtomicU32,
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(BTreeMap::new()),
            notifier: ChangeNotifier::new(),
            injected_failures: AtomicU32::new(0),
        }
    }

    /// Make the next `count` operations fail with `StoreUnavailable`.
    pub fn fail_next(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }

    fn check_available(&self) -> Result<()> {
        let consumed = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(SluiceError::StoreUnavailable(
                "injected metadata store failure".into(),
            )),
            Err(_) => Ok(()),
        }
    }

    fn changed(&self, id: &StreamId) {
        self.notifier.notify(&id.key());
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn insert_stream(&self, mut record: StreamRecord) -> Result<CasResult> {
        self.check_available()?;
        let id = record.id.clone();
        let result = {
            let mut streams = self.streams.write();
            if let Some(existing) = streams.get(&id) {
                CasResult::AlreadyExists {
                    version: existing.version,
                }
            } else {
                record.version = 1;
                streams.insert(id.clone(), record);
                CasResult::Success { version: 1 }
            }
        };
        if result.is_success() {
            tracing::debug!(stream = %id, "Inserted stream record");
            self.changed(&id);
        }
        Ok(result)
    }

    async fn get_stream(&self, id: &StreamId) -> Result<Option<StreamRecord>> {
        self.check_available()?;
        Ok(self.streams.read().get(id).cloned())
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        mut record: StreamRecord,
    ) -> Result<CasResult> {
        self.check_available()?;
        let id = record.id.clone();
        let result = {
            let mut streams = self.streams.write();
            match streams.get_mut(&id) {
                None => CasResult::NotFound,
                Some(current) if current.version != expected_version => {
                    CasResult::VersionMismatch {
                        actual: current.version,
                    }
                }
                Some(current) => {
                    record.version = expected_version + 1;
                    *current = record;
                    CasResult::Success {
                        version: expected_version + 1,
                    }
                }
            }
        };
        if result.is_success() {
            self.changed(&id);
        }
        Ok(result)
    }

    async fn remove_stream(&self, id: &StreamId, expected_version: u64) -> Result<CasResult> {
        self.check_available()?;
        let result = {
            let mut streams = self.streams.write();
            match streams.get(id) {
                None => CasResult::NotFound,
                Some(current) if current.version != expected_version => {
                    CasResult::VersionMismatch {
                        actual: current.version,
                    }
                }
                Some(_) => {
                    streams.remove(id);
                    CasResult::Success {
                        version: expected_version + 1,
                    }
                }
            }
        };
        if result.is_success() {
            tracing::debug!(stream = %id, "Removed stream record");
            self.changed(id);
        }
        Ok(result)
    }

    async fn list_streams(&self, scope: &str) -> Result<Vec<StreamId>> {
        self.check_available()?;
        Ok(self
            .streams
            .read()
            .keys()
            .filter(|id| id.scope == scope)
            .cloned()
            .collect())
    }

    async fn set_state(&self, id: &StreamId, state: StreamState) -> Result<()> {
        self.check_available()?;
        {
            let mut streams = self.streams.write();
            let record = streams
                .get_mut(id)
                .ok_or_else(|| SluiceError::StreamNotFound(id.clone()))?;
            record.state = state;
            record.active_request = None;
            record.version += 1;
        }
        tracing::warn!(stream = %id, state = %state, "Stream state forced");
        self.changed(id);
        Ok(())
    }

    fn change_notifier(&self) -> Option<ChangeNotifier> {
        Some(self.notifier.clone())
    }
}
