use crate::error::QueueError;
use async_trait::async_trait;
use parking_lot::Mutex;
use sluice_core::traits::{QueueOffset, QueuedRequest, RequestQueue, APPEND_WAKE_KEY};
use sluice_core::types::OperationRequest;
use sluice_core::notify::ChangeNotifier;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<QueueOffset, OperationRequest>,
    next_offset: QueueOffset,
    acknowledged: QueueOffset,
}

/// Non-durable [`RequestQueue`] for tests and local development.
///
/// Appends can be made to fail with [`InMemoryRequestQueue::fail_next_appends`].
#[derive(Debug)]
pub struct InMemoryRequestQueue {
    state: Mutex<MemoryState>,
    notifier: ChangeNotifier,
    failing_appends: AtomicU32,
}

impl Default for InMemoryRequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRequestQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            notifier: ChangeNotifier::new(),
            failing_appends: AtomicU32::new(0),
        }
    }

    /// Reject the next `count` appends
    pub fn fail_next_appends(&self, count: u32) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    /// Total number of requests ever appended
    pub fn appended(&self) -> u64 {
        self.state.lock().next_offset
    }

    /// Requests not yet acknowledged
    pub fn pending(&self) -> Vec<OperationRequest> {
        let state = self.state.lock();
        state
            .entries
            .range(state.acknowledged..)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

#[async_trait]
impl RequestQueue for InMemoryRequestQueue {
    async fn append(&self, request: &OperationRequest) -> sluice_core::Result<QueueOffset> {
        let rejected = self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(QueueError::AppendRejected("injected append failure".into()).into());
        }

        let offset = {
            let mut state = self.state.lock();
            let offset = state.next_offset;
            state.entries.insert(offset, request.clone());
            state.next_offset += 1;
            offset
        };
        tracing::trace!(offset, request_id = %request.request_id, "Appended request");
        self.notifier.notify(APPEND_WAKE_KEY);
        Ok(offset)
    }

    async fn read_from(
        &self,
        from: QueueOffset,
        max: usize,
    ) -> sluice_core::Result<Vec<QueuedRequest>> {
        let state = self.state.lock();
        let from = from.max(state.acknowledged);
        Ok(state
            .entries
            .range(from..)
            .take(max)
            .map(|(offset, request)| QueuedRequest {
                offset: *offset,
                request: request.clone(),
            })
            .collect())
    }

    async fn acknowledge(&self, next: QueueOffset) -> sluice_core::Result<()> {
        let mut state = self.state.lock();
        if next > state.next_offset {
            return Err(QueueError::InvalidAcknowledge {
                requested: next,
                tail: state.next_offset,
            }
            .into());
        }
        state.acknowledged = state.acknowledged.max(next);
        Ok(())
    }

    async fn acknowledged(&self) -> sluice_core::Result<QueueOffset> {
        Ok(self.state.lock().acknowledged)
    }

    async fn tail(&self) -> sluice_core::Result<QueueOffset> {
        Ok(self.state.lock().next_offset)
    }

    fn append_notifier(&self) -> ChangeNotifier {
        self.notifier.clone()
    }
}
