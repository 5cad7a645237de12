use super::{load, outcome_for_error, Loaded};
use crate::handler::RequestHandler;
use async_trait::async_trait;
use sluice_core::error::Result;
use sluice_core::traits::{CasResult, MetadataStore};
use sluice_core::types::{OperationKind, OperationRequest, TaskOutcome};
use std::sync::Arc;
use tracing::info;

/// DELETING -> record removed.
///
/// There is nothing to plan; the effect is a conditional removal.
pub struct DeleteHandler {
    store: Arc<dyn MetadataStore>,
}

impl DeleteHandler {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    async fn remove(&self, request: &OperationRequest) -> Result<TaskOutcome> {
        let record = match load(self.store.as_ref(), request).await? {
            Loaded::Owned(record) => record,
            Loaded::Settled(outcome) => return Ok(outcome),
        };

        let id = request.request_id;
        let outcome = match self.store.remove_stream(&record.id, record.version).await? {
            CasResult::Success { .. } => {
                info!(request_id = %id, stream = %request.stream, "Deleted stream");
                TaskOutcome::succeeded(id)
            }
            CasResult::NotFound => TaskOutcome::succeeded(id),
            CasResult::VersionMismatch { actual } => TaskOutcome::retryable(
                id,
                format!("stream record changed underneath (version {actual})"),
            ),
            CasResult::AlreadyExists { .. } => TaskOutcome::failed(id, "unexpected store response"),
        };
        Ok(outcome)
    }
}

#[async_trait]
impl RequestHandler for DeleteHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Delete
    }

    async fn process(&self, request: &OperationRequest) -> TaskOutcome {
        match self.remove(request).await {
            Ok(outcome) => outcome,
            Err(e) => outcome_for_error(request, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{active_record, claimed};
    use sluice_core::types::{OperationPayload, StreamState};
    use sluice_store::InMemoryMetadataStore;

    #[tokio::test]
    async fn delete_removes_record_and_redelivery_succeeds() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let mut record = active_record(1);
        record.state = StreamState::Sealed;
        let request = claimed(&store, record, OperationPayload::Delete).await;
        let handler = DeleteHandler::new(store.clone());

        assert_eq!(
            handler.process(&request).await,
            TaskOutcome::succeeded(request.request_id)
        );
        assert!(store.get_stream(&request.stream).await.unwrap().is_none());

        assert_eq!(
            handler.process(&request).await,
            TaskOutcome::succeeded(request.request_id)
        );
    }
}
