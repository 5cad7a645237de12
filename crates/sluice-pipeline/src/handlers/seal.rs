use super::run_transition;
use crate::handler::RequestHandler;
use async_trait::async_trait;
use sluice_core::error::{Result, SluiceError};
use sluice_core::traits::MetadataStore;
use sluice_core::types::{
    OperationKind, OperationPayload, OperationRequest, StreamRecord, TaskOutcome,
};
use std::sync::Arc;

/// SEALING -> SEALED.
pub struct SealHandler {
    store: Arc<dyn MetadataStore>,
}

impl SealHandler {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RequestHandler for SealHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Seal
    }

    async fn process(&self, request: &OperationRequest) -> TaskOutcome {
        run_transition(self.store.as_ref(), request, plan_seal).await
    }
}

/// Sealing keeps segments and configuration; only the state changes.
pub fn plan_seal(record: &StreamRecord, request: &OperationRequest) -> Result<StreamRecord> {
    if !matches!(request.payload, OperationPayload::Seal) {
        return Err(SluiceError::InvalidArgument(format!(
            "seal handler received {}",
            request.kind()
        )));
    }
    Ok(record.clone())
}
