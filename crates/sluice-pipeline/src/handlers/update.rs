use super::run_transition;
use crate::handler::RequestHandler;
use async_trait::async_trait;
use sluice_core::error::{Result, SluiceError};
use sluice_core::traits::MetadataStore;
use sluice_core::types::{
    OperationKind, OperationPayload, OperationRequest, StreamRecord, TaskOutcome,
};
use std::sync::Arc;

/// UPDATING -> ACTIVE with the new configuration.
pub struct UpdateHandler {
    store: Arc<dyn MetadataStore>,
}

impl UpdateHandler {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RequestHandler for UpdateHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Update
    }

    async fn process(&self, request: &OperationRequest) -> TaskOutcome {
        run_transition(self.store.as_ref(), request, plan_update).await
    }
}

pub fn plan_update(record: &StreamRecord, request: &OperationRequest) -> Result<StreamRecord> {
    let OperationPayload::Update { configuration } = &request.payload else {
        return Err(SluiceError::InvalidArgument(format!(
            "update handler received {}",
            request.kind()
        )));
    };
    configuration.validate()?;

    let mut next = record.clone();
    next.configuration = configuration.clone();
    Ok(next)
}
