use super::run_transition;
use crate::handler::RequestHandler;
use async_trait::async_trait;
use sluice_core::error::{Result, SluiceError};
use sluice_core::traits::MetadataStore;
use sluice_core::types::{
    OperationKind, OperationPayload, OperationRequest, StreamRecord, TaskOutcome,
};
use std::sync::Arc;

/// TRUNCATING -> the state the stream had before (ACTIVE or SEALED).
pub struct TruncateHandler {
    store: Arc<dyn MetadataStore>,
}

impl TruncateHandler {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RequestHandler for TruncateHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Truncate
    }

    async fn process(&self, request: &OperationRequest) -> TaskOutcome {
        run_transition(self.store.as_ref(), request, plan_truncate).await
    }
}

/// Record the cut as the stream's truncation point.
///
/// The cut may only name segments that are currently active.
pub fn plan_truncate(record: &StreamRecord, request: &OperationRequest) -> Result<StreamRecord> {
    let OperationPayload::Truncate { cut, .. } = &request.payload else {
        return Err(SluiceError::InvalidArgument(format!(
            "truncate handler received {}",
            request.kind()
        )));
    };
    if cut.is_empty() {
        return Err(SluiceError::InvalidArgument("empty stream cut".into()));
    }
    if let Some(unknown) = cut
        .positions
        .keys()
        .find(|segment| record.segment(**segment).is_none())
    {
        return Err(SluiceError::InvalidArgument(format!(
            "stream cut references inactive segment {unknown}"
        )));
    }

    let mut next = record.clone();
    next.truncation = Some(cut.clone());
    Ok(next)
}
