//! Built-in handlers, one per operation kind.
//!
//! Every handler is split in two:
//! - a pure planning function `plan_*(record, request) -> StreamRecord` that
//!   computes the committed record, or rejects the request
//! - the shared store effect in this module, which commits the plan with a
//!   single compare-and-swap into the terminal state
//!
//! Idempotence comes from the record itself. A request whose id is already
//! `last_applied` has committed; a request that no longer owns the
//! transitional state is stale and is settled without touching the store.

mod delete;
mod scale;
mod seal;
mod truncate;
mod update;

pub use delete::DeleteHandler;
pub use scale::{plan_auto_scale, plan_scale, AutoScaleHandler, ScaleHandler};
pub use seal::{plan_seal, SealHandler};
pub use truncate::{plan_truncate, TruncateHandler};
pub use update::{plan_update, UpdateHandler};

use sluice_core::error::{Result, SluiceError};
use sluice_core::traits::{CasResult, MetadataStore};
use sluice_core::types::{OperationKind, OperationRequest, StreamRecord, TaskOutcome};
use tracing::{debug, info, warn};

/// Result of reading the record a request targets.
pub(crate) enum Loaded {
    /// The request owns the record's transitional state.
    Owned(StreamRecord),
    /// Nothing left to do; the outcome is already known.
    Settled(TaskOutcome),
}

pub(crate) async fn load(store: &dyn MetadataStore, request: &OperationRequest) -> Result<Loaded> {
    let id = request.request_id;
    let Some(record) = store.get_stream(&request.stream).await? else {
        if request.kind() == OperationKind::Delete {
            debug!(request_id = %id, stream = %request.stream, "Stream already removed");
            return Ok(Loaded::Settled(TaskOutcome::succeeded(id)));
        }
        return Ok(Loaded::Settled(TaskOutcome::failed(
            id,
            format!("stream {} not found", request.stream),
        )));
    };

    if record.last_applied == Some(id) {
        debug!(request_id = %id, stream = %request.stream, "Request already applied");
        return Ok(Loaded::Settled(TaskOutcome::succeeded(id)));
    }

    if !record.is_owned_by(&id) {
        warn!(
            request_id = %id,
            stream = %request.stream,
            state = %record.state,
            "Stale request no longer owns the stream, skipping"
        );
        return Ok(Loaded::Settled(TaskOutcome::succeeded(id)));
    }

    Ok(Loaded::Owned(record))
}

/// Load, plan and commit `request`, mapping errors to an outcome.
pub(crate) async fn run_transition<F>(
    store: &dyn MetadataStore,
    request: &OperationRequest,
    plan: F,
) -> TaskOutcome
where
    F: FnOnce(&StreamRecord, &OperationRequest) -> Result<StreamRecord>,
{
    match transition(store, request, plan).await {
        Ok(outcome) => outcome,
        Err(e) => outcome_for_error(request, e),
    }
}

async fn transition<F>(
    store: &dyn MetadataStore,
    request: &OperationRequest,
    plan: F,
) -> Result<TaskOutcome>
where
    F: FnOnce(&StreamRecord, &OperationRequest) -> Result<StreamRecord>,
{
    let record = match load(store, request).await? {
        Loaded::Owned(record) => record,
        Loaded::Settled(outcome) => return Ok(outcome),
    };

    let planned = match plan(&record, request) {
        Ok(planned) => planned,
        Err(e) if e.is_retryable() => return Err(e),
        Err(e) => {
            release(store, &record, request).await?;
            return Ok(TaskOutcome::failed(request.request_id, e.to_string()));
        }
    };

    commit(store, &record, planned, request).await
}

/// Commit `planned` into the request's terminal state.
pub(crate) async fn commit(
    store: &dyn MetadataStore,
    current: &StreamRecord,
    mut planned: StreamRecord,
    request: &OperationRequest,
) -> Result<TaskOutcome> {
    let id = request.request_id;
    let terminal = request.terminal_state().ok_or_else(|| {
        SluiceError::InvalidArgument(format!("{} has no terminal state to commit", request.kind()))
    })?;
    planned.state = terminal;
    planned.active_request = None;
    planned.last_applied = Some(id);

    let outcome = match store.compare_and_swap(current.version, planned).await? {
        CasResult::Success { version } => {
            info!(
                request_id = %id,
                stream = %request.stream,
                kind = %request.kind(),
                state = %terminal,
                version,
                "Committed request"
            );
            TaskOutcome::succeeded(id)
        }
        CasResult::VersionMismatch { actual } => TaskOutcome::retryable(
            id,
            format!("stream record changed underneath (version {actual})"),
        ),
        CasResult::NotFound => TaskOutcome::failed(id, "stream record disappeared"),
        CasResult::AlreadyExists { .. } => TaskOutcome::failed(id, "unexpected store response"),
    };
    Ok(outcome)
}

/// Put a rejected request's stream back into the state it had before the
/// gateway claimed it.
pub(crate) async fn release(
    store: &dyn MetadataStore,
    current: &StreamRecord,
    request: &OperationRequest,
) -> Result<()> {
    let mut released = current.clone();
    released.state = request.prior_state();
    released.active_request = None;

    match store.compare_and_swap(current.version, released).await? {
        CasResult::Success { .. } => {
            info!(
                request_id = %request.request_id,
                stream = %request.stream,
                state = %request.prior_state(),
                "Released stream after rejected request"
            );
        }
        other => {
            warn!(
                request_id = %request.request_id,
                stream = %request.stream,
                result = ?other,
                "Could not release stream after rejected request"
            );
        }
    }
    Ok(())
}

pub(crate) fn outcome_for_error(request: &OperationRequest, err: SluiceError) -> TaskOutcome {
    if err.is_retryable() {
        TaskOutcome::retryable(request.request_id, err.to_string())
    } else {
        TaskOutcome::failed(request.request_id, err.to_string())
    }
}
