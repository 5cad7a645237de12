//! Completion tracker
//!
//! Bridges a caller waiting on a control operation and the pipeline doing the
//! work. Every registered operation gets a single-use slot that is resolved
//! by whichever of three signals arrives first:
//!
//! - the metadata store shows the request committed (terminal state and
//!   `last_applied` equal to the request id, or the record gone for deletes)
//! - the pipeline publishes a terminal `Failed` outcome for the request
//! - the completion timeout elapses
//!
//! Later signals for the same slot are discarded. A timeout only ends the
//! caller's wait; the pipeline keeps working on the request.

use crate::governor::TimeoutGovernor;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sluice_core::error::{Result, SluiceError};
use sluice_core::observe::ControllerMetrics;
use sluice_core::traits::{MetadataStore, OutcomeListener};
use sluice_core::types::{
    OperationKind, OperationRequest, RequestId, StreamId, StreamRecord, TaskOutcome, TaskResult,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, warn};

/// What a caller sees for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Recorded and in progress.
    Accepted,
    /// Committed in the metadata store.
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
    Success,
    Failed(String),
    DeadlineExceeded(Duration),
}

impl Resolution {
    fn label(&self) -> &'static str {
        match self {
            Resolution::Success => "success",
            Resolution::Failed(_) => "failed",
            Resolution::DeadlineExceeded(_) => "deadline_exceeded",
        }
    }

    fn into_result(self, request_id: RequestId) -> Result<OperationStatus> {
        match self {
            Resolution::Success => Ok(OperationStatus::Success),
            Resolution::Failed(reason) => Err(SluiceError::PipelineFailure { request_id, reason }),
            Resolution::DeadlineExceeded(timeout) => Err(SluiceError::DeadlineExceeded {
                request_id,
                timeout,
            }),
        }
    }
}

/// Single-use resolution slot. The first `resolve` wins.
struct CompletionSlot {
    ticket: u64,
    resolved: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<Resolution>>>,
    /// Wakes the watcher when another signal resolved the slot.
    settled: Notify,
    registered_at: Instant,
}

impl CompletionSlot {
    fn new(ticket: u64, sender: oneshot::Sender<Resolution>) -> Self {
        Self {
            ticket,
            resolved: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
            settled: Notify::new(),
            registered_at: Instant::now(),
        }
    }

    fn resolve(&self, resolution: Resolution) -> bool {
        if self
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if let Some(sender) = self.sender.lock().take() {
            // The caller may have dropped its handle; nothing to do then.
            let _ = sender.send(resolution);
        }
        self.settled.notify_one();
        true
    }
}

/// Handle returned to the caller for an accepted operation.
#[derive(Debug)]
pub struct PendingOperation {
    ticket: u64,
    request_id: RequestId,
    stream: StreamId,
    kind: OperationKind,
    receiver: oneshot::Receiver<Resolution>,
    resolved: Option<Resolution>,
}

impl PendingOperation {
    /// Handle that is already resolved successfully.
    pub(crate) fn completed(request: &OperationRequest) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(Resolution::Success);
        Self {
            ticket: 0,
            request_id: request.request_id,
            stream: request.stream.clone(),
            kind: request.kind(),
            receiver,
            resolved: None,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Current status without waiting.
    ///
    /// `Ok(Accepted)` while unresolved; afterwards the same value
    /// [`PendingOperation::wait`] would return.
    pub fn status(&mut self) -> Result<OperationStatus> {
        if self.resolved.is_none() {
            match self.receiver.try_recv() {
                Ok(resolution) => self.resolved = Some(resolution),
                Err(oneshot::error::TryRecvError::Empty) => return Ok(OperationStatus::Accepted),
                Err(oneshot::error::TryRecvError::Closed) => return Err(SluiceError::ShuttingDown),
            }
        }
        match &self.resolved {
            Some(resolution) => resolution.clone().into_result(self.request_id),
            None => Ok(OperationStatus::Accepted),
        }
    }

    /// Wait for the operation to resolve.
    pub async fn wait(self) -> Result<OperationStatus> {
        if let Some(resolution) = self.resolved {
            return resolution.into_result(self.request_id);
        }
        match self.receiver.await {
            Ok(resolution) => resolution.into_result(self.request_id),
            Err(_) => Err(SluiceError::ShuttingDown),
        }
    }
}

type PendingSlots = DashMap<RequestId, Vec<Arc<CompletionSlot>>>;

/// Correlates pending operations with their outcome.
///
/// One request may have several waiters (a seal re-entered while sealing);
/// each gets its own slot and every slot sees the request's failure.
pub struct CompletionTracker {
    store: Arc<dyn MetadataStore>,
    governor: TimeoutGovernor,
    poll_interval: Duration,
    metrics: Arc<ControllerMetrics>,
    pending: Arc<PendingSlots>,
    next_ticket: AtomicU64,
}

impl CompletionTracker {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        governor: TimeoutGovernor,
        poll_interval: Duration,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        Self {
            store,
            governor,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            metrics,
            pending: Arc::new(DashMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }

    pub fn governor(&self) -> &TimeoutGovernor {
        &self.governor
    }

    /// Number of callers still waiting.
    pub fn pending_count(&self) -> usize {
        self.pending.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_pending(&self, request_id: &RequestId) -> bool {
        self.pending.contains_key(request_id)
    }

    /// Start tracking `request` and return the caller's handle.
    ///
    /// The timeout is read from the governor now. Must be called from
    /// within a tokio runtime.
    pub fn register(&self, request: &OperationRequest) -> PendingOperation {
        let timeout = self.governor.completion_timeout();
        let (sender, receiver) = oneshot::channel();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(CompletionSlot::new(ticket, sender));

        self.pending
            .entry(request.request_id)
            .or_default()
            .push(slot.clone());
        debug!(
            request_id = %request.request_id,
            ticket,
            stream = %request.stream,
            timeout_ms = timeout.as_millis() as u64,
            "Tracking operation"
        );

        let watcher = Watcher {
            store: self.store.clone(),
            pending: self.pending.clone(),
            metrics: self.metrics.clone(),
            poll_interval: self.poll_interval,
            request: request.clone(),
            slot,
            timeout,
        };
        tokio::spawn(watcher.run());

        PendingOperation {
            ticket,
            request_id: request.request_id,
            stream: request.stream.clone(),
            kind: request.kind(),
            receiver,
            resolved: None,
        }
    }

    /// Stop tracking a handle that was never given to a caller.
    ///
    /// Other waiters on the same request are untouched.
    pub(crate) fn withdraw(&self, pending: PendingOperation) {
        let ticket = pending.ticket;
        let withdrawn = detach(&self.pending, &pending.request_id, |slot| {
            slot.ticket == ticket
        });
        if let Some(slot) = withdrawn {
            slot.resolve(Resolution::Failed("withdrawn before acceptance".into()));
        }
    }
}

/// Remove the first slot of `request_id` matching `matches`.
fn detach(
    pending: &PendingSlots,
    request_id: &RequestId,
    matches: impl Fn(&CompletionSlot) -> bool,
) -> Option<Arc<CompletionSlot>> {
    let Entry::Occupied(mut entry) = pending.entry(*request_id) else {
        return None;
    };
    let position = entry.get().iter().position(|slot| matches(slot.as_ref()))?;
    let slot = entry.get_mut().swap_remove(position);
    if entry.get().is_empty() {
        entry.remove();
    }
    Some(slot)
}

impl OutcomeListener for CompletionTracker {
    /// Only terminal failures resolve here; success is decided by the store.
    fn on_outcome(&self, request: &OperationRequest, outcome: &TaskOutcome) {
        let TaskResult::Failed(reason) = &outcome.result else {
            return;
        };
        // Cloned out so no map shard is held while resolving.
        let slots = self
            .pending
            .get(&outcome.request_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        if slots.is_empty() {
            debug!(request_id = %outcome.request_id, "Failure for untracked request");
            return;
        }

        for slot in slots {
            if slot.resolve(Resolution::Failed(reason.clone())) {
                info!(
                    request_id = %outcome.request_id,
                    stream = %request.stream,
                    ticket = slot.ticket,
                    reason = %reason,
                    "Operation failed"
                );
                self.metrics
                    .record_resolution("failed", slot.registered_at.elapsed());
            } else {
                self.metrics.record_late_signal();
            }
        }
    }
}

impl std::fmt::Debug for CompletionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionTracker")
            .field("pending", &self.pending_count())
            .field("timeout", &self.governor.completion_timeout())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// Per-operation task racing store observation against the deadline.
struct Watcher {
    store: Arc<dyn MetadataStore>,
    pending: Arc<PendingSlots>,
    metrics: Arc<ControllerMetrics>,
    poll_interval: Duration,
    request: OperationRequest,
    slot: Arc<CompletionSlot>,
    timeout: Duration,
}

impl Watcher {
    async fn run(self) {
        let id = self.request.request_id;
        let outcome = tokio::select! {
            biased;
            _ = self.slot.settled.notified() => None,
            _ = self.observe() => Some(Resolution::Success),
            _ = tokio::time::sleep(self.timeout) => Some(Resolution::DeadlineExceeded(self.timeout)),
        };

        if let Some(resolution) = outcome {
            let label = resolution.label();
            if self.slot.resolve(resolution) {
                if label == "deadline_exceeded" {
                    warn!(
                        request_id = %id,
                        stream = %self.request.stream,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Deadline exceeded; operation continues in the background"
                    );
                } else {
                    debug!(request_id = %id, stream = %self.request.stream, "Operation completed");
                }
                self.metrics
                    .record_resolution(label, self.slot.registered_at.elapsed());
            } else {
                self.metrics.record_late_signal();
            }
        }

        detach(&self.pending, &id, |slot| slot.ticket == self.slot.ticket);
    }

    /// Returns once the store shows the request committed.
    async fn observe(&self) {
        let key = self.request.stream.key();
        let notifier = self.store.change_notifier();
        loop {
            match self.store.get_stream(&self.request.stream).await {
                Ok(record) if has_committed(record.as_ref(), &self.request) => return,
                Ok(_) => {}
                Err(e) => {
                    debug!(request_id = %self.request.request_id, error = %e, "Store read failed while tracking");
                }
            }
            // Notifications shorten the wait; the poll bounds a missed one.
            match &notifier {
                Some(notifier) => {
                    notifier.wait_for(&key, self.poll_interval).await;
                }
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}

/// Whether `record` reflects `request` having committed.
pub fn has_committed(record: Option<&StreamRecord>, request: &OperationRequest) -> bool {
    match request.terminal_state() {
        None => record.is_none(),
        Some(state) => record.is_some_and(|r| {
            r.state == state && r.last_applied == Some(request.request_id)
        }),
    }
}
