//! Control API gateway
//!
//! Accepts one control operation per call. Preconditions are checked
//! synchronously against the stored stream state; an accepted operation
//! claims the stream with a compare-and-swap into its transitional state,
//! is appended to the request queue, and is handed to the completion tracker.
//! The gateway never runs the operation itself.

use crate::tracker::{CompletionTracker, OperationStatus, PendingOperation};
use futures::future::try_join_all;
use sluice_core::config::RetryPolicy;
use sluice_core::error::{Result, SluiceError};
use sluice_core::observe::ControllerMetrics;
use sluice_core::traits::{CasResult, Host, HostDiscovery, MetadataStore, RequestQueue};
use sluice_core::types::{
    OperationKind, OperationPayload, OperationRequest, ScaleDirection, ScaleRequest,
    StreamConfiguration, StreamCut, StreamId, StreamRecord, StreamState, MAX_SEGMENTS,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Entry point for control operations on streams.
pub struct ControllerService {
    store: Arc<dyn MetadataStore>,
    queue: Arc<dyn RequestQueue>,
    tracker: Arc<CompletionTracker>,
    hosts: Arc<dyn HostDiscovery>,
    metrics: Arc<ControllerMetrics>,
    retry: RetryPolicy,
}

impl ControllerService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        queue: Arc<dyn RequestQueue>,
        tracker: Arc<CompletionTracker>,
        hosts: Arc<dyn HostDiscovery>,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        Self {
            store,
            queue,
            tracker,
            hosts,
            metrics,
            retry: RetryPolicy::default(),
        }
    }

    /// Backoff used when releasing a claim after a failed append.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn tracker(&self) -> &Arc<CompletionTracker> {
        &self.tracker
    }

    pub fn metrics(&self) -> &Arc<ControllerMetrics> {
        &self.metrics
    }

    /// Create a stream and make it `ACTIVE`.
    ///
    /// Runs synchronously, without the queue. Creating a stream that already
    /// exists with the same configuration succeeds; a different configuration
    /// is rejected with `StreamExists`.
    pub async fn create_stream(
        &self,
        stream: StreamId,
        configuration: StreamConfiguration,
    ) -> Result<StreamRecord> {
        stream.validate()?;
        configuration.validate()?;

        let mut record = StreamRecord::new(stream.clone(), configuration.clone());
        match self.store.insert_stream(record.clone()).await? {
            CasResult::Success { version } => {
                record.version = version;
                self.activate(record).await
            }
            CasResult::AlreadyExists { .. } => {
                let existing = self
                    .store
                    .get_stream(&stream)
                    .await?
                    .ok_or_else(|| SluiceError::Conflict(stream.clone()))?;
                if existing.configuration != configuration {
                    return Err(SluiceError::StreamExists(stream));
                }
                if existing.state == StreamState::Creating {
                    // An earlier create stopped between insert and activation.
                    return self.activate(existing).await;
                }
                debug!(stream = %stream, "Stream already exists with the same configuration");
                Ok(existing)
            }
            other => {
                warn!(stream = %stream, result = ?other, "Unexpected insert result");
                Err(SluiceError::Conflict(stream))
            }
        }
    }

    async fn activate(&self, record: StreamRecord) -> Result<StreamRecord> {
        let expected = record.version;
        let mut active = record;
        active.state = StreamState::Active;

        match self.store.compare_and_swap(expected, active.clone()).await? {
            CasResult::Success { version } => {
                active.version = version;
                info!(
                    stream = %active.id,
                    segments = active.segments.len(),
                    "Created stream"
                );
                Ok(active)
            }
            _ => {
                // Someone else finished the activation.
                let current = self
                    .store
                    .get_stream(&active.id)
                    .await?
                    .ok_or_else(|| SluiceError::StreamNotFound(active.id.clone()))?;
                if current.state == StreamState::Creating {
                    return Err(SluiceError::Conflict(current.id));
                }
                Ok(current)
            }
        }
    }

    /// Submit a control operation.
    ///
    /// Returns once the request is recorded on the queue; the returned handle
    /// resolves when the operation commits, fails, or the completion timeout
    /// elapses.
    pub async fn submit(
        &self,
        stream: StreamId,
        payload: OperationPayload,
    ) -> Result<PendingOperation> {
        let kind = payload.kind();
        validate_payload(&payload)?;

        let record = self
            .store
            .get_stream(&stream)
            .await?
            .ok_or_else(|| SluiceError::StreamNotFound(stream.clone()))?;

        if kind == OperationKind::Seal {
            if let Some(pending) = self.reenter_seal(&record, payload.clone()).await? {
                return Ok(pending);
            }
        }

        if !kind.allowed_from(record.state) {
            self.metrics.record_precondition_failure(kind);
            debug!(stream = %stream, kind = %kind, state = %record.state, "Precondition failed");
            return Err(SluiceError::PreconditionFailed {
                stream,
                operation: kind,
                state: record.state,
            });
        }

        let payload = match payload {
            OperationPayload::Truncate { cut, .. } => OperationPayload::Truncate {
                cut,
                resume_state: record.state,
            },
            other => other,
        };
        let request = OperationRequest::new(stream.clone(), payload);
        let claimed_version = self.claim(&record, &request).await?;

        // Tracked before the append so a fast failure cannot be missed.
        let pending = self.tracker.register(&request);
        if let Err(e) = self.queue.append(&request).await {
            self.tracker.withdraw(pending);
            self.metrics.record_append_failure(kind);
            if let Err(reason) = self.release(&request, record.state, claimed_version).await {
                error!(
                    request_id = %request.request_id,
                    stream = %stream,
                    error = %e,
                    reason = %reason,
                    "Queue append failed and the stream could not be released"
                );
                return Err(SluiceError::ReleaseFailed {
                    stream,
                    append_error: e.to_string(),
                    reason,
                });
            }
            warn!(
                request_id = %request.request_id,
                stream = %stream,
                error = %e,
                "Queue append failed, released stream"
            );
            return Err(SluiceError::QueueAppendFailed(e.to_string()));
        }

        self.metrics.record_accepted(kind);
        info!(
            request_id = %request.request_id,
            stream = %stream,
            kind = %kind,
            "Accepted operation"
        );
        Ok(pending)
    }

    /// Seal on a stream already sealing or sealed.
    async fn reenter_seal(
        &self,
        record: &StreamRecord,
        payload: OperationPayload,
    ) -> Result<Option<PendingOperation>> {
        match record.state {
            StreamState::Sealed => {
                debug!(stream = %record.id, "Stream already sealed");
                let request = OperationRequest::new(record.id.clone(), payload);
                Ok(Some(PendingOperation::completed(&request)))
            }
            StreamState::Sealing => {
                let Some(active) = record
                    .active_request
                    .as_ref()
                    .filter(|r| r.kind() == OperationKind::Seal)
                else {
                    return Ok(None);
                };
                let pending = self.tracker.register(active);
                if let Err(e) = self.queue.append(active).await {
                    self.tracker.withdraw(pending);
                    self.metrics.record_append_failure(OperationKind::Seal);
                    return Err(SluiceError::QueueAppendFailed(e.to_string()));
                }
                info!(
                    request_id = %active.request_id,
                    stream = %record.id,
                    "Re-submitted in-flight seal"
                );
                Ok(Some(pending))
            }
            _ => Ok(None),
        }
    }

    /// Move the stream into the request's transitional state.
    async fn claim(&self, record: &StreamRecord, request: &OperationRequest) -> Result<u64> {
        let kind = request.kind();
        let mut claimed = record.clone();
        claimed.state = request.transitional_state();
        claimed.active_request = Some(request.clone());

        match self.store.compare_and_swap(record.version, claimed).await? {
            CasResult::Success { version } => Ok(version),
            CasResult::NotFound => Err(SluiceError::StreamNotFound(request.stream.clone())),
            CasResult::VersionMismatch { .. } | CasResult::AlreadyExists { .. } => {
                self.metrics.record_conflict(kind);
                debug!(stream = %request.stream, kind = %kind, "Lost claim race");
                Err(SluiceError::Conflict(request.stream.clone()))
            }
        }
    }

    /// Undo a claim whose request never reached the queue.
    ///
    /// Store errors are retried with the retry policy's backoff. A record that
    /// moved past `claimed_version` is no longer this claim's to undo. Returns
    /// the last error once retries run out.
    async fn release(
        &self,
        request: &OperationRequest,
        prior: StreamState,
        claimed_version: u64,
    ) -> std::result::Result<(), String> {
        let mut attempt = 0;
        loop {
            let error = match self.try_release(request, prior, claimed_version).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && self.retry.allows_retry(attempt) => e,
                Err(e) => return Err(e.to_string()),
            };
            let delay = self.retry.delay_for(attempt);
            attempt += 1;
            warn!(
                request_id = %request.request_id,
                stream = %request.stream,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Release failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn try_release(
        &self,
        request: &OperationRequest,
        prior: StreamState,
        claimed_version: u64,
    ) -> Result<()> {
        let Some(current) = self.store.get_stream(&request.stream).await? else {
            warn!(request_id = %request.request_id, stream = %request.stream, "Stream removed after claim, nothing to release");
            return Ok(());
        };
        if current.version != claimed_version {
            warn!(request_id = %request.request_id, stream = %request.stream, "Stream changed after claim, not released");
            return Ok(());
        }
        let mut released = current;
        released.state = prior;
        released.active_request = None;
        match self.store.compare_and_swap(claimed_version, released).await? {
            CasResult::Success { .. } => {
                debug!(request_id = %request.request_id, stream = %request.stream, state = %prior, "Released claim");
            }
            other => {
                warn!(request_id = %request.request_id, result = ?other, "Release lost a race")
            }
        }
        Ok(())
    }

    pub async fn update_stream(
        &self,
        stream: StreamId,
        configuration: StreamConfiguration,
    ) -> Result<OperationStatus> {
        self.submit(stream, OperationPayload::Update { configuration })
            .await?
            .wait()
            .await
    }

    pub async fn scale_stream(
        &self,
        stream: StreamId,
        request: ScaleRequest,
    ) -> Result<OperationStatus> {
        self.submit(stream, OperationPayload::Scale(request))
            .await?
            .wait()
            .await
    }

    pub async fn auto_scale(
        &self,
        stream: StreamId,
        segment: u64,
        direction: ScaleDirection,
    ) -> Result<OperationStatus> {
        self.submit(stream, OperationPayload::AutoScale { segment, direction })
            .await?
            .wait()
            .await
    }

    pub async fn seal_stream(&self, stream: StreamId) -> Result<OperationStatus> {
        self.submit(stream, OperationPayload::Seal).await?.wait().await
    }

    /// Truncate at `cut`. The stream returns to the state it had before.
    pub async fn truncate_stream(&self, stream: StreamId, cut: StreamCut) -> Result<OperationStatus> {
        let payload = OperationPayload::Truncate {
            cut,
            // Replaced with the current state on submission.
            resume_state: StreamState::Active,
        };
        self.submit(stream, payload).await?.wait().await
    }

    pub async fn delete_stream(&self, stream: StreamId) -> Result<OperationStatus> {
        self.submit(stream, OperationPayload::Delete).await?.wait().await
    }

    pub async fn get_stream(&self, stream: &StreamId) -> Result<StreamRecord> {
        self.store
            .get_stream(stream)
            .await?
            .ok_or_else(|| SluiceError::StreamNotFound(stream.clone()))
    }

    pub async fn stream_state(&self, stream: &StreamId) -> Result<StreamState> {
        Ok(self.get_stream(stream).await?.state)
    }

    pub async fn list_streams(&self, scope: &str) -> Result<Vec<StreamId>> {
        self.store.list_streams(scope).await
    }

    /// Records of every stream in `scope`.
    pub async fn describe_scope(&self, scope: &str) -> Result<Vec<StreamRecord>> {
        let ids = self.store.list_streams(scope).await?;
        let records = try_join_all(ids.iter().map(|id| self.store.get_stream(id))).await?;
        Ok(records.into_iter().flatten().collect())
    }

    /// Controller instances known to host discovery.
    pub fn list_controllers(&self) -> Result<Vec<Host>> {
        self.hosts.hosts()
    }
}

impl std::fmt::Debug for ControllerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerService")
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

/// Checks that need no stream state.
fn validate_payload(payload: &OperationPayload) -> Result<()> {
    match payload {
        OperationPayload::Update { configuration } => configuration.validate(),
        OperationPayload::Scale(request) => {
            if request.sealed_segments.is_empty() || request.new_ranges.is_empty() {
                return Err(SluiceError::InvalidArgument(
                    "scale needs segments to seal and new key ranges".into(),
                ));
            }
            if request.new_ranges.len() > MAX_SEGMENTS as usize {
                return Err(SluiceError::InvalidArgument(format!(
                    "scale may create at most {MAX_SEGMENTS} segments"
                )));
            }
            if let Some(bad) = request.new_ranges.iter().find(|r| !r.is_valid()) {
                return Err(SluiceError::InvalidArgument(format!(
                    "invalid key range [{}, {})",
                    bad.start, bad.end
                )));
            }
            Ok(())
        }
        OperationPayload::AutoScale { direction, .. } => direction.validate(),
        OperationPayload::Truncate { cut, .. } if cut.is_empty() => Err(
            SluiceError::InvalidArgument("truncation cut must not be empty".into()),
        ),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::TimeoutGovernor;
    use async_trait::async_trait;
    use sluice_core::notify::ChangeNotifier;
    use sluice_core::traits::{QueueOffset, QueuedRequest, StaticHostDiscovery};
    use std::sync::atomic::{AtomicU32, Ordering};
    use sluice_core::types::{KeyRange, ScalingPolicy};
    use sluice_queue::InMemoryRequestQueue;
    use sluice_store::InMemoryMetadataStore;
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryMetadataStore>,
        queue: Arc<InMemoryRequestQueue>,
        service: ControllerService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryMetadataStore::new());
        let queue = Arc::new(InMemoryRequestQueue::new());
        let metrics = Arc::new(ControllerMetrics::new());
        let tracker = Arc::new(CompletionTracker::new(
            store.clone(),
            TimeoutGovernor::new(Duration::from_secs(5)),
            Duration::from_millis(10),
            metrics.clone(),
        ));
        let service = ControllerService::new(
            store.clone(),
            queue.clone(),
            tracker,
            Arc::new(StaticHostDiscovery::new()),
            metrics,
        );
        Fixture {
            store,
            queue,
            service,
        }
    }

    fn config(segments: u32) -> StreamConfiguration {
        StreamConfiguration::new(ScalingPolicy::fixed(segments))
    }

    #[tokio::test]
    async fn create_is_idempotent_for_the_same_configuration() {
        let f = fixture();
        let id = StreamId::new("scope", "orders");
        let created = f.service.create_stream(id.clone(), config(2)).await.unwrap();
        assert_eq!(created.state, StreamState::Active);
        assert_eq!(created.segments.len(), 2);

        let again = f.service.create_stream(id.clone(), config(2)).await.unwrap();
        assert_eq!(again.version, created.version);

        let err = f.service.create_stream(id, config(3)).await.unwrap_err();
        assert!(matches!(err, SluiceError::StreamExists(_)));
    }

    #[tokio::test]
    async fn create_finishes_a_stream_left_in_creating() {
        let f = fixture();
        let id = StreamId::new("scope", "half");
        f.store
            .insert_stream(StreamRecord::new(id.clone(), config(1)))
            .await
            .unwrap();

        let record = f.service.create_stream(id, config(1)).await.unwrap();
        assert_eq!(record.state, StreamState::Active);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_reading_the_store() {
        let f = fixture();
        let id = StreamId::new("scope", "missing");

        let err = f
            .service
            .submit(
                id.clone(),
                OperationPayload::Truncate {
                    cut: StreamCut::default(),
                    resume_state: StreamState::Active,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SluiceError::InvalidArgument(_)));

        let err = f
            .service
            .submit(
                id.clone(),
                OperationPayload::Scale(ScaleRequest {
                    sealed_segments: vec![0],
                    new_ranges: vec![KeyRange::new(0.5, 0.2)],
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SluiceError::InvalidArgument(_)));

        let err = f.service.submit(id, OperationPayload::Seal).await.unwrap_err();
        assert!(matches!(err, SluiceError::StreamNotFound(_)));
    }

    #[tokio::test]
    async fn precondition_failure_enqueues_nothing() {
        let f = fixture();
        let id = StreamId::new("scope", "active");
        f.service.create_stream(id.clone(), config(1)).await.unwrap();

        let err = f
            .service
            .submit(id.clone(), OperationPayload::Delete)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SluiceError::PreconditionFailed {
                operation: OperationKind::Delete,
                state: StreamState::Active,
                ..
            }
        ));
        assert_eq!(f.queue.appended(), 0);
        assert_eq!(f.service.stream_state(&id).await.unwrap(), StreamState::Active);
        assert_eq!(f.service.metrics().snapshot().precondition_failures, 1);
    }

    #[tokio::test]
    async fn accepted_request_claims_the_stream() {
        let f = fixture();
        let id = StreamId::new("scope", "claim");
        f.service.create_stream(id.clone(), config(1)).await.unwrap();

        let mut pending = f
            .service
            .submit(id.clone(), OperationPayload::Seal)
            .await
            .unwrap();
        assert_eq!(pending.status().unwrap(), OperationStatus::Accepted);

        let record = f.service.get_stream(&id).await.unwrap();
        assert_eq!(record.state, StreamState::Sealing);
        assert!(record.is_owned_by(&pending.request_id()));
        assert_eq!(f.queue.pending()[0].request_id, pending.request_id());

        // A second writer sees the transitional state.
        let err = f
            .service
            .submit(id, OperationPayload::Update { configuration: config(2) })
            .await
            .unwrap_err();
        assert!(matches!(err, SluiceError::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn seal_reentry_resubmits_the_in_flight_request() {
        let f = fixture();
        let id = StreamId::new("scope", "reseal");
        f.service.create_stream(id.clone(), config(1)).await.unwrap();

        let first = f.service.submit(id.clone(), OperationPayload::Seal).await.unwrap();
        let second = f.service.submit(id.clone(), OperationPayload::Seal).await.unwrap();
        assert_eq!(first.request_id(), second.request_id());
        assert_eq!(f.queue.appended(), 2);

        f.store.set_state(&id, StreamState::Sealed).await.unwrap();
        let mut sealed = f.service.submit(id, OperationPayload::Seal).await.unwrap();
        assert_eq!(sealed.status().unwrap(), OperationStatus::Success);
        assert_eq!(f.queue.appended(), 2);
    }

    #[tokio::test]
    async fn truncate_resumes_the_state_it_started_from() {
        let f = fixture();
        let id = StreamId::new("scope", "trunc");
        f.service.create_stream(id.clone(), config(1)).await.unwrap();
        f.store.set_state(&id, StreamState::Sealed).await.unwrap();

        f.service
            .submit(
                id.clone(),
                OperationPayload::Truncate {
                    cut: StreamCut::new([(0, 10)]),
                    resume_state: StreamState::Active,
                },
            )
            .await
            .unwrap();

        let queued = f.queue.pending();
        assert_eq!(queued[0].terminal_state(), Some(StreamState::Sealed));
        assert_eq!(f.service.stream_state(&id).await.unwrap(), StreamState::Truncating);
    }

    #[tokio::test]
    async fn append_failure_releases_the_claim() {
        let f = fixture();
        let id = StreamId::new("scope", "rollback");
        f.service.create_stream(id.clone(), config(1)).await.unwrap();
        f.queue.fail_next_appends(1);

        let err = f
            .service
            .submit(id.clone(), OperationPayload::Seal)
            .await
            .unwrap_err();
        assert!(matches!(err, SluiceError::QueueAppendFailed(_)));

        let record = f.service.get_stream(&id).await.unwrap();
        assert_eq!(record.state, StreamState::Active);
        assert!(record.active_request.is_none());
        assert_eq!(f.service.tracker().pending_count(), 0);
        assert_eq!(f.service.metrics().snapshot().append_failures, 1);
    }

    /// Rejects the first `failing` appends and takes the store down with them.
    struct OutageQueue {
        inner: InMemoryRequestQueue,
        store: Arc<InMemoryMetadataStore>,
        failing: AtomicU32,
        store_failures: u32,
    }

    #[async_trait]
    impl RequestQueue for OutageQueue {
        async fn append(&self, request: &OperationRequest) -> Result<QueueOffset> {
            let fail = self
                .failing
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                self.store.fail_next(self.store_failures);
                return Err(SluiceError::Queue("disk full".into()));
            }
            self.inner.append(request).await
        }

        async fn read_from(&self, from: QueueOffset, max: usize) -> Result<Vec<QueuedRequest>> {
            self.inner.read_from(from, max).await
        }

        async fn acknowledge(&self, next: QueueOffset) -> Result<()> {
            self.inner.acknowledge(next).await
        }

        async fn acknowledged(&self) -> Result<QueueOffset> {
            self.inner.acknowledged().await
        }

        async fn tail(&self) -> Result<QueueOffset> {
            self.inner.tail().await
        }

        fn append_notifier(&self) -> ChangeNotifier {
            self.inner.append_notifier()
        }
    }

    fn outage_service(
        store_failures: u32,
        retry: RetryPolicy,
    ) -> (Arc<InMemoryMetadataStore>, ControllerService) {
        let store = Arc::new(InMemoryMetadataStore::new());
        let queue = Arc::new(OutageQueue {
            inner: InMemoryRequestQueue::new(),
            store: store.clone(),
            failing: AtomicU32::new(1),
            store_failures,
        });
        let metrics = Arc::new(ControllerMetrics::new());
        let tracker = Arc::new(CompletionTracker::new(
            store.clone(),
            TimeoutGovernor::new(Duration::from_secs(5)),
            Duration::from_secs(5),
            metrics.clone(),
        ));
        let service = ControllerService::new(
            store.clone(),
            queue,
            tracker,
            Arc::new(StaticHostDiscovery::new()),
            metrics,
        )
        .with_retry(retry);
        (store, service)
    }

    fn quick_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_max_retries(max_retries)
    }

    #[tokio::test]
    async fn release_retries_through_a_store_outage() {
        let (_store, service) = outage_service(2, quick_retry(5));
        let id = StreamId::new("scope", "outage");
        service.create_stream(id.clone(), config(1)).await.unwrap();

        let err = service
            .submit(id.clone(), OperationPayload::Update { configuration: config(2) })
            .await
            .unwrap_err();
        assert!(matches!(err, SluiceError::QueueAppendFailed(_)));

        let record = service.get_stream(&id).await.unwrap();
        assert_eq!(record.state, StreamState::Active);
        assert!(record.active_request.is_none());

        // Not wedged: the next update claims the stream.
        service
            .submit(id.clone(), OperationPayload::Update { configuration: config(2) })
            .await
            .unwrap();
        assert_eq!(service.stream_state(&id).await.unwrap(), StreamState::Updating);
    }

    #[tokio::test]
    async fn release_that_cannot_be_made_is_reported() {
        let (store, service) = outage_service(100, quick_retry(2));
        let id = StreamId::new("scope", "down");
        service.create_stream(id.clone(), config(1)).await.unwrap();

        let err = service
            .submit(id.clone(), OperationPayload::Seal)
            .await
            .unwrap_err();
        match err {
            SluiceError::ReleaseFailed {
                stream,
                append_error,
                ..
            } => {
                assert_eq!(stream, id);
                assert!(append_error.contains("disk full"));
            }
            other => panic!("expected ReleaseFailed, got {other:?}"),
        }
        assert_eq!(service.tracker().pending_count(), 0);

        store.fail_next(0);
        assert_eq!(service.stream_state(&id).await.unwrap(), StreamState::Sealing);
    }

    #[tokio::test]
    async fn oversized_scales_are_rejected_before_reading_the_store() {
        let f = fixture();
        let id = StreamId::new("scope", "missing");

        let err = f
            .service
            .submit(
                id.clone(),
                OperationPayload::AutoScale {
                    segment: 0,
                    direction: ScaleDirection::Split { into: u32::MAX },
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SluiceError::InvalidArgument(_)));

        let err = f
            .service
            .create_stream(id, config(u32::MAX))
            .await
            .unwrap_err();
        assert!(matches!(err, SluiceError::InvalidArgument(_)));
        assert_eq!(f.store.stream_count(), 0);
    }

    #[tokio::test]
    async fn describe_scope_reads_every_stream() {
        let f = fixture();
        for name in ["a", "b"] {
            f.service
                .create_stream(StreamId::new("scope", name), config(1))
                .await
                .unwrap();
        }
        f.service
            .create_stream(StreamId::new("other", "c"), config(1))
            .await
            .unwrap();

        let records = f.service.describe_scope("scope").await.unwrap();
        let names: Vec<_> = records.iter().map(|r| r.id.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
