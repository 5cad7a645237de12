use async_trait::async_trait;
use parking_lot::Mutex;
use sluice_core::config::RetryPolicy;
use sluice_core::observe::ControllerMetrics;
use sluice_core::types::{
    OperationPayload, ScalingPolicy, StreamConfiguration, StreamId, StreamRecord, StreamState,
};
use sluice_pipeline::prelude::*;
use sluice_queue::InMemoryRequestQueue;
use sluice_store::InMemoryMetadataStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct Recorder(Mutex<Vec<TaskOutcome>>);

impl OutcomeListener for Recorder {
    fn on_outcome(&self, _request: &OperationRequest, outcome: &TaskOutcome) {
        self.0.lock().push(outcome.clone());
    }
}

/// Claim the stream for `payload` the way the gateway does, then enqueue.
async fn submit(
    store: &InMemoryMetadataStore,
    queue: &InMemoryRequestQueue,
    stream: &StreamId,
    payload: OperationPayload,
) -> OperationRequest {
    let mut record = store.get_stream(stream).await.unwrap().unwrap();
    let request = OperationRequest::new(stream.clone(), payload);
    let expected = record.version;
    record.state = request.transitional_state();
    record.active_request = Some(request.clone());
    assert!(store
        .compare_and_swap(expected, record)
        .await
        .unwrap()
        .is_success());
    queue.append(&request).await.unwrap();
    request
}

async fn active_stream(store: &InMemoryMetadataStore, name: &str) -> StreamId {
    let id = StreamId::new("scope", name);
    let mut record = StreamRecord::new(id.clone(), StreamConfiguration::new(ScalingPolicy::fixed(1)));
    record.state = StreamState::Active;
    store.insert_stream(record).await.unwrap();
    id
}

async fn wait_for_ack(queue: &InMemoryRequestQueue, offset: u64) {
    for _ in 0..200 {
        if queue.acknowledged().await.unwrap() >= offset {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue never acknowledged {offset}");
}

async fn wait_for_state(store: &InMemoryMetadataStore, stream: &StreamId, state: StreamState) {
    for _ in 0..200 {
        let current = store.get_stream(stream).await.unwrap();
        if current.is_some_and(|r| r.state == state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("stream {stream} never reached {state}");
}

async fn wait_for_failure(failures: &FailedRequestLog) {
    for _ in 0..200 {
        if !failures.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no failure recorded");
}

#[tokio::test]
async fn seal_runs_to_completion_and_is_acknowledged() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let queue = Arc::new(InMemoryRequestQueue::new());
    let stream = active_stream(&store, "orders").await;

    let processor = Arc::new(
        RequestProcessor::builder(queue.clone(), HandlerRegistry::standard(store.clone()))
            .build()
            .unwrap(),
    );
    let shutdown = processor.shutdown_handle();
    let running = processor.clone().spawn();

    let request = submit(&store, &queue, &stream, OperationPayload::Seal).await;

    wait_for_state(&store, &stream, StreamState::Sealed).await;
    wait_for_ack(&queue, 1).await;

    let record = store.get_stream(&stream).await.unwrap().unwrap();
    assert_eq!(record.last_applied, Some(request.request_id));

    shutdown.shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn committed_request_redelivered_after_restart_is_acknowledged() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let queue = Arc::new(InMemoryRequestQueue::new());
    let stream = active_stream(&store, "redelivered").await;
    let request = submit(&store, &queue, &stream, OperationPayload::Seal).await;

    // First run commits, then "crashes" before acknowledging.
    let seal = sluice_pipeline::handlers::SealHandler::new(store.clone());
    assert_eq!(seal.process(&request).await.result, TaskResult::Succeeded);
    let committed = store.get_stream(&stream).await.unwrap().unwrap();
    assert_eq!(queue.acknowledged().await.unwrap(), 0);

    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let processor = Arc::new(
        RequestProcessor::builder(queue.clone(), HandlerRegistry::standard(store.clone()))
            .with_listener(recorder.clone())
            .build()
            .unwrap(),
    );
    let shutdown = processor.shutdown_handle();
    let running = processor.clone().spawn();

    wait_for_ack(&queue, 1).await;
    let after = store.get_stream(&stream).await.unwrap().unwrap();
    assert_eq!(after.version, committed.version);
    assert_eq!(after.state, StreamState::Sealed);
    assert_eq!(
        recorder.0.lock().as_slice(),
        &[TaskOutcome::succeeded(request.request_id)]
    );

    shutdown.shutdown();
    running.await.unwrap().unwrap();
}

struct AlwaysRetryable;

#[async_trait]
impl RequestHandler for AlwaysRetryable {
    fn kind(&self) -> OperationKind {
        OperationKind::Seal
    }

    async fn process(&self, request: &OperationRequest) -> TaskOutcome {
        TaskOutcome::retryable(request.request_id, "store unavailable")
    }
}

#[tokio::test]
async fn exhausted_retries_become_failed_and_are_recorded() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let queue = Arc::new(InMemoryRequestQueue::new());
    let metrics = Arc::new(ControllerMetrics::new());
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let stream = active_stream(&store, "flaky").await;

    let registry =
        HandlerRegistry::standard(store.clone()).with_handler(Arc::new(AlwaysRetryable));
    let config = PipelineConfig::default().with_retry(
        RetryPolicy::default()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_retries(2),
    );
    let processor = Arc::new(
        RequestProcessor::builder(queue.clone(), registry)
            .with_config(config)
            .with_metrics(metrics.clone())
            .with_listener(recorder.clone())
            .build()
            .unwrap(),
    );
    let failures = processor.failures();
    let shutdown = processor.shutdown_handle();
    let running = processor.clone().spawn();

    let request = submit(&store, &queue, &stream, OperationPayload::Seal).await;
    wait_for_failure(&failures).await;

    let failed = failures.get(&request.request_id).unwrap();
    assert_eq!(failed.attempts, 3);
    assert!(failed.reason.contains("retries exhausted"));
    assert_eq!(metrics.snapshot().task_retries, 2);
    assert_eq!(metrics.snapshot().tasks_failed, 1);
    assert!(matches!(
        recorder.0.lock()[0].result,
        TaskResult::Failed(_)
    ));

    // The stream is left in its transitional state, not corrupted.
    let record = store.get_stream(&stream).await.unwrap().unwrap();
    assert_eq!(record.state, StreamState::Sealing);
    wait_for_ack(&queue, 1).await;

    shutdown.shutdown();
    running.await.unwrap().unwrap();
}

/// Records how many invocations overlap, per stream and overall.
#[derive(Default)]
struct Overlap {
    active: AtomicUsize,
    max_active: AtomicUsize,
    order: Mutex<Vec<(String, usize)>>,
}

struct SlowUpdate(Arc<Overlap>);

#[async_trait]
impl RequestHandler for SlowUpdate {
    fn kind(&self) -> OperationKind {
        OperationKind::Update
    }

    async fn process(&self, request: &OperationRequest) -> TaskOutcome {
        let now = self.0.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let seq = match &request.payload {
            OperationPayload::Update { configuration } => {
                configuration.scaling_policy.min_segments() as usize
            }
            _ => 0,
        };
        self.0.order.lock().push((request.stream.name.clone(), seq));
        self.0.active.fetch_sub(1, Ordering::SeqCst);
        TaskOutcome::succeeded(request.request_id)
    }
}

fn update(seq: u32) -> OperationPayload {
    OperationPayload::Update {
        configuration: StreamConfiguration::new(ScalingPolicy::fixed(seq)),
    }
}

#[tokio::test]
async fn same_stream_requests_run_one_at_a_time_in_order() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let queue = Arc::new(InMemoryRequestQueue::new());
    let overlap = Arc::new(Overlap::default());
    let stream = StreamId::new("scope", "serial");

    // The handler never touches the store, so requests can be queued directly.
    for seq in 1..=3 {
        queue
            .append(&OperationRequest::new(stream.clone(), update(seq)))
            .await
            .unwrap();
    }

    let registry =
        HandlerRegistry::standard(store.clone()).with_handler(Arc::new(SlowUpdate(overlap.clone())));
    let processor = Arc::new(
        RequestProcessor::builder(queue.clone(), registry)
            .with_config(PipelineConfig::default().with_worker_pool_size(4))
            .build()
            .unwrap(),
    );
    let shutdown = processor.shutdown_handle();
    let running = processor.clone().spawn();

    wait_for_ack(&queue, 3).await;
    assert_eq!(overlap.max_active.load(Ordering::SeqCst), 1);
    let order: Vec<_> = overlap.order.lock().iter().map(|(_, seq)| *seq).collect();
    assert_eq!(order, vec![1, 2, 3]);

    shutdown.shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn different_streams_run_concurrently() {
    let store = Arc::new(InMemoryMetadataStore::new());
    let queue = Arc::new(InMemoryRequestQueue::new());
    let overlap = Arc::new(Overlap::default());

    for name in ["a", "b", "c"] {
        queue
            .append(&OperationRequest::new(StreamId::new("scope", name), update(1)))
            .await
            .unwrap();
    }

    let registry =
        HandlerRegistry::standard(store.clone()).with_handler(Arc::new(SlowUpdate(overlap.clone())));
    let processor = Arc::new(
        RequestProcessor::builder(queue.clone(), registry)
            .with_config(PipelineConfig::default().with_worker_pool_size(2))
            .build()
            .unwrap(),
    );
    let shutdown = processor.shutdown_handle();
    let running = processor.clone().spawn();

    wait_for_ack(&queue, 3).await;
    assert_eq!(overlap.max_active.load(Ordering::SeqCst), 2);

    shutdown.shutdown();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn incomplete_registry_is_rejected() {
    let queue = Arc::new(InMemoryRequestQueue::new());
    let err = RequestProcessor::builder(queue, HandlerRegistry::new())
        .build()
        .unwrap_err();
    assert!(matches!(err, PipelineError::HandlerNotFound(_)));
}
