//! Main pipeline loop.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::failures::{FailedRequest, FailedRequestLog};
use crate::handler::HandlerRegistry;
use chrono::Utc;
use sluice_core::observe::ControllerMetrics;
use sluice_core::traits::{OutcomeListener, QueuedRequest, RequestQueue};
use sluice_core::types::{StreamId, TaskOutcome, TaskResult};
use sluice_queue::{AckWindow, Subscription};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Signals the pipeline to stop.
///
/// Stopping is graceful: no new requests are started, running handlers
/// finish, and anything unfinished stays unacknowledged for the next run.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn shutdown(&self) {
        info!("Shutdown signal received");
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`ShutdownHandle::shutdown`] has been called.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so the channel cannot close here.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// One handler invocation, reported back to the loop.
struct Attempt {
    item: QueuedRequest,
    /// Retries already made before this invocation.
    retries: u32,
    outcome: TaskOutcome,
    elapsed: Duration,
    /// Shutdown arrived while waiting to retry; the handler did not run.
    interrupted: bool,
}

/// Consumes the request queue and drives handlers.
///
/// Requests for different streams run concurrently up to
/// `worker_pool_size`. Requests for the same stream run one at a time in
/// queue order; later ones wait in a per-stream backlog. `Retryable`
/// outcomes are retried with backoff while holding the stream, and the
/// queue offset is only acknowledged once a request reaches a terminal
/// outcome.
pub struct RequestProcessor {
    queue: Arc<dyn RequestQueue>,
    registry: HandlerRegistry,
    config: PipelineConfig,
    metrics: Arc<ControllerMetrics>,
    failures: Arc<FailedRequestLog>,
    listeners: Arc<Vec<Arc<dyn OutcomeListener>>>,
    shutdown: ShutdownHandle,
    running: Arc<AtomicBool>,
}

impl RequestProcessor {
    pub fn builder(queue: Arc<dyn RequestQueue>, registry: HandlerRegistry) -> ProcessorBuilder {
        ProcessorBuilder::new(queue, registry)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn failures(&self) -> Arc<FailedRequestLog> {
        self.failures.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline until shutdown is signaled.
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyRunning);
        }
        let result = self.run_loop().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Spawn [`RequestProcessor::run`] onto the runtime.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run_loop(&self) -> Result<()> {
        let mut subscription = Subscription::open(
            self.queue.clone(),
            self.config.read_batch_size,
            self.config.idle_wait(),
        )
        .await?;
        let mut window = AckWindow::new(subscription.position());
        let permits = Arc::new(Semaphore::new(self.config.worker_pool_size.max(1)));
        let mut backlog: HashMap<StreamId, VecDeque<QueuedRequest>> = HashMap::new();
        let mut tasks: JoinSet<Attempt> = JoinSet::new();
        let max_waiting = self.config.read_batch_size.max(1) * 4;

        info!(
            position = subscription.position(),
            workers = self.config.worker_pool_size,
            "Request pipeline started"
        );

        loop {
            let waiting: usize = backlog.values().map(VecDeque::len).sum();
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                Some(joined) = tasks.join_next() => match joined {
                    Ok(attempt) => {
                        self.settle(attempt, false, &mut window, &mut backlog, &mut tasks, &permits)
                            .await;
                    }
                    Err(e) => error!(error = %e, "Pipeline task aborted"),
                },
                next = subscription.next(), if waiting < max_waiting => match next {
                    Ok(item) => self.admit(item, &mut backlog, &mut tasks, &permits),
                    Err(e) => {
                        error!(error = %e, "Failed to read request queue");
                        tokio::time::sleep(self.config.idle_wait()).await;
                    }
                },
            }
        }

        info!(in_flight = tasks.len(), "Request pipeline shutting down, waiting for handlers");
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(attempt) => {
                    self.settle(attempt, true, &mut window, &mut backlog, &mut tasks, &permits)
                        .await;
                }
                Err(e) => error!(error = %e, "Pipeline task aborted"),
            }
        }

        info!(acknowledged = window.watermark(), "Request pipeline stopped");
        Ok(())
    }

    /// Start `item` now, or park it behind the request already running for
    /// its stream.
    fn admit(
        &self,
        item: QueuedRequest,
        backlog: &mut HashMap<StreamId, VecDeque<QueuedRequest>>,
        tasks: &mut JoinSet<Attempt>,
        permits: &Arc<Semaphore>,
    ) {
        match backlog.entry(item.request.stream.clone()) {
            Entry::Occupied(mut waiting) => {
                debug!(
                    offset = item.offset,
                    request_id = %item.request.request_id,
                    stream = %item.request.stream,
                    "Stream busy, request waiting"
                );
                waiting.get_mut().push_back(item);
            }
            Entry::Vacant(slot) => {
                slot.insert(VecDeque::new());
                self.spawn_attempt(tasks, permits, item, 0, None);
            }
        }
    }

    fn spawn_attempt(
        &self,
        tasks: &mut JoinSet<Attempt>,
        permits: &Arc<Semaphore>,
        item: QueuedRequest,
        retries: u32,
        delay: Option<Duration>,
    ) {
        let handler = self.registry.get(item.request.kind());
        let permits = permits.clone();
        let shutdown = self.shutdown.clone();

        tasks.spawn(async move {
            let request_id = item.request.request_id;
            if let Some(delay) = delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.wait() => {
                        return Attempt {
                            item,
                            retries,
                            outcome: TaskOutcome::retryable(request_id, "interrupted by shutdown"),
                            elapsed: Duration::ZERO,
                            interrupted: true,
                        };
                    }
                }
            }

            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await.ok();
            let started = Instant::now();
            let outcome = match handler {
                Ok(handler) => {
                    let request = item.request.clone();
                    match tokio::spawn(async move { handler.process(&request).await }).await {
                        Ok(outcome) => outcome,
                        Err(e) => TaskOutcome::failed(request_id, format!("handler panicked: {e}")),
                    }
                }
                Err(e) => TaskOutcome::failed(request_id, e.to_string()),
            };

            Attempt {
                item,
                retries,
                outcome,
                elapsed: started.elapsed(),
                interrupted: false,
            }
        });
    }

    /// Handle a finished attempt: retry it, or make it terminal, acknowledge
    /// and start the next request for the stream.
    async fn settle(
        &self,
        attempt: Attempt,
        draining: bool,
        window: &mut AckWindow,
        backlog: &mut HashMap<StreamId, VecDeque<QueuedRequest>>,
        tasks: &mut JoinSet<Attempt>,
        permits: &Arc<Semaphore>,
    ) {
        let Attempt {
            item,
            retries,
            outcome,
            elapsed,
            interrupted,
        } = attempt;
        let request = &item.request;
        let kind = request.kind();

        if interrupted {
            debug!(request_id = %request.request_id, "Retry abandoned for shutdown");
            return;
        }

        let outcome = match outcome.result {
            TaskResult::Retryable(reason) if draining => {
                info!(
                    request_id = %request.request_id,
                    stream = %request.stream,
                    reason = %reason,
                    "Leaving retryable request for the next run"
                );
                return;
            }
            TaskResult::Retryable(reason) if self.config.retry.allows_retry(retries) => {
                let delay = self.config.retry.delay_for(retries);
                warn!(
                    request_id = %request.request_id,
                    stream = %request.stream,
                    kind = %kind,
                    attempt = retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "Retryable outcome, rescheduling"
                );
                self.metrics.record_retry(kind);
                self.spawn_attempt(tasks, permits, item, retries + 1, Some(delay));
                return;
            }
            TaskResult::Retryable(reason) => TaskOutcome::failed(
                request.request_id,
                format!("retries exhausted after {} attempts: {reason}", retries + 1),
            ),
            _ => outcome,
        };

        let succeeded = outcome.result == TaskResult::Succeeded;
        self.metrics.record_task(kind, succeeded, elapsed);
        if let TaskResult::Failed(reason) = &outcome.result {
            error!(
                request_id = %request.request_id,
                stream = %request.stream,
                kind = %kind,
                reason = %reason,
                "Request failed"
            );
            let entry = FailedRequest {
                request: request.clone(),
                reason: reason.clone(),
                attempts: retries + 1,
                failed_at: Utc::now(),
            };
            if let Err(e) = self.failures.record(entry) {
                error!(request_id = %request.request_id, error = %e, "Failed to record failure");
            }
        } else {
            debug!(
                request_id = %request.request_id,
                stream = %request.stream,
                kind = %kind,
                elapsed_ms = elapsed.as_millis() as u64,
                "Request completed"
            );
        }

        for listener in self.listeners.iter() {
            listener.on_outcome(request, &outcome);
        }

        if let Some(next) = window.complete(item.offset) {
            // A failed acknowledgement only causes redelivery.
            if let Err(e) = self.queue.acknowledge(next).await {
                warn!(offset = next, error = %e, "Failed to acknowledge queue offset");
            }
        }

        let stream = item.request.stream;
        let next = backlog.get_mut(&stream).and_then(VecDeque::pop_front);
        match next {
            Some(next) if !draining => self.spawn_attempt(tasks, permits, next, 0, None),
            Some(_) => {}
            None => {
                backlog.remove(&stream);
            }
        }
    }
}

impl std::fmt::Debug for RequestProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestProcessor")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Builder for creating a [`RequestProcessor`].
pub struct ProcessorBuilder {
    queue: Arc<dyn RequestQueue>,
    registry: HandlerRegistry,
    config: PipelineConfig,
    metrics: Option<Arc<ControllerMetrics>>,
    failures: Option<Arc<FailedRequestLog>>,
    listeners: Vec<Arc<dyn OutcomeListener>>,
    shutdown: Option<ShutdownHandle>,
}

impl ProcessorBuilder {
    pub fn new(queue: Arc<dyn RequestQueue>, registry: HandlerRegistry) -> Self {
        Self {
            queue,
            registry,
            config: PipelineConfig::default(),
            metrics: None,
            failures: None,
            listeners: Vec::new(),
            shutdown: None,
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ControllerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_failure_log(mut self, failures: Arc<FailedRequestLog>) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Receive every terminal outcome.
    pub fn with_listener(mut self, listener: Arc<dyn OutcomeListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Build the processor.
    ///
    /// Fails if the registry does not cover every operation kind.
    pub fn build(self) -> Result<RequestProcessor> {
        if let Some(kind) = self.registry.missing().into_iter().next() {
            return Err(PipelineError::HandlerNotFound(kind));
        }
        Ok(RequestProcessor {
            queue: self.queue,
            registry: self.registry,
            config: self.config,
            metrics: self.metrics.unwrap_or_default(),
            failures: self.failures.unwrap_or_default(),
            listeners: Arc::new(self.listeners),
            shutdown: self.shutdown.unwrap_or_default(),
            running: Arc::new(AtomicBool::new(false)),
        })
    }
}
