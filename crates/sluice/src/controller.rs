//! Unified controller
//!
//! Wires a metadata store and a request queue into the gateway, the
//! completion tracker and the request pipeline, and owns the pipeline task.

use crate::gateway::ControllerService;
use crate::governor::TimeoutGovernor;
use crate::tracker::CompletionTracker;
use parking_lot::Mutex;
use sluice_core::config::ControllerConfig;
use sluice_core::error::{Result, SluiceError};
use sluice_core::observe::ControllerMetrics;
use sluice_core::traits::{
    HostDiscovery, MetadataStore, OutcomeListener, RequestQueue, StaticHostDiscovery,
};
use sluice_pipeline::{
    FailedRequestLog, HandlerRegistry, PipelineConfig, RequestHandler, RequestProcessor,
    ShutdownHandle,
};
use sluice_queue::InMemoryRequestQueue;
use sluice_store::InMemoryMetadataStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Gateway, tracker and pipeline over one store and queue.
pub struct Controller {
    config: ControllerConfig,
    store: Arc<dyn MetadataStore>,
    service: Arc<ControllerService>,
    tracker: Arc<CompletionTracker>,
    processor: Arc<RequestProcessor>,
    shutdown: ShutdownHandle,
    running: Mutex<Option<JoinHandle<sluice_pipeline::Result<()>>>>,
}

impl Controller {
    pub fn builder(store: Arc<dyn MetadataStore>, queue: Arc<dyn RequestQueue>) -> ControllerBuilder {
        ControllerBuilder::new(store, queue)
    }

    /// Controller over an in-memory store and queue.
    pub fn in_memory(config: ControllerConfig) -> Result<Self> {
        Self::builder(
            Arc::new(InMemoryMetadataStore::new()),
            Arc::new(InMemoryRequestQueue::new()),
        )
        .with_config(config)
        .build()
    }

    /// Start the pipeline. Calling it again while running does nothing.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|task| !task.is_finished()) {
            warn!("Controller already started");
            return;
        }
        info!(
            workers = self.processor.config().worker_pool_size,
            timeout_ms = self.tracker.governor().completion_timeout().as_millis() as u64,
            "Starting controller"
        );
        *running = Some(self.processor.clone().spawn());
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop the pipeline and wait for running handlers to finish.
    ///
    /// Waiting callers are not cancelled; they resolve from the store or
    /// their deadline.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.shutdown();
        let task = self.running.lock().take();
        if let Some(task) = task {
            task.await.map_err(|e| SluiceError::Other(e.into()))??;
        }
        info!("Controller stopped");
        Ok(())
    }

    pub fn service(&self) -> &Arc<ControllerService> {
        &self.service
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn governor(&self) -> &TimeoutGovernor {
        self.tracker.governor()
    }

    /// Change the completion timeout for operations submitted from now on.
    pub fn set_completion_timeout(&self, timeout: Duration) {
        self.tracker.governor().set_completion_timeout(timeout);
    }

    pub fn failures(&self) -> Arc<FailedRequestLog> {
        self.processor.failures()
    }

    pub fn metrics(&self) -> &Arc<ControllerMetrics> {
        self.service.metrics()
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Builder for creating a [`Controller`].
pub struct ControllerBuilder {
    store: Arc<dyn MetadataStore>,
    queue: Arc<dyn RequestQueue>,
    config: ControllerConfig,
    metrics: Option<Arc<ControllerMetrics>>,
    hosts: Option<Arc<dyn HostDiscovery>>,
    handlers: Vec<Arc<dyn RequestHandler>>,
    failures: Option<Arc<FailedRequestLog>>,
    listeners: Vec<Arc<dyn OutcomeListener>>,
}

impl ControllerBuilder {
    pub fn new(store: Arc<dyn MetadataStore>, queue: Arc<dyn RequestQueue>) -> Self {
        Self {
            store,
            queue,
            config: ControllerConfig::default(),
            metrics: None,
            hosts: None,
            handlers: Vec::new(),
            failures: None,
            listeners: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ControllerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_host_discovery(mut self, hosts: Arc<dyn HostDiscovery>) -> Self {
        self.hosts = Some(hosts);
        self
    }

    /// Replace the built-in handler for the handler's operation kind.
    pub fn with_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_failure_log(mut self, failures: Arc<FailedRequestLog>) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Also receive every terminal pipeline outcome.
    pub fn with_listener(mut self, listener: Arc<dyn OutcomeListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> Result<Controller> {
        self.config.validate()?;
        let metrics = self.metrics.unwrap_or_default();
        let hosts = self
            .hosts
            .unwrap_or_else(|| Arc::new(StaticHostDiscovery::new()));

        let tracker = Arc::new(CompletionTracker::new(
            self.store.clone(),
            TimeoutGovernor::new(self.config.completion_timeout()),
            self.config.completion_poll_interval(),
            metrics.clone(),
        ));

        let registry = self
            .handlers
            .into_iter()
            .fold(HandlerRegistry::standard(self.store.clone()), |registry, handler| {
                registry.with_handler(handler)
            });
        let shutdown = ShutdownHandle::new();
        let mut processor = RequestProcessor::builder(self.queue.clone(), registry)
            .with_config(PipelineConfig::from(&self.config))
            .with_metrics(metrics.clone())
            .with_shutdown(shutdown.clone())
            .with_listener(tracker.clone());
        if let Some(failures) = self.failures {
            processor = processor.with_failure_log(failures);
        }
        for listener in self.listeners {
            processor = processor.with_listener(listener);
        }
        let processor = Arc::new(processor.build()?);

        let service = Arc::new(
            ControllerService::new(self.store.clone(), self.queue, tracker.clone(), hosts, metrics)
                .with_retry(self.config.retry.clone()),
        );

        Ok(Controller {
            config: self.config,
            store: self.store,
            service,
            tracker,
            processor,
            shutdown,
            running: Mutex::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::OperationStatus;
    use sluice_core::types::{ScalingPolicy, StreamConfiguration, StreamId, StreamState};

    #[tokio::test]
    async fn seal_and_delete_through_the_pipeline() {
        let controller = Controller::in_memory(
            ControllerConfig::default().with_completion_timeout(Duration::from_secs(10)),
        )
        .unwrap();
        controller.start();
        assert!(controller.is_running());

        let id = StreamId::new("scope", "lifecycle");
        let service = controller.service();
        service
            .create_stream(id.clone(), StreamConfiguration::new(ScalingPolicy::fixed(2)))
            .await
            .unwrap();

        assert_eq!(service.seal_stream(id.clone()).await.unwrap(), OperationStatus::Success);
        assert_eq!(service.stream_state(&id).await.unwrap(), StreamState::Sealed);

        assert_eq!(service.delete_stream(id.clone()).await.unwrap(), OperationStatus::Success);
        assert!(matches!(
            service.get_stream(&id).await.unwrap_err(),
            SluiceError::StreamNotFound(_)
        ));

        controller.shutdown().await.unwrap();
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn timeout_change_applies_without_restart() {
        let controller = Controller::in_memory(ControllerConfig::default()).unwrap();
        assert_eq!(
            controller.governor().completion_timeout(),
            Duration::from_secs(120)
        );
        controller.set_completion_timeout(Duration::from_millis(500));
        assert_eq!(
            controller.governor().completion_timeout(),
            Duration::from_millis(500)
        );
    }
}
