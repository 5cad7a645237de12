//! Request handler trait and dispatch table.

use crate::error::{PipelineError, Result};
use crate::handlers::{
    AutoScaleHandler, DeleteHandler, ScaleHandler, SealHandler, TruncateHandler, UpdateHandler,
};
use async_trait::async_trait;
use sluice_core::traits::MetadataStore;
use sluice_core::types::{OperationKind, OperationRequest, TaskOutcome};
use std::collections::HashMap;
use std::sync::Arc;

/// Trait implemented by request handlers.
///
/// A handler drives one operation kind from its transitional state to its
/// terminal state in the metadata store. It must be idempotent: the queue
/// delivers at least once, so the same request may be processed again after
/// it already committed.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Operation kind this handler processes.
    fn kind(&self) -> OperationKind;

    /// Process one request.
    ///
    /// Transient store failures must come back as `Retryable`; anything
    /// else that prevents the commit is `Failed`.
    async fn process(&self, request: &OperationRequest) -> TaskOutcome;
}

/// Dispatch table from operation kind to handler.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: Arc<HashMap<OperationKind, Arc<dyn RequestHandler>>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(HashMap::new()),
        }
    }

    /// Registry with the built-in handler for every operation kind.
    pub fn standard(store: Arc<dyn MetadataStore>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(UpdateHandler::new(store.clone())));
        registry.register(Arc::new(AutoScaleHandler::new(store.clone())));
        registry.register(Arc::new(ScaleHandler::new(store.clone())));
        registry.register(Arc::new(SealHandler::new(store.clone())));
        registry.register(Arc::new(TruncateHandler::new(store.clone())));
        registry.register(Arc::new(DeleteHandler::new(store)));
        registry
    }

    /// Register a handler, replacing any existing one for the same kind.
    pub fn register(&mut self, handler: Arc<dyn RequestHandler>) {
        let kind = handler.kind();
        Arc::make_mut(&mut self.handlers).insert(kind, handler);
    }

    /// Builder-style [`HandlerRegistry::register`].
    pub fn with_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, kind: OperationKind) -> Result<Arc<dyn RequestHandler>> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or(PipelineError::HandlerNotFound(kind))
    }

    pub fn has(&self, kind: OperationKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Every kind without a handler; empty for a complete table.
    pub fn missing(&self) -> Vec<OperationKind> {
        OperationKind::ALL
            .into_iter()
            .filter(|kind| !self.has(*kind))
            .collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort();
        f.debug_struct("HandlerRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}
