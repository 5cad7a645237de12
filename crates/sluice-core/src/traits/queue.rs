use crate::error::Result;
use crate::types::OperationRequest;
use crate::notify::ChangeNotifier;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Position of a request in the queue - strictly monotonic u64
pub type QueueOffset = u64;

/// Key signalled on the queue's notifier when a request is appended.
pub const APPEND_WAKE_KEY: &str = "requests";

/// A request together with its queue position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub offset: QueueOffset,
    pub request: OperationRequest,
}

/// Durable, ordered, append-only request channel.
///
/// Delivery is at-least-once: consumers read from the acknowledged offset,
/// so anything not acknowledged before a restart is read again.
#[async_trait]
pub trait RequestQueue: Send + Sync {
    /// Durably append a request.
    ///
    /// Returns only once the request survives a restart. An error means the
    /// request was not recorded.
    async fn append(&self, request: &OperationRequest) -> Result<QueueOffset>;

    /// Read up to `max` requests starting at `from` (inclusive).
    async fn read_from(&self, from: QueueOffset, max: usize) -> Result<Vec<QueuedRequest>>;

    /// Record that every offset below `next` has been fully processed.
    async fn acknowledge(&self, next: QueueOffset) -> Result<()>;

    /// First offset that has not been acknowledged.
    async fn acknowledged(&self) -> Result<QueueOffset>;

    /// Offset the next append will receive.
    async fn tail(&self) -> Result<QueueOffset>;

    /// Notifier signalled under [`APPEND_WAKE_KEY`] on every append.
    fn append_notifier(&self) -> ChangeNotifier;
}
