use sluice_core::error::Result;
use sluice_core::traits::{QueueOffset, QueuedRequest, RequestQueue, APPEND_WAKE_KEY};
use sluice_core::notify::ChangeNotifier;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Restartable reader over a [`RequestQueue`].
///
/// A subscription starts at the queue's acknowledged offset, so opening a new
/// one after a crash re-delivers everything that was never acknowledged.
/// Reading never acknowledges; see [`AckWindow`].
pub struct Subscription {
    queue: Arc<dyn RequestQueue>,
    notifier: ChangeNotifier,
    position: QueueOffset,
    buffered: VecDeque<QueuedRequest>,
    batch_size: usize,
    idle_wait: Duration,
}

impl Subscription {
    pub async fn open(
        queue: Arc<dyn RequestQueue>,
        batch_size: usize,
        idle_wait: Duration,
    ) -> Result<Self> {
        let position = queue.acknowledged().await?;
        let notifier = queue.append_notifier();
        tracing::debug!(position, batch_size, "Opened queue subscription");
        Ok(Self {
            queue,
            notifier,
            position,
            buffered: VecDeque::new(),
            batch_size: batch_size.max(1),
            idle_wait,
        })
    }

    /// Offset of the next request this subscription will fetch from the queue
    pub fn position(&self) -> QueueOffset {
        self.position
    }

    /// Next request, waiting for an append if the queue is drained.
    ///
    /// Cancel safe: dropping the future loses nothing.
    pub async fn next(&mut self) -> Result<QueuedRequest> {
        loop {
            if let Some(item) = self.buffered.pop_front() {
                return Ok(item);
            }
            if self.fill().await? == 0 {
                // A notification racing the read is caught by the bounded wait.
                self.notifier.wait_for(APPEND_WAKE_KEY, self.idle_wait).await;
            }
        }
    }

    /// Buffered and immediately available requests, without waiting
    pub async fn try_next_batch(&mut self) -> Result<Vec<QueuedRequest>> {
        if self.buffered.is_empty() {
            self.fill().await?;
        }
        Ok(self.buffered.drain(..).collect())
    }

    async fn fill(&mut self) -> Result<usize> {
        let batch = self.queue.read_from(self.position, self.batch_size).await?;
        let count = batch.len();
        if let Some(last) = batch.last() {
            self.position = last.offset + 1;
        }
        self.buffered.extend(batch);
        Ok(count)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("position", &self.position)
            .field("buffered", &self.buffered.len())
            .finish()
    }
}

/// Tracks finished offsets and yields the highest acknowledgeable offset.
///
/// Requests finish out of order when they target different streams; the
/// acknowledgement only moves over a gap-free prefix so an unfinished request
/// is never skipped on restart.
#[derive(Debug, Clone)]
pub struct AckWindow {
    next: QueueOffset,
    finished: BTreeSet<QueueOffset>,
}

impl AckWindow {
    pub fn new(start: QueueOffset) -> Self {
        Self {
            next: start,
            finished: BTreeSet::new(),
        }
    }

    /// First offset that is not yet acknowledgeable
    pub fn watermark(&self) -> QueueOffset {
        self.next
    }

    /// Number of finished offsets waiting on an earlier one
    pub fn out_of_order(&self) -> usize {
        self.finished.len()
    }

    /// Mark `offset` finished. Returns the new watermark if it advanced.
    pub fn complete(&mut self, offset: QueueOffset) -> Option<QueueOffset> {
        if offset < self.next {
            return None;
        }
        self.finished.insert(offset);
        let before = self.next;
        while self.finished.remove(&self.next) {
            self.next += 1;
        }
        (self.next > before).then_some(self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_window_waits_for_gaps() {
        let mut window = AckWindow::new(10);
        assert_eq!(window.complete(12), None);
        assert_eq!(window.complete(11), None);
        assert_eq!(window.out_of_order(), 2);
        assert_eq!(window.complete(10), Some(13));
        assert_eq!(window.watermark(), 13);
        assert_eq!(window.out_of_order(), 0);
    }

    #[test]
    fn ack_window_ignores_stale_offsets() {
        let mut window = AckWindow::new(5);
        assert_eq!(window.complete(3), None);
        assert_eq!(window.complete(5), Some(6));
        assert_eq!(window.complete(5), None);
    }
}
