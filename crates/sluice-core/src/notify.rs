//! Keyed change notifications
//!
//! The metadata store signals a stream's key whenever its record changes and
//! the request queue signals [`APPEND_WAKE_KEY`](crate::traits::APPEND_WAKE_KEY)
//! on every append. A waiter that starts after a signal fired only wakes on
//! the next one, so callers bound each wait with a poll interval.
//!
//! A key only has an entry while somebody is waiting on it; the last waiter
//! to leave removes it, so deleted streams leave nothing behind.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

type Hub = Mutex<HashMap<String, Arc<Notify>>>;

/// Wakes tasks waiting for a change on a key.
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    hub: Arc<Hub>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the next signal on `key`.
    pub async fn wait(&self, key: &str) {
        let watch = self.watch(key);
        watch.notify.notified().await;
    }

    /// Wait for the next signal on `key`, giving up after `max_wait`.
    ///
    /// Returns `true` if a signal arrived.
    pub async fn wait_for(&self, key: &str, max_wait: Duration) -> bool {
        tokio::time::timeout(max_wait, self.wait(key)).await.is_ok()
    }

    /// Wake every task currently waiting on `key`.
    pub fn notify(&self, key: &str) {
        if let Some(notify) = self.hub.lock().get(key) {
            notify.notify_waiters();
        }
    }

    /// Number of keys with at least one waiter.
    pub fn watched_keys(&self) -> usize {
        self.hub.lock().len()
    }

    fn watch(&self, key: &str) -> Watch<'_> {
        let notify = self
            .hub
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();
        Watch {
            hub: &self.hub,
            key: key.to_string(),
            notify,
        }
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("keys", &self.watched_keys())
            .finish()
    }
}

/// One waiter's hold on a key. Dropping the last one removes the entry.
struct Watch<'a> {
    hub: &'a Hub,
    key: String,
    notify: Arc<Notify>,
}

impl Drop for Watch<'_> {
    fn drop(&mut self) {
        let mut hub = self.hub.lock();
        // Waiters only clone under the lock, so the count is stable here:
        // one reference in the map and ours.
        let last = Arc::strong_count(&self.notify) == 2
            && hub
                .get(&self.key)
                .is_some_and(|current| Arc::ptr_eq(current, &self.notify));
        if last {
            hub.remove(&self.key);
        }
    }
}
