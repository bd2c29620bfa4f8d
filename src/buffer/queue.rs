use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{IngestError, Result};

/// FIFO work queue shared between one producer and any number of workers.
///
/// Pushes never block. Workers either take a bounded bite with
/// [`pop_batch`](Self::pop_batch) or wait for a single item with
/// [`pop_wait`](Self::pop_wait), which returns `None` on timeout instead of
/// failing.
#[derive(Debug)]
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
    closed: AtomicBool,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Append an item to the tail. Fails only once the queue is closed.
    pub fn push(&self, item: T) -> Result<()> {
        if self.is_closed() {
            return Err(IngestError::QueueClosed);
        }
        self.items.lock().push_back(item);
        self.notify.notify_one();
        Ok(())
    }

    /// Remove and return up to `limit` items from the head, oldest first.
    pub fn pop_batch(&self, limit: usize) -> Vec<T> {
        let mut items = self.items.lock();
        let take = limit.min(items.len());
        items.drain(..take).collect()
    }

    /// Put already-withdrawn items back at the head, keeping their order.
    /// Allowed on a closed queue since the items were accepted earlier.
    pub fn requeue(&self, items: Vec<T>) {
        if items.is_empty() {
            return;
        }
        {
            let mut queue = self.items.lock();
            for item in items.into_iter().rev() {
                queue.push_front(item);
            }
        }
        self.notify.notify_one();
    }

    /// Wait up to `timeout` for a single item. `None` means the queue stayed
    /// empty (or is closed and empty).
    pub async fn pop_wait(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a concurrent push is not missed
            let notified = self.notify.notified();

            if let Some(item) = self.items.lock().pop_front() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // A push may have landed right at the deadline
                return self.items.lock().pop_front();
            }
        }
    }

    /// Reject further pushes and wake every waiter. Items already queued can
    /// still be withdrawn.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
