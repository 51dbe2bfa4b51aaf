use std::collections::VecDeque;
use std::fmt;

use parking_lot::{Condvar, Mutex};

use super::DispatchError;
use crate::ipc::{Event, Reply};

/// Invoked on the dispatch thread with the outcome of one event.
pub type ReplyCallback = Box<dyn FnOnce(Result<Reply, DispatchError>) + Send + 'static>;

/// One event plus its optional reply callback, owned by the queue until
/// dequeued and by the dispatch thread for one round trip after that.
pub struct PendingDispatch {
    pub event: Event,
    callback: Option<ReplyCallback>,
}

impl PendingDispatch {
    pub fn new(event: Event, callback: Option<ReplyCallback>) -> Self {
        Self { event, callback }
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Hands the outcome to the callback, if there is one.
    pub fn complete(self, result: Result<Reply, DispatchError>) {
        if let Some(callback) = self.callback {
            callback(result);
        }
    }
}

impl fmt::Debug for PendingDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingDispatch")
            .field("event", &self.event)
            .field("has_callback", &self.has_callback())
            .finish()
    }
}

/// FIFO of pending events. Many writers, one reader.
///
/// Enqueue only takes the lock long enough to push; the reader sleeps on a
/// condition variable while the queue is empty.
pub struct EventQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

struct QueueInner {
    items: VecDeque<PendingDispatch>,
    closed: bool,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Appends to the tail. Fails once the queue is closed; the callback is
    /// then dropped without being called.
    pub fn enqueue(&self, pending: PendingDispatch) -> Result<(), DispatchError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(DispatchError::Stopped);
        }
        inner.items.push_back(pending);
        drop(inner);
        self.available.notify_one();
        Ok(())
    }

    /// Blocks until an item is available. `None` once the queue is closed,
    /// even if items remain.
    pub fn wait_dequeue(&self) -> Option<PendingDispatch> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(pending) = inner.items.pop_front() {
                return Some(pending);
            }
            self.available.wait(&mut inner);
        }
    }

    /// Stops all further dequeues and wakes the reader.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }

    /// Takes every item still queued, in order.
    pub fn drain(&self) -> Vec<PendingDispatch> {
        self.inner.lock().items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
