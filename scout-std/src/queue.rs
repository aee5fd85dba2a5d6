//! Unbounded, signalling FIFO queue.
//!
//! Backs every pipeline's input and the dispatcher's completion queue. Many
//! producers may [`append`](SignalQueue::append); a single consumer waits
//! with [`next`](SignalQueue::next) and pops with [`data`](SignalQueue::data).

use scout_core::Message;
use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Unbounded FIFO with an availability signal.
pub struct SignalQueue<T: Message> {
    items: Mutex<VecDeque<T>>,
    signal: Notify,
}

impl<T: Message> SignalQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            signal: Notify::new(),
        }
    }

    /// Push to the back. Never blocks.
    pub fn append(&self, item: T) {
        self.lock().push_back(item);
        self.signal.notify_one();
    }

    /// Pop from the front.
    pub fn data(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Wait until an item is available (`true`) or `cancel` fires (`false`).
    ///
    /// Items already queued win over cancellation.
    pub async fn next(&self, cancel: &CancellationToken) -> bool {
        loop {
            let notified = self.signal.notified();
            if !self.is_empty() {
                return true;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return !self.is_empty(),
                _ = notified => {}
            }
        }
    }

    /// Remove and return everything queued.
    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Message> Default for SignalQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Message> std::fmt::Debug for SignalQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalQueue")
            .field("len", &self.len())
            .finish()
    }
}
