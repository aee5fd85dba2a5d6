//! Per-session log broadcast.
//!
//! Publishing never blocks. Each subscriber keeps at most `capacity` unread
//! messages; when it falls further behind, the oldest are dropped and its next
//! `recv` reports how many were skipped (`RecvError::Lagged`). Messages
//! published while nobody is subscribed are discarded.
//!
//! The buffer is a `tokio::sync::broadcast` ring, so the requested capacity is
//! rounded up to the next power of two.

use tokio::sync::broadcast;

/// Default number of unread messages a subscriber may hold.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Broadcast channel for a session's log lines.
#[derive(Debug, Clone)]
pub struct PubSub {
    sender: broadcast::Sender<String>,
    capacity: usize,
}

impl PubSub {
    /// Create a channel; a zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Publish a message. Returns how many subscribers will see it.
    pub fn publish(&self, message: impl Into<String>) -> usize {
        self.sender.send(message.into()).unwrap_or(0)
    }

    /// Receive every message published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Current number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Effective per-subscriber buffer size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let log = PubSub::new(4);
        assert_eq!(log.publish("nobody listens"), 0);

        let mut rx = log.subscribe();
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_each_message() {
        let log = PubSub::new(4);
        let mut a = log.subscribe();
        let mut b = log.subscribe();
        assert_eq!(log.publish("hello"), 2);
        assert_eq!(a.recv().await.unwrap(), "hello");
        assert_eq!(b.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_slow_subscriber_loses_oldest() {
        let log = PubSub::new(4);
        let mut rx = log.subscribe();
        for i in 0..6 {
            log.publish(format!("m{i}"));
        }

        assert_eq!(rx.recv().await, Err(RecvError::Lagged(2)));
        for i in 2..6 {
            assert_eq!(rx.recv().await.unwrap(), format!("m{i}"));
        }
    }

    #[test]
    fn test_capacity_rounding() {
        assert_eq!(PubSub::new(0).capacity(), 1);
        assert_eq!(PubSub::new(100).capacity(), 128);
    }
}
