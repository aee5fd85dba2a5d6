//! Time-limited event handling.

use scout_core::{BoxError, Event, EventHandler, HandlerError};
use std::time::Duration;
use tokio::time::timeout;

/// Wraps a handler so it fails with [`HandlerError::Timeout`] when it runs
/// longer than `duration`.
pub struct Timeout<H> {
    inner: H,
    duration: Duration,
}

impl<H> Timeout<H> {
    /// Create a new timeout wrapper.
    pub fn new(inner: H, duration: Duration) -> Self {
        Self { inner, duration }
    }

    /// The time budget.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl<H: EventHandler> EventHandler for Timeout<H> {
    async fn handle(&self, event: &Event) -> Result<(), BoxError> {
        match timeout(self.duration, self.inner.handle(event)).await {
            Ok(result) => result,
            Err(_) => Err(Box::new(HandlerError::Timeout(self.duration))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestAsset;
    use scout_core::SessionId;

    #[tokio::test]
    async fn test_slow_handler_times_out() {
        let slow = Timeout::new(
            |_e: Event| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), BoxError>(())
            },
            Duration::from_millis(10),
        );
        let event = Event::asset(SessionId::new(), TestAsset::fqdn("a.example"));

        let err = slow.handle(&event).await.unwrap_err();
        assert!(matches!(
            HandlerError::from(err),
            HandlerError::Timeout(d) if d == Duration::from_millis(10)
        ));
    }

    #[tokio::test]
    async fn test_fast_handler_passes_through() {
        let fast = Timeout::new(
            |_e: Event| async { Ok::<(), BoxError>(()) },
            Duration::from_secs(1),
        );
        let event = Event::asset(SessionId::new(), TestAsset::fqdn("a.example"));
        fast.handle(&event).await.unwrap();
    }
}
