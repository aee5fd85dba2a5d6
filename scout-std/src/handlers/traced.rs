//! Span-per-invocation instrumentation.

use scout_core::{BoxError, Event, EventHandler};
use tracing::Instrument;

/// Wraps a handler in an `info` span carrying the handler name, the session
/// and the event, and logs failures inside it.
pub struct Traced<H> {
    inner: H,
    name: &'static str,
}

impl<H> Traced<H> {
    /// Create a new tracing wrapper.
    pub const fn new(inner: H, name: &'static str) -> Self {
        Self { inner, name }
    }
}

impl<H: Clone> Clone for Traced<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            name: self.name,
        }
    }
}

impl<H: EventHandler> EventHandler for Traced<H> {
    async fn handle(&self, event: &Event) -> Result<(), BoxError> {
        let span = tracing::info_span!(
            "handle_event",
            handler = %self.name,
            session = %event.session_id,
            event = %event.id,
            event_name = %event.name,
        );

        async move {
            let result = self.inner.handle(event).await;
            if let Err(err) = &result {
                tracing::debug!(error = %err, "handler returned an error");
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingHandler, TestAsset};
    use scout_core::SessionId;

    #[tokio::test]
    async fn test_traced_passthrough() {
        let counter = CountingHandler::new();
        let traced = Traced::new(counter.clone(), "count").clone();
        let event = Event::asset(SessionId::new(), TestAsset::fqdn("a.example"));

        traced.handle(&event).await.unwrap();
        assert_eq!(counter.count(), 1);
    }
}
