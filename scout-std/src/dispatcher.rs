//! The dispatcher.
//!
//! Every asset event passes the session's dedup gate, is routed to the
//! pipeline for its asset type and is counted as a work item. A single drain
//! task consumes finished elements from the shared completion queue: it logs
//! failures, counts completions, settles the event in its session, releases
//! parked dependents and schedules repetitions.
//!
//! The drain only holds the dispatcher weakly: dropping the last
//! [`Dispatcher`] without calling [`Dispatcher::shutdown`] still ends it.

use crate::{
    intake::{Flow, IntakeContext, IntakeHandler},
    pipeline::{EventDataElement, HandlerFailure, Pipeline},
    queue::SignalQueue,
    registry::Registry,
    session::{Insertion, Session, SessionManager},
};
use scout_core::{
    BoxError, DispatchError, DispatcherHandle, Event, EventError, EventId, EventSink, EventState,
    EventType, HandlerError, Payload, SessionId,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Routes events into pipelines and tracks their completion.
///
/// Cloning is cheap; clones share one dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    me: Weak<Inner>,
    registry: Arc<Registry>,
    sessions: Arc<SessionManager>,
    completions: Arc<SignalQueue<EventDataElement>>,
    parked: Mutex<Vec<Parked>>,
    shutdown: CancellationToken,
    drain: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

/// An element waiting for its dependencies.
struct Parked {
    element: EventDataElement,
    pipeline: Arc<Pipeline>,
}

enum Readiness {
    Ready,
    Pending,
    Blocked(EventId),
}

impl Dispatcher {
    /// Create a dispatcher and spawn its completion drain.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(registry: Arc<Registry>, sessions: Arc<SessionManager>) -> Self {
        let inner = Arc::new_cyclic(|me| Inner {
            me: me.clone(),
            registry,
            sessions,
            completions: Arc::new(SignalQueue::new()),
            parked: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            drain: Mutex::new(None),
            runtime: Handle::current(),
        });
        let task = inner.runtime.spawn(drain_completions(
            Arc::downgrade(&inner),
            inner.completions.clone(),
            inner.shutdown.clone(),
        ));
        *inner.lock_drain() = Some(task);
        Self { inner }
    }

    /// Dispatch an event.
    ///
    /// Log events go to the session log. Asset events must be fresh
    /// (`EventState::Default`) and pass the session's dedup gate before they
    /// are routed.
    pub fn dispatch_event(&self, event: Event) -> Result<(), DispatchError> {
        self.inner.dispatch_event(event)
    }

    /// The dispatcher as intake middleware.
    pub fn dispatch_handler(&self) -> DispatchHandler {
        DispatchHandler {
            dispatcher: self.clone(),
        }
    }

    /// The registry pipelines are resolved from.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// The sessions events are scoped to.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.inner.sessions
    }

    /// Events waiting for dependencies.
    pub fn parked(&self) -> usize {
        self.inner.lock_parked().len()
    }

    /// Remove and cancel a session, dropping its parked events.
    pub fn cancel_session(&self, id: &SessionId) -> Option<Arc<Session>> {
        let session = self.inner.sessions.cancel(id)?;
        self.inner.purge_parked(id);
        Some(session)
    }

    /// Whether [`shutdown`](Self::shutdown) has begun.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop the completion drain, discard what is left and retire every
    /// pipeline.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let task = self.inner.lock_drain().take();
        let Some(task) = task else {
            return;
        };
        if let Err(err) = task.await {
            tracing::warn!(%err, "completion drain ended abnormally");
        }

        let discarded = self.inner.completions.drain().len();
        let parked = std::mem::take(&mut *self.inner.lock_parked()).len();
        self.inner.registry.shutdown();
        tracing::debug!(discarded, parked, "dispatcher shut down");
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("completions", &self.inner.completions.len())
            .field("parked", &self.parked())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Inner {
    fn dispatch_event(&self, mut event: Event) -> Result<(), DispatchError> {
        if self.shutdown.is_cancelled() {
            return Err(DispatchError::Shutdown);
        }

        if event.event_type == EventType::Log {
            let session = self.session(&event)?;
            let message = match &event.payload {
                Payload::Log(message) => message.clone(),
                _ => event.name.clone(),
            };
            session.publish(message);
            return Ok(());
        }

        let Some(asset) = event.asset_payload().cloned() else {
            return Err(DispatchError::MissingAsset { event: event.id });
        };
        let session = self.session(&event)?;
        if event.state() != EventState::Default {
            return Err(EventError::InvalidTransition {
                from: event.state(),
                to: EventState::Processable,
            }
            .into());
        }

        let key = asset.asset_key();
        if let Insertion::AlreadyPresent(entry) = session.cache().insert_asset(key.clone()) {
            tracing::trace!(
                session = %session.id(),
                asset = %key,
                first_seen = %entry.first_seen,
                "duplicate asset"
            );
            return Err(DispatchError::AlreadyScheduled(key));
        }

        event.attach_dispatcher(DispatcherHandle::new(self.me.clone()));
        self.admit(&session, event)
    }

    fn session(&self, event: &Event) -> Result<Arc<Session>, DispatchError> {
        self.sessions
            .get(&event.session_id)
            .ok_or(DispatchError::UnknownSession(event.session_id))
    }

    /// Resolve the pipeline, count the work item and enqueue or park.
    fn admit(&self, session: &Session, event: Event) -> Result<(), DispatchError> {
        let asset_type = match event.asset_payload() {
            Some(asset) => asset.asset_type(),
            None => return Err(DispatchError::MissingAsset { event: event.id }),
        };
        let pipeline = self.registry.get_pipeline(asset_type)?;
        pipeline.start(&self.runtime);

        session.add_work();
        let mut element = EventDataElement::new(event, self.completions.clone());
        tracing::debug!(
            session = %session.id(),
            event = %element.event.id,
            asset = %element.event.name,
            "event admitted"
        );

        let mut parked = self.lock_parked();
        match readiness(session, &element.event) {
            Readiness::Ready => self.enqueue(pipeline, element),
            Readiness::Pending => {
                if let Err(err) = element.event.transition(EventState::Waiting) {
                    tracing::debug!(
                        event = %element.event.id,
                        %err,
                        "unexpected state while parking"
                    );
                }
                parked.push(Parked { element, pipeline });
            }
            Readiness::Blocked(dependency) => {
                tracing::debug!(
                    event = %element.event.id,
                    %dependency,
                    "dependency failed, cancelling"
                );
                element.cancel();
                element.complete();
            }
        }
        Ok(())
    }

    /// Hand a ready element to its pipeline, following a rebuild if the
    /// pipeline was retired meanwhile.
    fn enqueue(&self, pipeline: Arc<Pipeline>, mut element: EventDataElement) {
        if let Err(err) = element.event.transition(EventState::Processable) {
            element.fail(HandlerFailure::pipeline(HandlerError::Custom(Box::new(err))));
            element.complete();
            return;
        }
        let Err(element) = pipeline.enqueue(element) else {
            return;
        };
        let mut element = match self.registry.get_pipeline(pipeline.asset_type()) {
            Ok(current) if !Arc::ptr_eq(&current, &pipeline) => {
                current.start(&self.runtime);
                match current.enqueue(element) {
                    Ok(()) => return,
                    Err(element) => element,
                }
            }
            _ => element,
        };
        element.cancel();
        element.complete();
    }

    fn finish(self: &Arc<Self>, element: EventDataElement) {
        let EventDataElement { event, error, .. } = element;
        let Some(session) = self.sessions.get(&event.session_id) else {
            tracing::debug!(
                session = %event.session_id,
                event = %event.id,
                "completion for closed session"
            );
            self.purge_parked(&event.session_id);
            return;
        };

        if let Some(failure) = &error {
            tracing::warn!(
                session = %session.id(),
                event = %event.id,
                asset = %event.name,
                error = %failure,
                "event processing failed"
            );
            session.publish(format!("{}: {}", event.name, failure));
        }

        session.settle(event.id, event.state());
        session.complete_work();
        self.release_parked(&session);

        if error.is_none() {
            self.schedule_repetition(session, &event);
        }
    }

    fn release_parked(&self, session: &Session) {
        let mut parked = self.lock_parked();
        let waiting = std::mem::take(&mut *parked);
        for entry in waiting {
            if entry.element.event.session_id != session.id() {
                parked.push(entry);
                continue;
            }
            match readiness(session, &entry.element.event) {
                Readiness::Pending => parked.push(entry),
                Readiness::Ready => self.enqueue(entry.pipeline, entry.element),
                Readiness::Blocked(dependency) => {
                    let mut element = entry.element;
                    tracing::debug!(
                        event = %element.event.id,
                        %dependency,
                        "dependency failed, cancelling"
                    );
                    element.cancel();
                    element.complete();
                }
            }
        }
    }

    /// Drop every parked element of a session. Returns how many there were.
    fn purge_parked(&self, session: &SessionId) -> usize {
        let mut parked = self.lock_parked();
        let before = parked.len();
        parked.retain(|entry| entry.element.event.session_id != *session);
        let purged = before - parked.len();
        if purged > 0 {
            tracing::debug!(%session, purged, "parked events of closed session dropped");
        }
        purged
    }

    fn schedule_repetition(self: &Arc<Self>, session: Arc<Session>, event: &Event) {
        let (Some(repeat), Some(next)) = (event.repeat, event.next_repetition()) else {
            return;
        };
        let inner = self.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = inner.shutdown.cancelled() => {}
                _ = session.cancellation_token().cancelled() => {}
                _ = tokio::time::sleep(repeat.every) => {
                    if let Err(err) = inner.admit(&session, next) {
                        tracing::debug!(session = %session.id(), %err, "repetition not scheduled");
                    }
                }
            }
        });
    }

    fn lock_parked(&self) -> MutexGuard<'_, Vec<Parked>> {
        self.parked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_drain(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.drain.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Wakes the drain if nobody called `shutdown`.
        self.shutdown.cancel();
    }
}

impl EventSink for Inner {
    fn dispatch(&self, event: Event) -> Result<(), DispatchError> {
        self.dispatch_event(event)
    }
}

async fn drain_completions(
    inner: Weak<Inner>,
    completions: Arc<SignalQueue<EventDataElement>>,
    shutdown: CancellationToken,
) {
    tracing::debug!("completion drain started");
    while completions.next(&shutdown).await {
        if shutdown.is_cancelled() {
            break;
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        while let Some(element) = completions.data() {
            inner.finish(element);
        }
    }
    tracing::debug!("completion drain exited");
}

fn readiness(session: &Session, event: &Event) -> Readiness {
    let mut pending = false;
    for dependency in &event.depends_on {
        match session.settled_state(dependency) {
            None => pending = true,
            Some(EventState::Done) => {}
            Some(_) => return Readiness::Blocked(*dependency),
        }
    }
    if pending {
        Readiness::Pending
    } else {
        Readiness::Ready
    }
}

// ============================================================================
// Intake middleware
// ============================================================================

/// Intake middleware turning each request into an asset event.
///
/// A request for an asset already scheduled in its session is not an error,
/// but it ends the chain: later middleware never sees a duplicate, so cyclic
/// discoveries cannot feed themselves back into intake.
#[derive(Debug, Clone)]
pub struct DispatchHandler {
    dispatcher: Dispatcher,
}

impl DispatchHandler {
    /// Wrap a dispatcher.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl IntakeHandler for DispatchHandler {
    async fn handle(&self, ctx: &IntakeContext) -> Result<Flow, BoxError> {
        let event = Event::asset(ctx.request.session_id, ctx.request.asset.clone());
        match self.dispatcher.dispatch_event(event) {
            Ok(()) => Ok(Flow::Next),
            Err(DispatchError::AlreadyScheduled(key)) => {
                tracing::debug!(
                    session = %ctx.request.session_id,
                    asset = %key,
                    "asset already scheduled"
                );
                Ok(Flow::Stop)
            }
            Err(err) => Err(err.into()),
        }
    }
}
