//! Per-asset-type pipelines.
//!
//! A [`Pipeline`] is the ordered handler chain for one asset type plus its
//! input queue. The dispatcher starts a pipeline's driver on first use; the
//! driver runs each queued element in its own task, bounded by the pipeline's
//! concurrency, and pushes the finished element onto the completion queue the
//! element carries.
//!
//! Pipelines are immutable. A registry rebuild retires the old one: its driver
//! finishes whatever is already queued and exits, and later enqueues are
//! refused so the caller can resolve the replacement.

use crate::queue::SignalQueue;
use futures::FutureExt;
use scout_core::{AssetType, BoxError, Event, EventState, Handler, HandlerError, Message};
use std::{
    any::Any,
    fmt,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{runtime::Handle, sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;

/// Which stage failed and how.
#[derive(Debug, Error)]
#[error("{}: {error}", self.stage())]
pub struct HandlerFailure {
    /// Failing handler, or `None` when the pipeline itself rejected the event.
    pub handler: Option<String>,
    /// The failure.
    #[source]
    pub error: HandlerError,
}

impl HandlerFailure {
    /// A failure attributed to a handler.
    pub fn handler(name: impl Into<String>, error: HandlerError) -> Self {
        Self {
            handler: Some(name.into()),
            error,
        }
    }

    /// A failure raised before any handler ran.
    pub fn pipeline(error: HandlerError) -> Self {
        Self {
            handler: None,
            error,
        }
    }

    fn stage(&self) -> String {
        match &self.handler {
            Some(name) => format!("handler `{name}` failed"),
            None => "pipeline rejected event".to_string(),
        }
    }
}

/// An event travelling through a pipeline.
#[derive(Debug)]
pub struct EventDataElement {
    /// The event.
    pub event: Event,
    /// Where the element goes when processing ends.
    pub completion: Arc<SignalQueue<EventDataElement>>,
    /// Set by the stage that failed, if any.
    pub error: Option<HandlerFailure>,
}

impl Message for EventDataElement {}

impl EventDataElement {
    /// Wrap an event.
    pub fn new(event: Event, completion: Arc<SignalQueue<EventDataElement>>) -> Self {
        Self {
            event,
            completion,
            error: None,
        }
    }

    /// Record a failure and move the event to `Error`.
    pub fn fail(&mut self, failure: HandlerFailure) {
        if let Err(err) = self.event.transition(EventState::Error) {
            tracing::debug!(event = %self.event.id, %err, "failed element already settled");
        }
        self.error = Some(failure);
    }

    /// Abandon the element without running it.
    pub fn cancel(&mut self) {
        if let Err(err) = self.event.transition(EventState::Cancelled) {
            tracing::debug!(event = %self.event.id, %err, "cancelled element already settled");
        }
        self.error = Some(HandlerFailure::pipeline(HandlerError::Cancelled));
    }

    /// Hand the element to its completion queue.
    pub fn complete(self) {
        let completion = self.completion.clone();
        completion.append(self);
    }
}

/// The handler chain and input queue for one asset type.
pub struct Pipeline {
    asset_type: AssetType,
    stages: Vec<Arc<Handler>>,
    queue: SignalQueue<EventDataElement>,
    concurrency: usize,
    handler_timeout: Option<Duration>,
    retired: CancellationToken,
    closed: Mutex<bool>,
    started: AtomicBool,
}

impl Pipeline {
    /// Build a pipeline. `stages` must already be in execution order.
    pub fn new(
        asset_type: AssetType,
        stages: Vec<Arc<Handler>>,
        concurrency: usize,
        handler_timeout: Option<Duration>,
    ) -> Self {
        Self {
            asset_type,
            stages,
            queue: SignalQueue::new(),
            concurrency: concurrency.max(1),
            handler_timeout,
            retired: CancellationToken::new(),
            closed: Mutex::new(false),
            started: AtomicBool::new(false),
        }
    }

    /// The asset type served.
    pub fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    /// Handlers in execution order.
    pub fn stages(&self) -> &[Arc<Handler>] {
        &self.stages
    }

    /// Names of the handlers in execution order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|h| h.name.as_str()).collect()
    }

    /// Maximum elements processed at once.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Elements waiting for the driver.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Queue an element. A retired pipeline hands it back.
    pub fn enqueue(&self, element: EventDataElement) -> Result<(), EventDataElement> {
        let closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(element);
        }
        self.queue.append(element);
        Ok(())
    }

    /// Stop accepting work once the queue is drained.
    pub fn retire(&self) {
        self.retired.cancel();
    }

    /// Whether the pipeline has been retired.
    pub fn is_retired(&self) -> bool {
        self.retired.is_cancelled()
    }

    /// Spawn the driver on `runtime`. Only the first call spawns.
    pub fn start(self: &Arc<Self>, runtime: &Handle) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        let pipeline = self.clone();
        runtime.spawn(async move { pipeline.drive().await });
        true
    }

    async fn drive(self: Arc<Self>) {
        tracing::debug!(
            asset_type = %self.asset_type,
            stages = self.stages.len(),
            "pipeline driver started"
        );
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        while self.queue.next(&self.retired).await {
            while let Some(element) = self.queue.data() {
                self.spawn_element(&permits, &mut tasks, element).await;
                while tasks.try_join_next().is_some() {}
            }
        }

        // Nothing can be enqueued once closed, so this drain is final.
        let leftovers = {
            let mut closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
            *closed = true;
            self.queue.drain()
        };
        for element in leftovers {
            self.spawn_element(&permits, &mut tasks, element).await;
        }
        while tasks.join_next().await.is_some() {}
        tracing::debug!(asset_type = %self.asset_type, "pipeline driver exited");
    }

    async fn spawn_element(
        self: &Arc<Self>,
        permits: &Arc<Semaphore>,
        tasks: &mut JoinSet<()>,
        element: EventDataElement,
    ) {
        // The semaphore is never closed, so acquisition only waits.
        let Ok(permit) = permits.clone().acquire_owned().await else {
            element.complete();
            return;
        };
        let pipeline = self.clone();
        tasks.spawn(async move {
            let _permit = permit;
            pipeline.process(element).await;
        });
    }

    /// Run one element through the chain and hand it to its completion queue.
    pub async fn process(&self, mut element: EventDataElement) {
        if let Err(err) = element.event.transition(EventState::InProcess) {
            element.fail(HandlerFailure::pipeline(HandlerError::Custom(Box::new(err))));
            element.complete();
            return;
        }

        let outcome = if element.event.is_expired() {
            Err(HandlerFailure::pipeline(HandlerError::Expired))
        } else {
            self.run_stages(&element.event).await
        };

        match outcome {
            Ok(()) => {
                if let Err(err) = element.event.transition(EventState::Done) {
                    element.fail(HandlerFailure::pipeline(HandlerError::Custom(Box::new(err))));
                }
            }
            Err(failure) => element.fail(failure),
        }
        element.complete();
    }

    async fn run_stages(&self, event: &Event) -> Result<(), HandlerFailure> {
        for stage in &self.stages {
            if !event.action.admits(stage.claimed_transforms().into_iter()) {
                continue;
            }
            let call = AssertUnwindSafe(stage.callback().handle_dyn(event)).catch_unwind();
            let result = match self.handler_timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Ok(Err(Box::new(HandlerError::Timeout(limit)) as BoxError)),
                },
                None => call.await,
            };
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    return Err(HandlerFailure::handler(&stage.name, HandlerError::from(err)));
                }
                Err(panic) => {
                    return Err(HandlerFailure::handler(
                        &stage.name,
                        HandlerError::Panic(panic_message(panic.as_ref())),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("asset_type", &self.asset_type)
            .field("stages", &self.stage_names())
            .field("concurrency", &self.concurrency)
            .field("queued", &self.queued())
            .field("retired", &self.is_retired())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingHandler, TestAsset};
    use scout_core::{Action, SessionId};
    use std::sync::Mutex as StdMutex;

    fn processable(event: Event) -> Event {
        let mut event = event;
        event.transition(EventState::Processable).unwrap();
        event
    }

    fn element(event: Event, completion: &Arc<SignalQueue<EventDataElement>>) -> EventDataElement {
        EventDataElement::new(processable(event), completion.clone())
    }

    fn fqdn_event() -> Event {
        Event::asset(SessionId::new(), TestAsset::fqdn("a.example"))
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let order = Arc::new(StdMutex::new(Vec::new()));
        let stages = ["first", "second"]
            .into_iter()
            .map(|name| {
                let order = order.clone();
                Arc::new(Handler::new(name, AssetType::Fqdn, move |_e: Event| {
                    let order = order.clone();
                    async move {
                        order.lock().unwrap().push(name);
                        Ok::<(), BoxError>(())
                    }
                }))
            })
            .collect();
        let pipeline = Pipeline::new(AssetType::Fqdn, stages, 1, None);
        let completion = Arc::new(SignalQueue::new());

        pipeline.process(element(fqdn_event(), &completion)).await;

        let done = completion.data().unwrap();
        assert!(done.error.is_none());
        assert_eq!(done.event.state(), EventState::Done);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_first_error_stops_chain() {
        let after = RecordingHandler::new();
        let stages = vec![
            Arc::new(Handler::new("broken", AssetType::Fqdn, |_e: Event| async {
                Err::<(), BoxError>("lookup failed".into())
            })),
            Arc::new(Handler::new("after", AssetType::Fqdn, after.clone())),
        ];
        let pipeline = Pipeline::new(AssetType::Fqdn, stages, 1, None);
        let completion = Arc::new(SignalQueue::new());

        pipeline.process(element(fqdn_event(), &completion)).await;

        let done = completion.data().unwrap();
        assert_eq!(done.event.state(), EventState::Error);
        let failure = done.error.unwrap();
        assert_eq!(failure.handler.as_deref(), Some("broken"));
        assert_eq!(after.count(), 0);
    }

    #[tokio::test]
    async fn test_panics_are_captured() {
        let stages = vec![Arc::new(Handler::new(
            "explodes",
            AssetType::Fqdn,
            |_e: Event| async {
                if true {
                    panic!("kaboom");
                }
                Ok::<(), BoxError>(())
            },
        ))];
        let pipeline = Pipeline::new(AssetType::Fqdn, stages, 1, None);
        let completion = Arc::new(SignalQueue::new());

        pipeline.process(element(fqdn_event(), &completion)).await;

        match completion.data().unwrap().error.unwrap().error {
            HandlerError::Panic(msg) => assert_eq!(msg, "kaboom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expired_event_skips_handlers() {
        let recorder = RecordingHandler::new();
        let stages = vec![Arc::new(Handler::new("r", AssetType::Fqdn, recorder.clone()))];
        let pipeline = Pipeline::new(AssetType::Fqdn, stages, 1, None);
        let completion = Arc::new(SignalQueue::new());

        let expired = fqdn_event().with_timeout(chrono::Utc::now() - chrono::Duration::seconds(1));
        pipeline.process(element(expired, &completion)).await;

        let failure = completion.data().unwrap().error.unwrap();
        assert!(failure.handler.is_none());
        assert!(matches!(failure.error, HandlerError::Expired));
        assert_eq!(recorder.count(), 0);
    }

    #[tokio::test]
    async fn test_transform_action_filters_stages() {
        let dns = RecordingHandler::new();
        let whois = RecordingHandler::new();
        let stages = vec![
            Arc::new(Handler::new("dns", AssetType::Fqdn, dns.clone())),
            Arc::new(Handler::new("whois", AssetType::Fqdn, whois.clone())),
        ];
        let pipeline = Pipeline::new(AssetType::Fqdn, stages, 1, None);
        let completion = Arc::new(SignalQueue::new());

        let event = fqdn_event().with_action(Action::Transforms(vec!["whois".into()]));
        pipeline.process(element(event, &completion)).await;

        assert_eq!((dns.count(), whois.count()), (0, 1));
    }

    #[tokio::test]
    async fn test_handler_timeout() {
        let stages = vec![Arc::new(Handler::new("slow", AssetType::Fqdn, |_e: Event| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), BoxError>(())
        }))];
        let pipeline = Pipeline::new(AssetType::Fqdn, stages, 1, Some(Duration::from_millis(10)));
        let completion = Arc::new(SignalQueue::new());

        pipeline.process(element(fqdn_event(), &completion)).await;

        let failure = completion.data().unwrap().error.unwrap();
        assert!(matches!(failure.error, HandlerError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_driver_drains_then_refuses_after_retire() {
        let recorder = RecordingHandler::new();
        let stages = vec![Arc::new(Handler::new("r", AssetType::Fqdn, recorder.clone()))];
        let pipeline = Arc::new(Pipeline::new(AssetType::Fqdn, stages, 2, None));
        let completion = Arc::new(SignalQueue::new());

        for _ in 0..3 {
            pipeline.enqueue(element(fqdn_event(), &completion)).unwrap();
        }
        pipeline.retire();
        assert!(pipeline.start(&Handle::current()));
        assert!(!pipeline.start(&Handle::current()));

        let cancel = CancellationToken::new();
        let mut finished = 0;
        while finished < 3 {
            tokio::time::timeout(Duration::from_secs(1), completion.next(&cancel))
                .await
                .unwrap();
            while completion.data().is_some() {
                finished += 1;
            }
        }
        assert_eq!(recorder.count(), 3);

        // Wait for the driver to close the pipeline.
        let mut refused = false;
        for _ in 0..100 {
            match pipeline.enqueue(element(fqdn_event(), &completion)) {
                Err(_) => {
                    refused = true;
                    break;
                }
                Ok(()) => {
                    pipeline.queue.drain();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        }
        assert!(refused);
    }
}
