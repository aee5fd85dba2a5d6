//! The unit of dispatch.
//!
//! An [`Event`] says "this asset needs processing in this session". It carries
//! its lifecycle state, the events it waits for, the work to perform, and a
//! non-owning handle back to the dispatcher that accepted it, so handlers can
//! schedule follow-up work without holding the dispatcher alive.

use crate::{
    asset::Asset,
    error::{DispatchError, EventError},
    id::{EventId, SessionId},
};
use chrono::{DateTime, Utc};
use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

/// Broad category of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventType {
    /// Internal bookkeeping.
    System,
    /// A message for the session log.
    Log,
    /// Application-defined.
    Custom,
    /// An asset to route through its pipeline.
    Asset,
    /// Unclassified.
    #[default]
    Unknown,
}

/// Lifecycle state of an event.
///
/// The forward order is `Default → Waiting → Processable → InProcess → Done`.
/// `Cancelled` and `Error` can be entered from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventState {
    /// Freshly created.
    #[default]
    Default,
    /// Ready to enter a pipeline.
    Processable,
    /// Parked until its dependencies settle.
    Waiting,
    /// Finished successfully.
    Done,
    /// A pipeline is running it.
    InProcess,
    /// Abandoned.
    Cancelled,
    /// A handler failed.
    Error,
}

impl EventState {
    /// Whether no further transitions are possible.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            EventState::Done | EventState::Cancelled | EventState::Error
        )
    }

    const fn rank(self) -> u8 {
        match self {
            EventState::Default => 0,
            EventState::Waiting => 1,
            EventState::Processable => 2,
            EventState::InProcess => 3,
            EventState::Done | EventState::Cancelled | EventState::Error => 4,
        }
    }

    /// Whether `self → next` respects the lifecycle.
    pub const fn can_transition_to(self, next: EventState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            EventState::Cancelled | EventState::Error => true,
            _ => next.rank() > self.rank(),
        }
    }
}

/// What a pipeline should do with the event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Action {
    /// Run every stage of the asset type's pipeline.
    #[default]
    Pipeline,
    /// Run only the stages claiming one of these transforms.
    Transforms(Vec<String>),
}

impl Action {
    /// Whether a stage claiming `transforms` should run.
    pub fn admits<'a>(&self, mut transforms: impl Iterator<Item = &'a str>) -> bool {
        match self {
            Action::Pipeline => true,
            Action::Transforms(wanted) => transforms.any(|t| wanted.iter().any(|w| w == t)),
        }
    }
}

/// Event payload.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    /// Nothing attached.
    #[default]
    Empty,
    /// The asset to process.
    Asset(Arc<dyn Asset>),
    /// A log line.
    Log(String),
    /// Structured application data.
    Data(serde_json::Value),
}

/// How many additional runs a repeating event gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatCount {
    /// Until the dispatcher shuts down.
    Forever,
    /// This many more runs.
    Times(u32),
}

/// Repetition schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repeat {
    /// Delay between the end of one run and the start of the next.
    pub every: Duration,
    /// Remaining runs.
    pub times: RepeatCount,
}

impl Repeat {
    /// Repeat until shutdown.
    pub fn forever(every: Duration) -> Self {
        Self {
            every,
            times: RepeatCount::Forever,
        }
    }

    /// Repeat `n` more times.
    pub fn times(every: Duration, n: u32) -> Self {
        Self {
            every,
            times: RepeatCount::Times(n),
        }
    }

    /// The schedule for the next run, or `None` if nothing remains.
    fn consume(self) -> Option<Repeat> {
        match self.times {
            RepeatCount::Forever => Some(self),
            RepeatCount::Times(0) => None,
            RepeatCount::Times(n) => Some(Repeat {
                times: RepeatCount::Times(n - 1),
                ..self
            }),
        }
    }
}

/// Receives events. Implemented by the dispatcher.
pub trait EventSink: Send + Sync + 'static {
    /// Dispatch an event.
    fn dispatch(&self, event: Event) -> Result<(), DispatchError>;
}

/// Non-owning reference to the dispatcher that accepted an event.
#[derive(Clone, Default)]
pub struct DispatcherHandle(Option<Weak<dyn EventSink>>);

impl DispatcherHandle {
    /// Wrap a weak sink reference.
    pub fn new(sink: Weak<dyn EventSink>) -> Self {
        Self(Some(sink))
    }

    /// The sink, if it is still alive.
    pub fn upgrade(&self) -> Option<Arc<dyn EventSink>> {
        self.0.as_ref().and_then(Weak::upgrade)
    }

    /// Whether a sink was ever attached.
    pub fn is_attached(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// The unit of dispatch.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unique id.
    pub id: EventId,
    /// Owning session.
    pub session_id: SessionId,
    /// Human-readable name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Category.
    pub event_type: EventType,
    /// Events that must settle before this one may run.
    pub depends_on: Vec<EventId>,
    /// Work to perform.
    pub action: Action,
    /// Scheduling hint for consumers; the core does not reorder by it.
    pub priority: i32,
    /// Repetition schedule.
    pub repeat: Option<Repeat>,
    /// Attached data.
    pub payload: Payload,
    /// Advisory deadline, honoured by pipeline stages.
    pub timeout: Option<DateTime<Utc>>,
    state: EventState,
    dispatcher: DispatcherHandle,
}

impl Event {
    /// Create an event with an explicit type and payload.
    pub fn new(
        session_id: SessionId,
        name: impl Into<String>,
        event_type: EventType,
        payload: Payload,
    ) -> Self {
        Self {
            id: EventId::new(),
            session_id,
            name: name.into(),
            created_at: Utc::now(),
            event_type,
            depends_on: Vec::new(),
            action: Action::Pipeline,
            priority: 0,
            repeat: None,
            payload,
            timeout: None,
            state: EventState::Default,
            dispatcher: DispatcherHandle::default(),
        }
    }

    /// An asset event named after the asset.
    pub fn asset(session_id: SessionId, asset: Arc<dyn Asset>) -> Self {
        let name = asset.asset_key().to_string();
        Self::new(session_id, name, EventType::Asset, Payload::Asset(asset))
    }

    /// A log event.
    pub fn log(session_id: SessionId, message: impl Into<String>) -> Self {
        Self::new(session_id, "log", EventType::Log, Payload::Log(message.into()))
    }

    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the action.
    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, id: EventId) -> Self {
        self.depends_on.push(id);
        self
    }

    /// Set the repetition schedule.
    pub fn with_repeat(mut self, repeat: Repeat) -> Self {
        self.repeat = Some(repeat);
        self
    }

    /// Set an absolute deadline.
    pub fn with_timeout(mut self, deadline: DateTime<Utc>) -> Self {
        self.timeout = Some(deadline);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EventState {
        self.state
    }

    /// The asset payload, if any.
    pub fn asset_payload(&self) -> Option<&Arc<dyn Asset>> {
        match &self.payload {
            Payload::Asset(asset) => Some(asset),
            _ => None,
        }
    }

    /// Move to `next`, enforcing the forward-only lifecycle.
    pub fn transition(&mut self, next: EventState) -> Result<(), EventError> {
        if !self.state.can_transition_to(next) {
            return Err(EventError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Count dependencies for which `is_settled` is false.
    pub fn pending_dependencies(&self, is_settled: impl Fn(&EventId) -> bool) -> usize {
        self.depends_on.iter().filter(|id| !is_settled(id)).count()
    }

    /// Become `Processable`, provided every dependency has settled.
    pub fn mark_processable(
        &mut self,
        is_settled: impl Fn(&EventId) -> bool,
    ) -> Result<(), EventError> {
        let pending = self.pending_dependencies(is_settled);
        if pending > 0 {
            return Err(EventError::UnmetDependencies { pending });
        }
        self.transition(EventState::Processable)
    }

    /// Whether the advisory deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.timeout.is_some_and(|deadline| Utc::now() >= deadline)
    }

    /// The next run of a repeating event.
    ///
    /// The copy gets a new id and creation time, starts over in `Default`, and
    /// keeps its deadline at the same distance from creation.
    pub fn next_repetition(&self) -> Option<Event> {
        let repeat = self.repeat?.consume()?;
        let now = Utc::now();
        let timeout = self.timeout.map(|deadline| now + (deadline - self.created_at));
        Some(Event {
            id: EventId::new(),
            created_at: now,
            depends_on: Vec::new(),
            repeat: Some(repeat),
            timeout,
            state: EventState::Default,
            ..self.clone()
        })
    }

    /// Remaining runs after the current one.
    pub fn remaining_repeats(&self) -> Option<RepeatCount> {
        self.repeat.map(|r| r.times)
    }

    /// Attach the dispatcher that accepted this event.
    pub fn attach_dispatcher(&mut self, handle: DispatcherHandle) {
        self.dispatcher = handle;
    }

    /// Dispatch a follow-up event through the dispatcher that accepted this one.
    pub fn dispatch_child(&self, child: Event) -> Result<(), DispatchError> {
        match self.dispatcher.upgrade() {
            Some(sink) => sink.dispatch(child),
            None => Err(DispatchError::Shutdown),
        }
    }

    /// Shorthand for dispatching a discovered asset in the same session.
    pub fn dispatch_asset(&self, asset: Arc<dyn Asset>) -> Result<(), DispatchError> {
        self.dispatch_child(Event::asset(self.session_id, asset))
    }
}
