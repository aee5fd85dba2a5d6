//! Error types for Scout.
//!
//! This module provides a structured error hierarchy using `thiserror`:
//!
//! - [`ScoutError`] - Top-level error type for all Scout operations
//! - [`RegistryError`] - Handler registration and lookup errors
//! - [`DispatchError`] - Errors returned synchronously by event dispatch
//! - [`HandlerError`] - Errors captured on a pipeline element
//! - [`EventError`] - Invalid event lifecycle transitions
//! - [`IntakeError`] - Intake engine lifecycle errors
//! - [`PluginError`] - A plugin that failed to start

use crate::{
    asset::{AssetKey, AssetType},
    event::EventState,
    id::{EventId, SessionId},
};
use std::time::Duration;
use thiserror::Error;

/// A boxed error type for dynamic error handling.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for all Scout operations.
#[derive(Error, Debug)]
pub enum ScoutError {
    /// Registration or lookup failed.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Dispatch rejected an event.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// A handler failed.
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    /// An event lifecycle rule was violated.
    #[error("event error: {0}")]
    Event(#[from] EventError),

    /// The intake engine refused the operation.
    #[error("intake error: {0}")]
    Intake(#[from] IntakeError),

    /// A custom error occurred.
    #[error(transparent)]
    Custom(BoxError),
}

/// Errors raised by the handler registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The asset type is not known to this registry.
    #[error("invalid asset type: {0}")]
    InvalidType(AssetType),

    /// A handler with this name already serves this type and transform.
    #[error("handler `{name}` already registered for {asset_type} transform `{transform}`")]
    DuplicateHandler {
        /// Target type.
        asset_type: AssetType,
        /// Handler name.
        name: String,
        /// Colliding transform.
        transform: String,
    },

    /// Nothing is registered for the type (or for the requested transforms).
    #[error("no handlers registered for {0}")]
    NoHandlers(AssetType),

    /// Pipelines have not been built for the type.
    #[error("no pipeline registered for {0}")]
    NoPipeline(AssetType),
}

/// Errors returned synchronously by `dispatch_event`.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The event carries no asset to route.
    #[error("event {event} carries no asset")]
    MissingAsset {
        /// Offending event.
        event: EventId,
    },

    /// The asset was already scheduled in this session.
    #[error("event previously scheduled: {0}")]
    AlreadyScheduled(AssetKey),

    /// The owning session does not exist (or was cancelled).
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// Pipeline resolution failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The event is in a state that cannot be dispatched.
    #[error(transparent)]
    Event(#[from] EventError),

    /// The dispatcher was shut down.
    #[error("dispatcher has been shut down")]
    Shutdown,
}

/// Errors captured while a pipeline processes an event.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panic(String),

    /// The handler exceeded its time budget.
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),

    /// The work was cancelled.
    #[error("handler was cancelled")]
    Cancelled,

    /// The event's deadline passed before it was processed.
    #[error("event expired before processing")]
    Expired,

    /// A custom handler error.
    #[error(transparent)]
    Custom(BoxError),
}

impl From<BoxError> for HandlerError {
    fn from(err: BoxError) -> Self {
        match err.downcast::<HandlerError>() {
            Ok(inner) => *inner,
            Err(other) => HandlerError::Custom(other),
        }
    }
}

/// Event lifecycle violations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The transition would move the event backwards or out of a terminal state.
    #[error("invalid event transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current state.
        from: EventState,
        /// Requested state.
        to: EventState,
    },

    /// Dependencies are still outstanding.
    #[error("{pending} dependencies are not settled")]
    UnmetDependencies {
        /// Outstanding dependency count.
        pending: usize,
    },
}

/// Intake engine lifecycle errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntakeError {
    /// `start` was called twice.
    #[error("intake engine already started")]
    AlreadyStarted,

    /// The engine no longer accepts requests.
    #[error("intake engine is closed")]
    Closed,

    /// The request buffer is full.
    #[error("intake buffer is full")]
    Full,

    /// Graceful drain did not finish in time; remaining work was cancelled.
    #[error("drain timed out with {in_flight} handlers in flight")]
    DrainTimeout {
        /// Handlers still running when the deadline hit.
        in_flight: usize,
    },
}

/// A plugin whose `start` failed.
#[derive(Error, Debug)]
#[error("plugin `{name}` failed to start")]
pub struct PluginError {
    /// Plugin name.
    pub name: String,
    /// Underlying failure.
    #[source]
    pub source: BoxError,
}

// Convenience conversions
impl From<BoxError> for ScoutError {
    fn from(err: BoxError) -> Self {
        ScoutError::Custom(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boxed_handler_error_is_unwrapped() {
        let boxed: BoxError = Box::new(HandlerError::Timeout(Duration::from_secs(1)));
        assert!(matches!(HandlerError::from(boxed), HandlerError::Timeout(_)));

        let other: BoxError = "boom".into();
        match HandlerError::from(other) {
            HandlerError::Custom(e) => assert_eq!(e.to_string(), "boom"),
            e => panic!("unexpected {e:?}"),
        }
    }

    #[test]
    fn test_already_scheduled_message() {
        let err = DispatchError::AlreadyScheduled(AssetKey::new(AssetType::Fqdn, "a.example"));
        assert_eq!(err.to_string(), "event previously scheduled: FQDN:a.example");
    }
}
