//! # scout-core
//!
//! Core types and traits for the Scout asset-discovery orchestrator.
//!
//! This crate has minimal dependencies and is designed to be imported by
//! plugins that only need to describe handlers, not run them.
//!
//! # Building Blocks
//!
//! ## Assets ([`Asset`], [`AssetType`])
//!
//! The core does not own an asset model. It only needs an asset's kind, which
//! selects a pipeline, and its key, which deduplicates work within a session.
//!
//! ## Events ([`Event`])
//!
//! The unit of dispatch. An event moves forward through
//! `Default → Waiting → Processable → InProcess → Done`, or ends early in
//! `Cancelled` or `Error`. It keeps a weak handle to the dispatcher that
//! accepted it so handlers can dispatch what they discover.
//!
//! ## Handlers ([`EventHandler`], [`Handler`])
//!
//! The work a pipeline stage performs, plus the name, transforms and priority
//! the registry indexes it by.
//!
//! ## Intake ([`Request`], [`Response`])
//!
//! Requests enter through the intake engine; handlers answer with responses
//! whose follow-up generators feed new requests back in.
//!
//! ## Plugins ([`Plugin`])
//!
//! Bundles of handlers registered through a [`HandlerRegistrar`].
//!
//! # Error Types
//!
//! - [`ScoutError`] - Top-level error type
//! - [`RegistryError`] - Registration and lookup errors
//! - [`DispatchError`] - Dispatch rejections
//! - [`HandlerError`] - Failures recorded on pipeline elements

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

mod asset;
mod error;
mod event;
mod handler;
mod id;
mod message;
mod plugin;
mod request;

// Re-exports
pub use asset::{Asset, AssetKey, AssetType, ParseAssetTypeError};
pub use error::{
    BoxError, DispatchError, EventError, HandlerError, IntakeError, PluginError, RegistryError,
    ScoutError,
};
pub use event::{
    Action, DispatcherHandle, Event, EventSink, EventState, EventType, Payload, Repeat,
    RepeatCount,
};
pub use handler::{DynEventHandler, EventHandler, Handler, HandlerRegistrar};
pub use id::{EventId, SessionId};
pub use message::Message;
pub use plugin::Plugin;
pub use request::{Edge, FollowUp, Origin, Request, Response, Responses};
