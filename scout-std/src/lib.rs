//! # scout-std
//!
//! Standard implementations for the Scout asset-discovery orchestrator.
//!
//! This crate provides:
//! - **Intake**: [`intake::Engine`], bounded-concurrency request processing
//!   with middleware ([`intake::IntakeHandler`])
//! - **Dispatch**: [`Dispatcher`], the dedup gate and completion drain
//! - **Registry**: [`Registry`], handler indexing and per-type [`Pipeline`]s
//! - **Sessions**: [`session::Session`], its cache, counters and log broadcast
//! - **Storage**: [`store::StoreHandler`] over an [`store::AssetStore`]
//! - **Standard handlers**: [`handlers::Timeout`], [`handlers::Traced`]
//! - **Plugins**: [`plugin::PluginSet`]

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

// Re-export core traits
pub use scout_core;

// Modules
pub mod dispatcher;
pub mod handlers;
pub mod intake;
pub mod pipeline;
pub mod plugin;
pub mod queue;
pub mod registry;
pub mod session;
pub mod store;
pub mod testing;

pub use dispatcher::{DispatchHandler, Dispatcher};
pub use pipeline::{EventDataElement, HandlerFailure, Pipeline};
pub use registry::{Registry, RegistryConfig};

#[cfg(feature = "inventory")]
pub use inventory;
