//! # scout - Asset-Discovery Orchestration
//!
//! `scout` routes discovered assets through per-type handler pipelines.
//! Requests enter through a bounded-concurrency intake engine, pass a
//! per-session dedup gate, and run through every handler registered for the
//! asset's type, in priority order. Handlers discover new assets, which flow
//! back in as new requests.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scout::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BoxError> {
//!     let config = Config::load("scout.toml")?;
//!     init_logging(config.logging.format);
//!
//!     let discovery = Discovery::new(config);
//!     discovery.register_handler(Handler::new("resolve", AssetType::Fqdn, resolve))?;
//!     discovery.start()?;
//!
//!     let session = discovery.create_session();
//!     discovery.submit(Request::new(session.id(), root_domain)).await?;
//!     session.wait_idle().await;
//!
//!     discovery.shutdown(discovery.config().shutdown_grace()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Layers
//!
//! - `scout-core`: assets, events, handlers, requests and errors
//! - `scout-std`: intake engine, dispatcher, registry, pipelines, sessions
//! - `scout`: configuration, logging setup and the [`Discovery`] assembly

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

pub mod config;
mod discovery;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use discovery::Discovery;
pub use telemetry::{LogFormat, init_logging};

pub use scout_core::{
    Action, Asset, AssetKey, AssetType, BoxError, DispatchError, DispatcherHandle, Edge, Event,
    EventError, EventHandler, EventId, EventState, EventType, Handler, HandlerError,
    HandlerRegistrar, IntakeError, Origin, Payload, Plugin, PluginError, RegistryError, Repeat,
    RepeatCount, Request, Response, Responses, ScoutError, SessionId,
};

pub use scout_std::{
    DispatchHandler, Dispatcher, Pipeline, Registry, RegistryConfig,
    handlers::{Timeout, Traced},
    intake::{Engine, EngineConfig, Flow, IntakeContext, IntakeHandler, Submitter},
    plugin::PluginSet,
    session::{Session, SessionConfig, SessionManager, Stats},
    store::{AssetStore, StoreHandler, StoredAsset},
};

/// Testing utilities.
pub mod testing {
    #![allow(clippy::wildcard_imports)]
    pub use scout_std::testing::*;
}

/// Prelude module - common imports for Scout.
///
/// # Usage
///
/// ```rust,ignore
/// use scout::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Assets
        Asset,
        AssetType,
        // Errors
        BoxError,
        // Assembly
        Config,
        Discovery,
        // Events
        Event,
        EventHandler,
        Handler,
        HandlerRegistrar,
        // Intake
        Flow,
        IntakeContext,
        IntakeHandler,
        Plugin,
        Request,
        Response,
        ScoutError,
        Session,
        init_logging,
    };
}

#[cfg(feature = "inventory")]
pub use scout_std::{inventory, plugin::PluginRegistration};
