//! Request intake: the bounded-concurrency engine and its middleware.

mod engine;
mod handler;

pub use engine::{
    DEFAULT_BUFFER_SIZE, DEFAULT_CONCURRENCY, DEFAULT_DRAIN_POLL, Engine, EngineConfig, Submitter,
};
pub use handler::{Chain, DynIntakeHandler, Flow, IntakeContext, IntakeHandler};
