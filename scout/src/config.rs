//! File-based configuration.
//!
//! Every section is optional; missing keys take the library defaults and
//! unknown keys are rejected. Durations are written in milliseconds.
//!
//! ```toml
//! [engine]
//! buffer_size = 256
//! concurrency = 16
//! drain_poll_ms = 10
//! shutdown_grace_ms = 5000
//!
//! [registry]
//! pipeline_concurrency = 8
//! handler_timeout_ms = 30000
//! asset_types = ["FQDN", "IPAddress"]
//!
//! [session]
//! log_capacity = 100
//!
//! [logging]
//! format = "json"
//! ```

use crate::telemetry::LogFormat;
use scout_core::AssetType;
use scout_std::{
    RegistryConfig,
    intake::{DEFAULT_BUFFER_SIZE, DEFAULT_CONCURRENCY, EngineConfig},
    registry::DEFAULT_PIPELINE_CONCURRENCY,
    session::{DEFAULT_LOG_CAPACITY, SessionConfig},
};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

/// Default time `shutdown` waits for in-flight intake work.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Errors from loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {}", path.display())]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The contents are not a valid configuration.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Intake engine.
    pub engine: EngineSection,
    /// Handler registry and pipelines.
    pub registry: RegistrySection,
    /// Defaults for new sessions.
    pub session: SessionSection,
    /// Log output, when the embedding binary asks for it.
    pub logging: LoggingSection,
}

/// `[engine]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    /// Capacity of the request channel.
    pub buffer_size: usize,
    /// Intake handlers running at once.
    pub concurrency: usize,
    /// How often shutdown polls for outstanding work.
    pub drain_poll_ms: u64,
    /// How long shutdown waits before cancelling intake work.
    pub shutdown_grace_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            drain_poll_ms: 10,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

/// `[registry]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySection {
    /// Elements each pipeline processes at once.
    pub pipeline_concurrency: usize,
    /// Budget for a single handler call. Unbounded when absent.
    pub handler_timeout_ms: Option<u64>,
    /// Routable asset types. Empty means every type.
    pub asset_types: Vec<AssetType>,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            pipeline_concurrency: DEFAULT_PIPELINE_CONCURRENCY,
            handler_timeout_ms: None,
            asset_types: Vec::new(),
        }
    }
}

/// `[session]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    /// Unread log messages each subscriber may hold.
    pub log_capacity: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    /// Output format.
    pub format: LogFormat,
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Intake engine settings. Zero sizes are raised to one by the engine.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            buffer_size: self.engine.buffer_size,
            concurrency: self.engine.concurrency,
            drain_poll: Duration::from_millis(self.engine.drain_poll_ms),
        }
    }

    /// Registry settings.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            pipeline_concurrency: self.registry.pipeline_concurrency.max(1),
            handler_timeout: self.registry.handler_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Routable asset types, every type when none are listed.
    pub fn asset_types(&self) -> Vec<AssetType> {
        if self.registry.asset_types.is_empty() {
            AssetType::ALL.to_vec()
        } else {
            self.registry.asset_types.clone()
        }
    }

    /// Settings for a new session.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            name: None,
            log_capacity: self.session.log_capacity.max(1),
        }
    }

    /// Default shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.engine.shutdown_grace_ms)
    }
}
