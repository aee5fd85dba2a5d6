//! Plugin lifecycle.
//!
//! Plugins are linked statically. A [`PluginSet`] starts each one against a
//! [`HandlerRegistrar`], skipping (and reporting) any that fail, and stops the
//! started ones in reverse order.
//!
//! With the `inventory` feature, plugins can be submitted from anywhere in the
//! binary and gathered with [`PluginSet::collected`]:
//!
//! ```rust,ignore
//! inventory::submit! {
//!     PluginRegistration::new("dns", || Arc::new(DnsPlugin::default()))
//! }
//! ```

use scout_core::{HandlerRegistrar, Plugin, PluginError};
use std::{collections::HashSet, sync::Arc};

/// Started plugins, in start order.
#[derive(Default)]
pub struct PluginSet {
    started: Vec<Arc<dyn Plugin>>,
}

impl PluginSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start each plugin once. Failures are logged and returned; the plugin is
    /// then left out of the set.
    pub fn start_all(
        &mut self,
        registrar: &dyn HandlerRegistrar,
        plugins: impl IntoIterator<Item = Arc<dyn Plugin>>,
    ) -> Vec<PluginError> {
        let mut seen: HashSet<String> = self.names().into_iter().map(str::to_string).collect();
        let mut failures = Vec::new();

        for plugin in plugins {
            let name = plugin.name().to_string();
            if !seen.insert(name.clone()) {
                tracing::warn!(plugin = %name, "plugin already started, skipping");
                continue;
            }
            match plugin.start(registrar) {
                Ok(()) => {
                    tracing::info!(plugin = %name, "plugin started");
                    self.started.push(plugin);
                }
                Err(source) => {
                    tracing::error!(plugin = %name, error = %source, "plugin failed to start");
                    failures.push(PluginError { name, source });
                }
            }
        }
        failures
    }

    /// Stop every started plugin, most recent first.
    pub fn stop_all(&mut self) {
        while let Some(plugin) = self.started.pop() {
            plugin.stop();
            tracing::debug!(plugin = %plugin.name(), "plugin stopped");
        }
    }

    /// Names of started plugins, in start order.
    pub fn names(&self) -> Vec<&str> {
        self.started.iter().map(|p| p.name()).collect()
    }

    /// Number of started plugins.
    pub fn len(&self) -> usize {
        self.started.len()
    }

    /// Whether no plugin is running.
    pub fn is_empty(&self) -> bool {
        self.started.is_empty()
    }
}

impl std::fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSet")
            .field("started", &self.names())
            .finish()
    }
}

// ============================================================================
// Collected plugins
// ============================================================================

/// A plugin submitted through `inventory`.
#[cfg(feature = "inventory")]
pub struct PluginRegistration {
    /// Plugin name, for logs.
    pub name: &'static str,
    /// Builds the plugin instance.
    pub factory: fn() -> Arc<dyn Plugin>,
}

#[cfg(feature = "inventory")]
impl PluginRegistration {
    /// Create a registration entry.
    pub const fn new(name: &'static str, factory: fn() -> Arc<dyn Plugin>) -> Self {
        Self { name, factory }
    }
}

#[cfg(feature = "inventory")]
inventory::collect!(PluginRegistration);

#[cfg(feature = "inventory")]
impl PluginSet {
    /// Instantiate every plugin submitted through `inventory`, sorted by name.
    pub fn collected() -> Vec<Arc<dyn Plugin>> {
        let mut entries: Vec<&PluginRegistration> =
            inventory::iter::<PluginRegistration>.into_iter().collect();
        entries.sort_by_key(|e| e.name);
        entries.into_iter().map(|e| (e.factory)()).collect()
    }
}
