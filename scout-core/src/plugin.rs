//! The contract third-party discovery code implements.

use crate::{error::BoxError, handler::HandlerRegistrar};

/// A bundle of handlers with a lifecycle.
///
/// `start` is called once, with the registrar the plugin's handlers go into.
/// `stop` is called on shutdown, in reverse start order.
///
/// # Example
///
/// ```rust,ignore
/// struct Dns;
///
/// impl Plugin for Dns {
///     fn name(&self) -> &str { "dns" }
///
///     fn start(&self, registrar: &dyn HandlerRegistrar) -> Result<(), BoxError> {
///         registrar.register_handler(
///             Handler::new("dns-a", AssetType::Fqdn, resolve_a).with_plugin("dns"),
///         )?;
///         Ok(())
///     }
/// }
/// ```
pub trait Plugin: Send + Sync + 'static {
    /// Unique plugin name.
    fn name(&self) -> &str;

    /// Register handlers and acquire resources.
    fn start(&self, registrar: &dyn HandlerRegistrar) -> Result<(), BoxError>;

    /// Release resources.
    fn stop(&self) {}
}
