//! Event handlers and the registry entries that carry them.
//!
//! An [`EventHandler`] is the terminal point of a pipeline stage: it receives
//! an [`Event`] and performs whatever discovery work a plugin implements. A
//! [`Handler`] wraps a callback with the metadata the registry indexes it by.
//!
//! # Usage Patterns
//!
//! 1. **Direct closure**: `|event: Event| async move { ... }`
//! 2. **Struct implementation**: `impl EventHandler for MyResolver`

use crate::{
    asset::AssetType,
    error::{BoxError, RegistryError},
    event::Event,
};
use std::{fmt, future::Future, num::NonZeroUsize, pin::Pin, sync::Arc};

/// Processes one event inside a pipeline stage.
///
/// # Static vs Dynamic Dispatch
///
/// This trait uses native `async fn` for zero-cost static dispatch.
/// The registry stores handlers as [`DynEventHandler`] trait objects.
#[diagnostic::on_unimplemented(
    message = "`{Self}` cannot handle scout events",
    label = "missing `EventHandler` implementation",
    note = "Event handlers must implement `handle(&self, &Event)`."
)]
pub trait EventHandler: Send + Sync + 'static {
    /// Process the event. Any error is recorded on the pipeline element.
    fn handle(&self, event: &Event) -> impl Future<Output = Result<(), BoxError>> + Send;
}

/// Dynamic object-safe version of [`EventHandler`].
pub trait DynEventHandler: Send + Sync + 'static {
    /// Process the event (dynamic dispatch version).
    fn handle_dyn<'a>(
        &'a self,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'a>>;
}

impl<T: EventHandler> DynEventHandler for T {
    fn handle_dyn<'a>(
        &'a self,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'a>> {
        Box::pin(self.handle(event))
    }
}

// Closures receive their own copy of the event so the future can be 'static.
impl<F, Fut> EventHandler for F
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    fn handle(&self, event: &Event) -> impl Future<Output = Result<(), BoxError>> + Send {
        (self)(event.clone())
    }
}

/// A handler as registered: callback plus routing metadata.
///
/// # Example
///
/// ```rust,ignore
/// let handler = Handler::new("dns-a", AssetType::Fqdn, |event: Event| async move {
///     resolve(&event).await
/// })
/// .with_transform("IPAddress")
/// .with_priority(3);
///
/// registrar.register_handler(handler)?;
/// ```
#[derive(Clone)]
pub struct Handler {
    /// Unique name within (asset type, transform).
    pub name: String,
    /// Owning plugin, if any.
    pub plugin: Option<String>,
    /// Asset type this handler serves.
    pub asset_type: AssetType,
    /// Transforms this handler claims. Empty means "named after the handler".
    pub transforms: Vec<String>,
    /// Position in the pipeline; lower runs first.
    pub priority: i32,
    /// Upper bound on concurrent invocations.
    pub max_instances: Option<NonZeroUsize>,
    callback: Arc<dyn DynEventHandler>,
}

impl Handler {
    /// Create a handler with no transforms and priority 0.
    pub fn new(
        name: impl Into<String>,
        asset_type: AssetType,
        callback: impl EventHandler,
    ) -> Self {
        Self::from_dyn(name, asset_type, Arc::new(callback))
    }

    /// Create a handler from an already type-erased callback.
    pub fn from_dyn(
        name: impl Into<String>,
        asset_type: AssetType,
        callback: Arc<dyn DynEventHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            plugin: None,
            asset_type,
            transforms: Vec::new(),
            priority: 0,
            max_instances: None,
            callback,
        }
    }

    /// Claim a transform.
    pub fn with_transform(mut self, transform: impl Into<String>) -> Self {
        self.transforms.push(transform.into());
        self
    }

    /// Claim several transforms.
    pub fn with_transforms<I, S>(mut self, transforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.transforms.extend(transforms.into_iter().map(Into::into));
        self
    }

    /// Set the pipeline priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Record the owning plugin.
    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    /// Limit concurrent invocations.
    pub fn with_max_instances(mut self, max: NonZeroUsize) -> Self {
        self.max_instances = Some(max);
        self
    }

    /// The transforms this handler is indexed under, deduplicated, in
    /// declaration order.
    pub fn claimed_transforms(&self) -> Vec<&str> {
        if self.transforms.is_empty() {
            return vec![self.name.as_str()];
        }
        let mut claimed: Vec<&str> = Vec::with_capacity(self.transforms.len());
        for t in &self.transforms {
            if !claimed.contains(&t.as_str()) {
                claimed.push(t);
            }
        }
        claimed
    }

    /// Invoke the callback.
    pub fn callback(&self) -> &Arc<dyn DynEventHandler> {
        &self.callback
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("plugin", &self.plugin)
            .field("asset_type", &self.asset_type)
            .field("transforms", &self.transforms)
            .field("priority", &self.priority)
            .field("max_instances", &self.max_instances)
            .finish_non_exhaustive()
    }
}

/// Something handlers can be registered with. Handed to plugins on start.
pub trait HandlerRegistrar: Send + Sync {
    /// Register one handler.
    fn register_handler(&self, handler: Handler) -> Result<(), RegistryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SessionId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop() -> impl EventHandler {
        |_event: Event| async { Ok::<(), BoxError>(()) }
    }

    #[test]
    fn test_empty_transforms_use_name() {
        let h = Handler::new("whois", AssetType::DomainRecord, noop());
        assert_eq!(h.claimed_transforms(), vec!["whois"]);
    }

    #[test]
    fn test_claimed_transforms_are_deduplicated() {
        let h = Handler::new("dns", AssetType::Fqdn, noop())
            .with_transforms(["IPAddress", "FQDN"])
            .with_transform("IPAddress");
        assert_eq!(h.claimed_transforms(), vec!["IPAddress", "FQDN"]);
    }

    struct Counter(AtomicUsize);

    impl EventHandler for Counter {
        async fn handle(&self, _event: &Event) -> Result<(), BoxError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_struct_and_closure_handlers_run_through_dyn() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let dyn_handler: Arc<dyn DynEventHandler> = counter.clone();
        let h = Handler::from_dyn("count", AssetType::Fqdn, dyn_handler);

        let event = Event::log(SessionId::new(), "hello");
        h.callback().handle_dyn(&event).await.unwrap();
        h.clone().callback().handle_dyn(&event).await.unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);

        let failing = Handler::new("fail", AssetType::Fqdn, |_event: Event| async {
            Err::<(), BoxError>("nope".into())
        });
        let err = failing.callback().handle_dyn(&event).await.unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }
}
