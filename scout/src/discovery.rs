//! Assembly of the orchestrator.
//!
//! [`Discovery`] owns one of each component and wires them together. Nothing
//! is global: two `Discovery` values in one process share no state.

use crate::config::Config;
use scout_core::{
    BoxError, DispatchError, Event, Handler, IntakeError, Plugin, PluginError, RegistryError,
    Request, ScoutError, SessionId,
};
use scout_std::{
    Dispatcher, Registry,
    intake::{Engine, IntakeContext, IntakeHandler, Submitter},
    plugin::PluginSet,
    session::{Session, SessionConfig, SessionManager},
    store::{AssetStore, StoreHandler},
};
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// A running orchestrator: sessions, registry, dispatcher and intake engine.
///
/// # Example
///
/// ```rust,ignore
/// let discovery = Discovery::new(Config::default());
/// discovery.load_plugins([Arc::new(DnsPlugin::default()) as Arc<dyn Plugin>]);
/// discovery.start()?;
///
/// let session = discovery.create_session();
/// discovery.submit(Request::new(session.id(), root)).await?;
/// session.wait_idle().await;
///
/// discovery.shutdown(discovery.config().shutdown_grace()).await?;
/// ```
pub struct Discovery {
    config: Config,
    sessions: Arc<SessionManager>,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    engine: Engine,
    plugins: Mutex<PluginSet>,
}

impl Discovery {
    /// Build every component from `config`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: Config) -> Self {
        let sessions = Arc::new(SessionManager::new());
        let registry = Arc::new(Registry::with_config(
            config.registry_config(),
            config.asset_types(),
        ));
        let dispatcher = Dispatcher::new(registry.clone(), sessions.clone());
        let engine = Engine::new(config.engine_config());

        Self {
            config,
            sessions,
            registry,
            dispatcher,
            engine,
            plugins: Mutex::new(PluginSet::new()),
        }
    }

    /// The configuration this instance was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Live sessions.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Registered handlers and pipelines.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The event dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The intake engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    // ------------------------------------------------------------------------
    // Handlers and plugins
    // ------------------------------------------------------------------------

    /// Register a handler. Call [`build_pipelines`](Self::build_pipelines)
    /// (or [`start`](Self::start)) for it to take effect.
    pub fn register_handler(&self, handler: Handler) -> Result<(), RegistryError> {
        self.registry.register_handler(handler)
    }

    /// Rebuild the pipelines of every type whose handlers changed.
    pub fn build_pipelines(&self) -> usize {
        self.registry.build_pipelines()
    }

    /// Start plugins and rebuild pipelines. Plugins that fail to start are
    /// logged, left out and returned.
    pub fn load_plugins(
        &self,
        plugins: impl IntoIterator<Item = Arc<dyn Plugin>>,
    ) -> Vec<PluginError> {
        let failures = self.lock_plugins().start_all(self.registry.as_ref(), plugins);
        let built = self.build_pipelines();
        tracing::info!(
            plugins = self.lock_plugins().len(),
            failed = failures.len(),
            pipelines = built,
            "plugins loaded"
        );
        failures
    }

    /// Start every plugin submitted through `inventory`.
    #[cfg(feature = "inventory")]
    pub fn load_collected_plugins(&self) -> Vec<PluginError> {
        self.load_plugins(PluginSet::collected())
    }

    /// Names of the running plugins.
    pub fn plugin_names(&self) -> Vec<String> {
        self.lock_plugins()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    /// Create a session with the configured defaults.
    pub fn create_session(&self) -> Arc<Session> {
        self.sessions.add(self.config.session_config())
    }

    /// Create a session with explicit settings.
    pub fn create_session_with(&self, config: SessionConfig) -> Arc<Session> {
        self.sessions.add(config)
    }

    /// Tear a session down, dropping events still waiting on dependencies.
    pub fn cancel_session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.dispatcher.cancel_session(id)
    }

    // ------------------------------------------------------------------------
    // Intake
    // ------------------------------------------------------------------------

    /// Build pending pipelines and start intake. Each request becomes an
    /// asset event.
    pub fn start(&self) -> Result<(), IntakeError> {
        self.start_with(|_ctx: IntakeContext| async { Ok::<(), BoxError>(()) })
    }

    /// Like [`start`](Self::start), running `handler` after each request is
    /// dispatched.
    pub fn start_with(&self, handler: impl IntakeHandler) -> Result<(), IntakeError> {
        self.build_pipelines();
        self.engine
            .start(self.dispatcher.dispatch_handler().and_then(handler))
    }

    /// Like [`start_with`](Self::start_with), then recording every response
    /// in `store`.
    pub fn start_with_store<S: AssetStore>(
        &self,
        handler: impl IntakeHandler,
        store: Arc<S>,
    ) -> Result<(), IntakeError> {
        self.build_pipelines();
        self.engine.start(
            self.dispatcher
                .dispatch_handler()
                .and_then(handler)
                .and_then(StoreHandler::new(store)),
        )
    }

    /// Queue a request, waiting for buffer space.
    pub async fn submit(&self, request: Request) -> Result<(), IntakeError> {
        self.engine.submit(request).await
    }

    /// A clonable handle for submitting from other tasks.
    pub fn submitter(&self) -> Submitter {
        self.engine.submitter()
    }

    /// Dispatch an event directly, bypassing intake.
    pub fn dispatch_event(&self, event: Event) -> Result<(), DispatchError> {
        self.dispatcher.dispatch_event(event)
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Stop intake (waiting up to `grace`), then the dispatcher, sessions and
    /// plugins.
    ///
    /// Every step runs even if the intake drain timed out; that timeout is
    /// the error returned.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), ScoutError> {
        let drained = self.engine.stop(grace).await;
        self.dispatcher.shutdown().await;
        self.sessions.shutdown();
        self.lock_plugins().stop_all();
        tracing::info!(drained = drained.is_ok(), "discovery shut down");
        drained.map_err(ScoutError::from)
    }

    fn lock_plugins(&self) -> MutexGuard<'_, PluginSet> {
        self.plugins.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("sessions", &self.sessions.len())
            .field("registry", &self.registry)
            .field("engine", &self.engine)
            .field("plugins", &self.plugin_names())
            .finish()
    }
}
