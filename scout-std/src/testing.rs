//! Testing utilities for Scout.
//!
//! This module provides doubles for the pieces that normally live outside the
//! orchestrator: assets, handlers with observable behaviour, and a store.
//!
//! # Features
//!
//! - [`TestAsset`]: A minimal asset with a type and a key
//! - [`RecordingHandler`]: An event handler that records every event it receives
//! - [`CountingHandler`]: An event handler that counts invocations
//! - [`FailingHandler`]: An event handler that always fails
//! - [`ConcurrencyProbe`]: Intake middleware measuring how many requests overlap
//! - [`MemoryStore`]: An in-memory [`AssetStore`] with failure injection

use crate::{
    intake::{Flow, IntakeContext, IntakeHandler},
    store::{AssetStore, StoredAsset},
};
use scout_core::{Asset, AssetKey, AssetType, BoxError, Event, EventHandler};
use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

// ============================================================================
// Test Asset
// ============================================================================

/// An asset that is nothing but its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestAsset {
    asset_type: AssetType,
    key: String,
}

impl TestAsset {
    /// Create a new test asset.
    pub fn new(asset_type: AssetType, key: impl Into<String>) -> Self {
        Self {
            asset_type,
            key: key.into(),
        }
    }

    /// A shared asset of any type.
    pub fn shared(asset_type: AssetType, key: impl Into<String>) -> Arc<dyn Asset> {
        Arc::new(Self::new(asset_type, key))
    }

    /// A shared FQDN.
    pub fn fqdn(name: impl Into<String>) -> Arc<dyn Asset> {
        Self::shared(AssetType::Fqdn, name)
    }

    /// A shared IP address.
    pub fn ip(addr: impl Into<String>) -> Arc<dyn Asset> {
        Self::shared(AssetType::IpAddress, addr)
    }
}

impl Asset for TestAsset {
    fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    fn key(&self) -> String {
        self.key.clone()
    }
}

// ============================================================================
// Recording Handler
// ============================================================================

/// An event handler that records all events it receives.
///
/// # Example
///
/// ```rust,ignore
/// let recorder = RecordingHandler::new();
/// registry.register_handler(Handler::new("r", AssetType::Fqdn, recorder.clone()))?;
///
/// // Dispatch...
///
/// assert_eq!(recorder.keys(), ["example.com"]);
/// ```
#[derive(Clone, Default)]
pub struct RecordingHandler {
    events: Arc<Mutex<Vec<Event>>>,
    delay: Option<Duration>,
}

impl RecordingHandler {
    /// Create a recorder that returns immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a recorder that sleeps before returning.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Get a clone of the recorded events.
    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    /// Asset keys of the recorded events, in arrival order.
    pub fn keys(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|e| e.asset_payload().map(|a| a.key()))
            .collect()
    }

    /// Get the number of recorded events.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Clear all recorded events.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) -> Result<(), BoxError> {
        self.lock().push(event.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

// ============================================================================
// Counting Handler
// ============================================================================

/// An event handler that counts invocations.
#[derive(Clone, Default)]
pub struct CountingHandler {
    count: Arc<AtomicUsize>,
}

impl CountingHandler {
    /// Create a new counting handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current count.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Reset the counter.
    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }
}

impl EventHandler for CountingHandler {
    async fn handle(&self, _event: &Event) -> Result<(), BoxError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Failing Handler
// ============================================================================

/// An event handler that always fails with the same message.
#[derive(Clone)]
pub struct FailingHandler {
    message: String,
    calls: Arc<AtomicUsize>,
}

impl FailingHandler {
    /// Create a handler failing with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of invocations.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EventHandler for FailingHandler {
    async fn handle(&self, _event: &Event) -> Result<(), BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.message.clone().into())
    }
}

// ============================================================================
// Concurrency Probe
// ============================================================================

/// Intake middleware that holds each request for a while and records the
/// highest number of requests it saw at once.
///
/// A cancelled context ends the hold early.
#[derive(Clone)]
pub struct ConcurrencyProbe {
    hold: Duration,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    handled: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    /// Create a probe holding each request for `hold`.
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            current: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            handled: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Highest overlap observed.
    pub fn high_water_mark(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Requests currently held.
    pub fn in_flight(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Requests that ran to the end of their hold.
    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }
}

impl IntakeHandler for ConcurrencyProbe {
    async fn handle(&self, ctx: &IntakeContext) -> Result<Flow, BoxError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let finished = tokio::select! {
            _ = ctx.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.hold) => true,
        };

        self.current.fetch_sub(1, Ordering::SeqCst);
        if finished {
            self.handled.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Flow::Next)
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// A single relation recorded by [`MemoryStore`].
pub type StoredLink = (StoredAsset, String, StoredAsset);

#[derive(Default)]
struct StoreState {
    assets: Vec<StoredAsset>,
    links: Vec<StoredLink>,
    fail_on: HashSet<AssetKey>,
}

/// An in-memory [`AssetStore`].
///
/// Assets registered with [`fail_on`](Self::fail_on) make every operation
/// touching them fail.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation on `key`.
    pub fn fail_on(&self, key: AssetKey) {
        self.lock().fail_on.insert(key);
    }

    /// Number of stored assets.
    pub fn asset_count(&self) -> usize {
        self.lock().assets.len()
    }

    /// Recorded relations, in insertion order.
    pub fn links(&self) -> Vec<StoredLink> {
        self.lock().links.clone()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(state: &StoreState, key: &AssetKey) -> Result<(), BoxError> {
        if state.fail_on.contains(key) {
            return Err(format!("store rejected {key}").into());
        }
        Ok(())
    }
}

impl AssetStore for MemoryStore {
    async fn find_by_content(&self, asset: &dyn Asset) -> Result<Vec<StoredAsset>, BoxError> {
        let key = asset.asset_key();
        let state = self.lock();
        Self::check(&state, &key)?;
        Ok(state.assets.iter().filter(|a| a.key == key).cloned().collect())
    }

    async fn create_asset(&self, asset: &dyn Asset) -> Result<StoredAsset, BoxError> {
        let key = asset.asset_key();
        let mut state = self.lock();
        Self::check(&state, &key)?;
        let stored = StoredAsset {
            id: format!("asset-{}", state.assets.len() + 1),
            key,
        };
        state.assets.push(stored.clone());
        Ok(stored)
    }

    async fn link(
        &self,
        from: &StoredAsset,
        relation: &str,
        to: &StoredAsset,
    ) -> Result<(), BoxError> {
        let mut state = self.lock();
        Self::check(&state, &from.key)?;
        Self::check(&state, &to.key)?;
        state
            .links
            .push((from.clone(), relation.to_string(), to.clone()));
        Ok(())
    }
}
