//! Discovery sessions.
//!
//! A [`Session`] scopes one discovery run: it owns the dedup cache, the work
//! counters, the log broadcast and the ledger of settled events that
//! dependency parking consults. The [`SessionManager`] owns every live session.

mod cache;
mod manager;
mod pubsub;

pub use cache::{Cache, CacheEntry, Insertion};
pub use manager::SessionManager;
pub use pubsub::{DEFAULT_LOG_CAPACITY, PubSub};

use chrono::{DateTime, Utc};
use scout_core::{EventId, EventState, SessionId};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;

/// Session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Optional label for logs.
    pub name: Option<String>,
    /// Unread log messages each subscriber may hold.
    pub log_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: None,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

/// Work counters. `work_items_completed <= work_items_total` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Events accepted into a pipeline.
    pub work_items_total: u64,
    /// Events whose processing has finished, successfully or not.
    pub work_items_completed: u64,
}

impl Stats {
    /// Whether every accepted event has finished.
    pub fn is_idle(&self) -> bool {
        self.work_items_completed == self.work_items_total
    }
}

/// One discovery run.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    created_at: DateTime<Utc>,
    cache: Cache,
    log: PubSub,
    stats: Mutex<Stats>,
    settled: Mutex<HashMap<EventId, EventState>>,
    idle: Notify,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session with a fresh id.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            id: SessionId::new(),
            log: PubSub::new(config.log_capacity),
            config,
            created_at: Utc::now(),
            cache: Cache::new(),
            stats: Mutex::new(Stats::default()),
            settled: Mutex::new(HashMap::new()),
            idle: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The dedup cache.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// The log broadcast.
    pub fn log(&self) -> &PubSub {
        &self.log
    }

    /// Publish a log line.
    pub fn publish(&self, message: impl Into<String>) -> usize {
        self.log.publish(message)
    }

    /// Subscribe to the log.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.log.subscribe()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> Stats {
        *self.lock_stats()
    }

    /// Count one more accepted event.
    pub fn add_work(&self) {
        self.lock_stats().work_items_total += 1;
    }

    /// Count one finished event.
    pub fn complete_work(&self) {
        let idle = {
            let mut stats = self.lock_stats();
            if stats.work_items_completed < stats.work_items_total {
                stats.work_items_completed += 1;
            } else {
                tracing::warn!(session = %self.id, "completion without matching work item");
            }
            stats.is_idle()
        };
        if idle {
            self.idle.notify_waiters();
        }
    }

    /// Wait until every accepted event has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.stats().is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Record an event's final state. Ignored once the session is torn down.
    pub fn settle(&self, event: EventId, state: EventState) {
        if self.is_cancelled() {
            return;
        }
        self.lock_settled().insert(event, state);
    }

    /// The final state of an event, if it has settled in this session.
    pub fn settled_state(&self, event: &EventId) -> Option<EventState> {
        self.lock_settled().get(event).copied()
    }

    /// Whether an event has settled in this session.
    pub fn is_settled(&self, event: &EventId) -> bool {
        self.lock_settled().contains_key(event)
    }

    /// Token cancelled when the session is torn down.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Tear the session down and forget its settled events.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.lock_settled().clear();
    }

    /// Whether the session has been torn down.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn lock_stats(&self) -> MutexGuard<'_, Stats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_settled(&self) -> MutexGuard<'_, HashMap<EventId, EventState>> {
        self.settled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
