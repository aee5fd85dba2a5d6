//! Per-session asset cache: the dedup gate's memory.

use chrono::{DateTime, Utc};
use scout_core::AssetKey;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// What the cache knows about an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    /// When the asset was first scheduled in this session.
    pub first_seen: DateTime<Utc>,
}

/// Outcome of [`Cache::insert_asset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// The asset was new and is now recorded.
    Inserted,
    /// The asset was already recorded; the existing entry is returned.
    AlreadyPresent(CacheEntry),
}

impl Insertion {
    /// Whether this call recorded the asset.
    pub fn is_inserted(&self) -> bool {
        matches!(self, Insertion::Inserted)
    }
}

/// Assets seen in one session.
#[derive(Debug, Default)]
pub struct Cache {
    entries: Mutex<HashMap<AssetKey, CacheEntry>>,
}

impl Cache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an asset.
    pub fn get_asset(&self, key: &AssetKey) -> Option<CacheEntry> {
        self.lock().get(key).copied()
    }

    /// Record the asset unless it is already present. Atomic check-and-set.
    pub fn insert_asset(&self, key: AssetKey) -> Insertion {
        let mut entries = self.lock();
        if let Some(existing) = entries.get(&key) {
            return Insertion::AlreadyPresent(*existing);
        }
        entries.insert(
            key,
            CacheEntry {
                first_seen: Utc::now(),
            },
        );
        Insertion::Inserted
    }

    /// Record the asset, replacing any existing entry.
    pub fn set_asset(&self, key: AssetKey, entry: CacheEntry) {
        self.lock().insert(key, entry);
    }

    /// Number of recorded assets.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AssetKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
