//! Handler registry and pipeline builder.
//!
//! Handlers are indexed by asset type, then by transform. Buckets keep the
//! order in which their transform was first registered and handlers within a
//! bucket keep registration order, so lookups are deterministic.
//!
//! Pipelines are built on demand by [`Registry::build_pipelines`]; only asset
//! types whose handlers changed since the last build get a new pipeline.

use crate::pipeline::Pipeline;
use scout_core::{AssetType, Handler, HandlerRegistrar, RegistryError};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

/// Default per-pipeline concurrency.
pub const DEFAULT_PIPELINE_CONCURRENCY: usize = 8;

/// Registry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Elements each pipeline processes at once, before `max_instances` caps.
    pub pipeline_concurrency: usize,
    /// Time budget for a single handler invocation.
    pub handler_timeout: Option<Duration>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            pipeline_concurrency: DEFAULT_PIPELINE_CONCURRENCY,
            handler_timeout: None,
        }
    }
}

#[derive(Clone)]
struct Registered {
    seq: u64,
    handler: Arc<Handler>,
}

struct TransformBucket {
    transform: String,
    handlers: Vec<Registered>,
}

#[derive(Default)]
struct TypeEntry {
    buckets: Vec<TransformBucket>,
    dirty: bool,
}

impl TypeEntry {
    fn bucket(&self, transform: &str) -> Option<&TransformBucket> {
        self.buckets.iter().find(|b| b.transform == transform)
    }

    fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.handlers.is_empty())
    }

    /// Every handler name once, in (priority, registration) order.
    ///
    /// A name registered in several calls keeps its first registration's
    /// callback and settings and claims the union of their transforms.
    fn chain(&self) -> Vec<Registered> {
        let mut all: Vec<&Registered> = self.buckets.iter().flat_map(|b| &b.handlers).collect();
        all.sort_by_key(|r| r.seq);

        let mut chain: Vec<Registered> = Vec::new();
        for r in all {
            match chain.iter_mut().find(|c| c.handler.name == r.handler.name) {
                None => chain.push(r.clone()),
                Some(kept) if kept.seq != r.seq => {
                    let extra: Vec<String> = r
                        .handler
                        .claimed_transforms()
                        .into_iter()
                        .filter(|t| !kept.handler.claimed_transforms().contains(t))
                        .map(str::to_string)
                        .collect();
                    if !extra.is_empty() {
                        let mut merged = Handler::clone(&kept.handler);
                        if merged.transforms.is_empty() {
                            merged.transforms.push(merged.name.clone());
                        }
                        merged.transforms.extend(extra);
                        kept.handler = Arc::new(merged);
                    }
                }
                Some(_) => {}
            }
        }
        chain.sort_by_key(|r| (r.handler.priority, r.seq));
        chain
    }
}

#[derive(Default)]
struct Inner {
    types: BTreeMap<AssetType, TypeEntry>,
    pipelines: HashMap<AssetType, Arc<Pipeline>>,
    next_seq: u64,
}

/// Maps asset types to handler chains and exposes per-type pipelines.
pub struct Registry {
    config: RegistryConfig,
    inner: RwLock<Inner>,
}

impl Registry {
    /// A registry that knows every asset type.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default(), AssetType::ALL)
    }

    /// A registry that only accepts the given asset types.
    pub fn with_types(types: impl IntoIterator<Item = AssetType>) -> Self {
        Self::with_config(RegistryConfig::default(), types)
    }

    /// A registry with explicit settings and known types.
    pub fn with_config(
        config: RegistryConfig,
        types: impl IntoIterator<Item = AssetType>,
    ) -> Self {
        let types = types
            .into_iter()
            .map(|t| (t, TypeEntry::default()))
            .collect();
        Self {
            config,
            inner: RwLock::new(Inner {
                types,
                ..Inner::default()
            }),
        }
    }

    /// Settings.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Asset types this registry accepts.
    pub fn asset_types(&self) -> Vec<AssetType> {
        self.read().types.keys().copied().collect()
    }

    /// Register a handler under each transform it claims.
    ///
    /// Nothing is inserted unless every transform is free of a same-named
    /// handler.
    pub fn register_handler(&self, handler: Handler) -> Result<(), RegistryError> {
        let mut inner = self.write();
        let seq = inner.next_seq;
        let entry = inner
            .types
            .get_mut(&handler.asset_type)
            .ok_or(RegistryError::InvalidType(handler.asset_type))?;

        let claimed: Vec<String> = handler
            .claimed_transforms()
            .into_iter()
            .map(str::to_string)
            .collect();
        for transform in &claimed {
            let taken = entry.bucket(transform).is_some_and(|b| {
                b.handlers.iter().any(|r| r.handler.name == handler.name)
            });
            if taken {
                return Err(RegistryError::DuplicateHandler {
                    asset_type: handler.asset_type,
                    name: handler.name.clone(),
                    transform: transform.clone(),
                });
            }
        }

        tracing::debug!(
            handler = %handler.name,
            asset_type = %handler.asset_type,
            transforms = ?claimed,
            priority = handler.priority,
            "handler registered"
        );
        let registered = Registered {
            seq,
            handler: Arc::new(handler),
        };
        for transform in claimed {
            match entry.buckets.iter_mut().find(|b| b.transform == transform) {
                Some(bucket) => bucket.handlers.push(registered.clone()),
                None => entry.buckets.push(TransformBucket {
                    transform,
                    handlers: vec![registered.clone()],
                }),
            }
        }
        entry.dirty = true;
        inner.next_seq += 1;
        Ok(())
    }

    /// Handlers for `asset_type` claiming any of `transforms` (all handlers
    /// when `transforms` is empty), deduplicated by name.
    pub fn get_handlers<S: AsRef<str>>(
        &self,
        asset_type: AssetType,
        transforms: &[S],
    ) -> Result<Vec<Arc<Handler>>, RegistryError> {
        let inner = self.read();
        let entry = inner
            .types
            .get(&asset_type)
            .ok_or(RegistryError::InvalidType(asset_type))?;

        let mut found: Vec<Arc<Handler>> = Vec::new();
        let wanted = |bucket: &TransformBucket| {
            transforms.is_empty() || transforms.iter().any(|t| t.as_ref() == bucket.transform)
        };
        for bucket in entry.buckets.iter().filter(|b| wanted(b)) {
            for r in &bucket.handlers {
                if !found.iter().any(|h| h.name == r.handler.name) {
                    found.push(r.handler.clone());
                }
            }
        }

        if found.is_empty() {
            return Err(RegistryError::NoHandlers(asset_type));
        }
        Ok(found)
    }

    /// Build pipelines for every asset type whose handlers changed or that has
    /// none yet. Replaced pipelines are retired. Returns how many were built.
    pub fn build_pipelines(&self) -> usize {
        let mut inner = self.write();
        let Inner {
            types, pipelines, ..
        } = &mut *inner;

        let mut built = 0;
        for (asset_type, entry) in types.iter_mut() {
            if entry.is_empty() || (!entry.dirty && pipelines.contains_key(asset_type)) {
                continue;
            }
            let stages: Vec<Arc<Handler>> =
                entry.chain().into_iter().map(|r| r.handler).collect();
            let concurrency = stages
                .iter()
                .filter_map(|h| h.max_instances)
                .map(|n| n.get())
                .fold(self.config.pipeline_concurrency, usize::min);

            let pipeline = Arc::new(Pipeline::new(
                *asset_type,
                stages,
                concurrency,
                self.config.handler_timeout,
            ));
            tracing::debug!(
                asset_type = %asset_type,
                stages = ?pipeline.stage_names(),
                concurrency = pipeline.concurrency(),
                "pipeline built"
            );
            if let Some(old) = pipelines.insert(*asset_type, pipeline) {
                old.retire();
            }
            entry.dirty = false;
            built += 1;
        }
        built
    }

    /// The current pipeline for `asset_type`.
    pub fn get_pipeline(&self, asset_type: AssetType) -> Result<Arc<Pipeline>, RegistryError> {
        let inner = self.read();
        if !inner.types.contains_key(&asset_type) {
            return Err(RegistryError::InvalidType(asset_type));
        }
        inner
            .pipelines
            .get(&asset_type)
            .cloned()
            .ok_or(RegistryError::NoPipeline(asset_type))
    }

    /// Every built pipeline.
    pub fn pipelines(&self) -> Vec<Arc<Pipeline>> {
        self.read().pipelines.values().cloned().collect()
    }

    /// Retire and forget every pipeline.
    pub fn shutdown(&self) {
        let retired: Vec<_> = self.write().pipelines.drain().collect();
        for (_, pipeline) in &retired {
            pipeline.retire();
        }
        tracing::debug!(count = retired.len(), "pipelines retired");
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistrar for Registry {
    fn register_handler(&self, handler: Handler) -> Result<(), RegistryError> {
        Registry::register_handler(self, handler)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("types", &inner.types.len())
            .field("pipelines", &inner.pipelines.len())
            .finish()
    }
}
