//! Persistence contract and the middleware that records discoveries.
//!
//! The storage layer lives outside this crate. [`StoreHandler`] only needs to
//! find or create assets and link them; every failure is logged and the rest
//! of the batch continues.

use crate::intake::{Flow, IntakeContext, IntakeHandler};
use scout_core::{Asset, AssetKey, BoxError, Edge};
use std::{future::Future, sync::Arc};

/// An asset as the store knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    /// Store-assigned identifier.
    pub id: String,
    /// Identity of the stored content.
    pub key: AssetKey,
}

/// Asset persistence.
pub trait AssetStore: Send + Sync + 'static {
    /// Stored assets whose content matches `asset`.
    fn find_by_content(
        &self,
        asset: &dyn Asset,
    ) -> impl Future<Output = Result<Vec<StoredAsset>, BoxError>> + Send;

    /// Persist `asset`.
    fn create_asset(
        &self,
        asset: &dyn Asset,
    ) -> impl Future<Output = Result<StoredAsset, BoxError>> + Send;

    /// Record `from --relation--> to`.
    fn link(
        &self,
        from: &StoredAsset,
        relation: &str,
        to: &StoredAsset,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;
}

/// Intake middleware writing every response's relation to an [`AssetStore`].
pub struct StoreHandler<S> {
    store: Arc<S>,
}

impl<S: AssetStore> StoreHandler<S> {
    /// Wrap a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The wrapped store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Find the asset, creating it if the store has no match.
    async fn resolve(&self, asset: &dyn Asset) -> Result<StoredAsset, BoxError> {
        let found = self.store.find_by_content(asset).await?;
        match found.into_iter().next() {
            Some(existing) => Ok(existing),
            None => self.store.create_asset(asset).await,
        }
    }

    async fn persist(&self, edge: &Edge) -> Result<(), BoxError> {
        let source = self.resolve(edge.source.as_ref()).await?;
        let discovered = self.resolve(edge.discovered.as_ref()).await?;
        self.store.link(&source, &edge.relation, &discovered).await
    }
}

impl<S: AssetStore> IntakeHandler for StoreHandler<S> {
    async fn handle(&self, ctx: &IntakeContext) -> Result<Flow, BoxError> {
        for edge in ctx.responses.edges() {
            if let Err(err) = self.persist(&edge).await {
                tracing::warn!(
                    session = %ctx.request.session_id,
                    source = %edge.source.asset_key(),
                    relation = %edge.relation,
                    discovered = %edge.discovered.asset_key(),
                    error = %err,
                    "failed to persist discovery"
                );
            }
        }
        Ok(Flow::Next)
    }
}
