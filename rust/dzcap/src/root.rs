//! Root capability resolution.
//!
//! A root capability is never signed; a verifier learns who controls a target
//! from a [`RootZcapResolver`]. Resolvers are plain values handed to the
//! verifier, so each resource server decides which roots it trusts.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use url::Url;

use crate::{
    capability::{RootCapability, dereference_root_capability_id, is_root_capability_id},
    document::{DocumentResolver, RemoteDocument},
    error::DocumentError,
    sync::{ConditionalSend, ConditionalSync},
};

/// Maps a root capability id to its controller and target.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait RootZcapResolver: ConditionalSend + ConditionalSync {
    /// Resolve the root capability `id`.
    async fn resolve_root_zcap(&self, id: &str) -> Result<RootCapability, DocumentError>;
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<T: RootZcapResolver + ?Sized> RootZcapResolver for Arc<T> {
    async fn resolve_root_zcap(&self, id: &str) -> Result<RootCapability, DocumentError> {
        (**self).resolve_root_zcap(id).await
    }
}

/// Implicit roots: every target under one origin is controlled by its owner.
#[derive(Debug, Clone)]
pub struct OwnerRootResolver {
    origin: Url,
    owner: String,
}

impl OwnerRootResolver {
    /// Roots for targets under `origin`, all controlled by `owner`.
    pub fn new(origin: Url, owner: impl Into<String>) -> Self {
        Self {
            origin,
            owner: owner.into(),
        }
    }

    fn covers(&self, target: &str) -> bool {
        Url::parse(target).is_ok_and(|target| target.origin() == self.origin.origin())
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl RootZcapResolver for OwnerRootResolver {
    async fn resolve_root_zcap(&self, id: &str) -> Result<RootCapability, DocumentError> {
        let target = dereference_root_capability_id(id).map_err(|e| DocumentError::Malformed {
            uri: id.to_string(),
            reason: e.to_string(),
        })?;
        if !self.covers(&target) {
            tracing::debug!(id, origin = %self.origin, "root target outside owned origin");
            return Err(DocumentError::not_found(id));
        }
        Ok(RootCapability::new(target, self.owner.clone()))
    }
}

/// Explicitly registered roots.
#[derive(Debug, Clone, Default)]
pub struct StaticRootResolver {
    roots: HashMap<String, RootCapability>,
}

impl StaticRootResolver {
    /// No roots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `root` under its derived id.
    pub fn insert(&mut self, root: RootCapability) {
        self.roots.insert(root.id(), root);
    }

    /// Builder form of [`StaticRootResolver::insert`].
    #[must_use]
    pub fn with(mut self, root: RootCapability) -> Self {
        self.insert(root);
        self
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl RootZcapResolver for StaticRootResolver {
    async fn resolve_root_zcap(&self, id: &str) -> Result<RootCapability, DocumentError> {
        self.roots
            .get(id)
            .cloned()
            .ok_or_else(|| DocumentError::not_found(id))
    }
}

/// Serves root capability documents at `urn:zcap:root:*` from a
/// [`RootZcapResolver`], so they can be loaded like any other document.
#[derive(Debug, Clone)]
pub struct RootZcapDocumentResolver<R>(pub R);

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<R: RootZcapResolver> DocumentResolver for RootZcapDocumentResolver<R> {
    fn handles(&self, uri: &str) -> bool {
        is_root_capability_id(uri)
    }

    async fn resolve(&self, uri: &str) -> Result<RemoteDocument, DocumentError> {
        let root = self.0.resolve_root_zcap(uri).await?;
        let document =
            serde_json::to_value(root.to_capability()).map_err(|e| DocumentError::Malformed {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;
        Ok(RemoteDocument::new(document, uri))
    }
}
