//! Document loading.
//!
//! A [`DocumentLoader`] is a prioritized list of [`DocumentResolver`]s. Each
//! resolver declares which URIs it handles; the loader asks the matching
//! resolvers in order and reports [`DocumentError::DocumentNotFound`] only
//! when none of them produce a document.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::{
    error::DocumentError,
    sync::{ConditionalSend, ConditionalSync},
};

/// A resolved document and the URL it was found at.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    /// The document body.
    pub document: Value,
    /// The URL the document was loaded from, when it differs from the
    /// requested one or is known.
    pub document_url: Option<String>,
}

impl RemoteDocument {
    /// A document found at `url`.
    pub fn new(document: Value, url: impl Into<String>) -> Self {
        Self {
            document,
            document_url: Some(url.into()),
        }
    }
}

/// Resolves URIs of one shape (a DID method, a URN namespace, a registry) to
/// documents.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait DocumentResolver: ConditionalSend + ConditionalSync {
    /// Whether this resolver handles `uri` at all.
    fn handles(&self, uri: &str) -> bool;

    /// Resolve `uri`.
    async fn resolve(&self, uri: &str) -> Result<RemoteDocument, DocumentError>;
}

/// An ordered list of resolvers.
#[derive(Clone, Default)]
pub struct DocumentLoader {
    resolvers: Vec<Arc<dyn DocumentResolver>>,
}

impl fmt::Debug for DocumentLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentLoader")
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}

impl DocumentLoader {
    /// An empty loader; it finds nothing until resolvers are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resolver with lower priority than the ones already added.
    #[must_use]
    pub fn with<R: DocumentResolver + 'static>(mut self, resolver: R) -> Self {
        self.resolvers.push(Arc::new(resolver));
        self
    }

    /// Append an already shared resolver.
    #[must_use]
    pub fn with_shared(mut self, resolver: Arc<dyn DocumentResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// Load `uri` from the first matching resolver that has it.
    ///
    /// A resolver answering [`DocumentError::DocumentNotFound`] passes the
    /// request on to the next matching resolver; any other error stops the
    /// search.
    pub async fn load(&self, uri: &str) -> Result<RemoteDocument, DocumentError> {
        for resolver in self.resolvers.iter().filter(|r| r.handles(uri)) {
            match resolver.resolve(uri).await {
                Ok(document) => return Ok(document),
                Err(DocumentError::DocumentNotFound { .. }) => continue,
                Err(error) => return Err(error),
            }
        }
        tracing::debug!(uri, "no resolver produced a document");
        Err(DocumentError::not_found(uri))
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl DocumentResolver for DocumentLoader {
    fn handles(&self, uri: &str) -> bool {
        self.resolvers.iter().any(|r| r.handles(uri))
    }

    async fn resolve(&self, uri: &str) -> Result<RemoteDocument, DocumentError> {
        self.load(uri).await
    }
}

/// Serves documents registered up front, keyed by their id.
///
/// This is the opt-in cache of the loader: nothing is added to it
/// implicitly.
#[derive(Debug, Clone, Default)]
pub struct StaticDocumentResolver {
    documents: HashMap<String, Value>,
}

impl StaticDocumentResolver {
    /// An empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `document` under `id`.
    pub fn insert(&mut self, id: impl Into<String>, document: Value) {
        self.documents.insert(id.into(), document);
    }

    /// Register a serializable document under `id`.
    ///
    /// # Errors
    ///
    /// Returns the serialization error when `document` cannot be turned into
    /// JSON.
    pub fn insert_serialized<T: Serialize>(
        &mut self,
        id: impl Into<String>,
        document: &T,
    ) -> Result<(), serde_json::Error> {
        self.insert(id, serde_json::to_value(document)?);
        Ok(())
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl DocumentResolver for StaticDocumentResolver {
    fn handles(&self, uri: &str) -> bool {
        self.documents.contains_key(uri)
    }

    async fn resolve(&self, uri: &str) -> Result<RemoteDocument, DocumentError> {
        self.documents
            .get(uri)
            .map(|document| RemoteDocument::new(document.clone(), uri))
            .ok_or_else(|| DocumentError::not_found(uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Failing;

    #[async_trait]
    impl DocumentResolver for Failing {
        fn handles(&self, uri: &str) -> bool {
            uri.starts_with("urn:fail:")
        }

        async fn resolve(&self, uri: &str) -> Result<RemoteDocument, DocumentError> {
            Err(DocumentError::Other {
                uri: uri.to_string(),
                reason: "backend down".into(),
            })
        }
    }

    #[tokio::test]
    async fn it_tries_resolvers_in_priority_order() {
        let mut first = StaticDocumentResolver::new();
        first.insert("urn:a", json!({ "from": "first" }));
        let mut second = StaticDocumentResolver::new();
        second.insert("urn:a", json!({ "from": "second" }));
        second.insert("urn:b", json!({ "from": "second" }));

        let loader = DocumentLoader::new().with(first).with(second);

        let a = loader.load("urn:a").await.unwrap();
        assert_eq!(a.document, json!({ "from": "first" }));
        let b = loader.load("urn:b").await.unwrap();
        assert_eq!(b.document, json!({ "from": "second" }));
        assert_eq!(b.document_url.as_deref(), Some("urn:b"));
    }

    #[tokio::test]
    async fn it_reports_not_found_when_nothing_matches() {
        let loader = DocumentLoader::new().with(StaticDocumentResolver::new());
        assert_eq!(
            loader.load("urn:missing").await,
            Err(DocumentError::not_found("urn:missing"))
        );
    }

    #[tokio::test]
    async fn it_shares_resolvers_between_loaders() {
        let mut capabilities = StaticDocumentResolver::new();
        capabilities.insert("urn:shared", json!({ "id": "urn:shared" }));
        let shared: Arc<dyn DocumentResolver> = Arc::new(capabilities);

        let mut local = StaticDocumentResolver::new();
        local.insert("urn:local", json!({ "id": "urn:local" }));
        let first = DocumentLoader::new().with(local).with_shared(shared.clone());
        let second = DocumentLoader::new().with_shared(shared);

        for loader in [&first, &second] {
            let document = loader.load("urn:shared").await.unwrap();
            assert_eq!(document.document, json!({ "id": "urn:shared" }));
        }
        assert!(first.load("urn:local").await.is_ok());
        assert_eq!(
            second.load("urn:local").await,
            Err(DocumentError::not_found("urn:local"))
        );
    }

    #[tokio::test]
    async fn it_stops_on_resolver_failures() {
        let mut fallback = StaticDocumentResolver::new();
        fallback.insert("urn:fail:x", json!({}));
        let loader = DocumentLoader::new().with(Failing).with(fallback);

        assert!(matches!(
            loader.load("urn:fail:x").await,
            Err(DocumentError::Other { .. })
        ));
    }
}
