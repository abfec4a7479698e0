//! Ed25519 `did:key` resolvers.

use std::sync::Arc;

use async_trait::async_trait;
use dzcap::{DocumentError, DocumentResolver, IdentityError, KeyResolver, RemoteDocument, Verifier};

use super::verifier::Ed25519Verifier;

/// Resolves `did:key` ids (bare or verification method) to Ed25519
/// verifiers.
///
/// Ids of any other DID method are reported as
/// [`IdentityError::Unsupported`], so the resolver composes with
/// [`KeyResolver::or`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DidKeyResolver;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl KeyResolver for DidKeyResolver {
    async fn resolve_verifier(&self, key_id: &str) -> Result<Arc<dyn Verifier>, IdentityError> {
        if !key_id.starts_with("did:key:") {
            return Err(IdentityError::Unsupported(key_id.to_string()));
        }
        let verifier = Ed25519Verifier::from_key_id(key_id).map_err(|e| {
            tracing::debug!(key_id, error = %e, "unresolvable did:key");
            IdentityError::UnknownKey(key_id.to_string())
        })?;
        Ok(Arc::new(verifier))
    }
}

/// Expands `did:key` URIs into documents: a bare DID into its DID document
/// and a verification method id into the verification method.
#[derive(Debug, Clone, Copy, Default)]
pub struct DidKeyDocumentResolver;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl DocumentResolver for DidKeyDocumentResolver {
    fn handles(&self, uri: &str) -> bool {
        uri.starts_with("did:key:")
    }

    async fn resolve(&self, uri: &str) -> Result<RemoteDocument, DocumentError> {
        let verifier = Ed25519Verifier::from_key_id(uri).map_err(|e| DocumentError::Malformed {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        let document = if uri.contains('#') {
            let mut method = verifier.verification_method();
            if let Some(object) = method.as_object_mut() {
                object.insert(
                    "@context".to_string(),
                    serde_json::Value::from(dzcap::capability::ED25519_2020_CONTEXT),
                );
            }
            method
        } else {
            verifier.did_document()
        };
        Ok(RemoteDocument::new(document, uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ed25519Signer;
    use dzcap::{DocumentLoader, Signer as _};
    use testresult::TestResult;

    #[tokio::test]
    async fn it_resolves_verification_methods_and_bare_dids() {
        let signer = Ed25519Signer::import(&[8u8; 32]).unwrap();
        let signature = signer.sign(b"hello").await.unwrap();

        for key_id in [signer.verification_method_id().to_string(), signer.to_string()] {
            let verifier = DidKeyResolver.resolve_verifier(&key_id).await.unwrap();
            assert!(verifier.verify(b"hello", &signature).await);
        }
    }

    #[tokio::test]
    async fn it_leaves_other_methods_to_the_next_resolver() {
        assert_eq!(
            DidKeyResolver
                .resolve_verifier("did:web:example.com#key-1")
                .await
                .err(),
            Some(IdentityError::Unsupported("did:web:example.com#key-1".into()))
        );
        assert_eq!(
            DidKeyResolver.resolve_verifier("did:key:zzz").await.err(),
            Some(IdentityError::UnknownKey("did:key:zzz".into()))
        );
    }

    #[tokio::test]
    async fn it_loads_did_documents() -> TestResult {
        let signer = Ed25519Signer::import(&[9u8; 32])?;
        let loader = DocumentLoader::new().with(DidKeyDocumentResolver);

        let did = loader.load(&signer.to_string()).await?;
        assert_eq!(did.document["id"], signer.to_string());

        let method = loader.load(signer.verification_method_id()).await?;
        assert_eq!(method.document["controller"], signer.to_string());
        assert_eq!(method.document["type"], "Ed25519VerificationKey2020");

        assert!(matches!(
            loader.load("did:key:z1").await,
            Err(DocumentError::Malformed { .. })
        ));
        Ok(())
    }
}
