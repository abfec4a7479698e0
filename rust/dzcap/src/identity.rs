//! Signer, verifier and key-resolution interfaces.
//!
//! The engine never implements a signature algorithm itself. A holder signs
//! through a [`Signer`]; a resource server turns a `keyId` into a
//! [`Verifier`] through a [`KeyResolver`]. Concrete `did:key` Ed25519
//! implementations live in `dzcap-credentials`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::sync::{ConditionalSend, ConditionalSync};

/// Error that can occur during signing operations.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    /// The signing key is not available or cannot be used.
    #[error("Signing key unavailable: {0}")]
    KeyUnavailable(String),

    /// An error occurred during the signing operation.
    #[error("Signing failed: {0}")]
    SigningFailed(String),
}

/// Error from resolving a key id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// No key is known for this id.
    #[error("unknown key {0}")]
    UnknownKey(String),

    /// The id is well-formed but uses a method this resolver does not handle.
    #[error("unsupported key id {0}")]
    Unsupported(String),
}

/// Produces signatures with a key identified by a stable verification method
/// id (typically `did:key:z…#z…`).
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait Signer: ConditionalSend + ConditionalSync {
    /// The verification method id of the signing key, if it has one.
    fn id(&self) -> Option<&str>;

    /// Sign `data` and return the raw signature bytes.
    async fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SignError>;
}

/// Verifies signatures made by one key.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait Verifier: ConditionalSend + ConditionalSync {
    /// Returns `true` when `signature` is valid for `data`.
    async fn verify(&self, data: &[u8], signature: &[u8]) -> bool;
}

/// Resolves a key id to a [`Verifier`].
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait KeyResolver: ConditionalSend + ConditionalSync {
    /// Resolve `key_id` to a verifier.
    async fn resolve_verifier(&self, key_id: &str) -> Result<Arc<dyn Verifier>, IdentityError>;

    /// Combine with another resolver that is consulted when this one does
    /// not know the key.
    ///
    /// ```ignore
    /// let resolver = did_key_resolver.or(registry_resolver);
    /// ```
    fn or<R>(self, other: R) -> CompositeKeyResolver<Self, R>
    where
        Self: Sized,
    {
        CompositeKeyResolver(self, other)
    }
}

/// A resolver that tries its left resolver first and falls back to the
/// right one when the left does not know or support the key.
///
/// Built via [`KeyResolver::or`].
#[derive(Debug, Clone, Copy)]
pub struct CompositeKeyResolver<L, R>(pub L, pub R);

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<L, R> KeyResolver for CompositeKeyResolver<L, R>
where
    L: KeyResolver,
    R: KeyResolver,
{
    async fn resolve_verifier(&self, key_id: &str) -> Result<Arc<dyn Verifier>, IdentityError> {
        match self.0.resolve_verifier(key_id).await {
            Ok(verifier) => Ok(verifier),
            Err(IdentityError::UnknownKey(_) | IdentityError::Unsupported(_)) => {
                self.1.resolve_verifier(key_id).await
            }
        }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<T: KeyResolver + ?Sized> KeyResolver for Arc<T> {
    async fn resolve_verifier(&self, key_id: &str) -> Result<Arc<dyn Verifier>, IdentityError> {
        (**self).resolve_verifier(key_id).await
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl<T: Signer + ?Sized> Signer for Arc<T> {
    fn id(&self) -> Option<&str> {
        (**self).id()
    }

    async fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SignError> {
        (**self).sign(data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Accepts;

    #[async_trait]
    impl Verifier for Accepts {
        async fn verify(&self, _data: &[u8], _signature: &[u8]) -> bool {
            true
        }
    }

    struct Only(&'static str);

    #[async_trait]
    impl KeyResolver for Only {
        async fn resolve_verifier(
            &self,
            key_id: &str,
        ) -> Result<Arc<dyn Verifier>, IdentityError> {
            if key_id == self.0 {
                Ok(Arc::new(Accepts))
            } else {
                Err(IdentityError::UnknownKey(key_id.to_string()))
            }
        }
    }

    #[tokio::test]
    async fn it_falls_back_to_the_second_resolver() {
        let resolver = Only("did:example:a#1").or(Only("did:example:b#1"));

        assert!(resolver.resolve_verifier("did:example:a#1").await.is_ok());
        assert!(resolver.resolve_verifier("did:example:b#1").await.is_ok());
        assert_eq!(
            resolver.resolve_verifier("did:example:c#1").await.err(),
            Some(IdentityError::UnknownKey("did:example:c#1".into()))
        );
    }
}
