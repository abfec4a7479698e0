//! Ed25519 signer implementation.

use async_trait::async_trait;
use dzcap::SignError;
use serde::Serialize;

use super::{error::Ed25519KeyError, verifier::Ed25519Verifier};
use crate::key::KeyExport;

/// An `Ed25519` `did:key` signer.
///
/// Signs as the key's verification method, `did:key:z…#z…`.
#[derive(Debug, Clone)]
pub struct Ed25519Signer {
    did: Ed25519Verifier,
    verification_method: String,
    signer: ed25519_dalek::SigningKey,
}

impl From<ed25519_dalek::SigningKey> for Ed25519Signer {
    fn from(signer: ed25519_dalek::SigningKey) -> Self {
        let did = Ed25519Verifier::from(&signer);
        let verification_method = did.verification_method_id();
        Self {
            did,
            verification_method,
            signer,
        }
    }
}

impl Ed25519Signer {
    /// Generate a new Ed25519 keypair with random bytes from `getrandom`.
    ///
    /// # Errors
    ///
    /// Returns an error if the RNG fails.
    pub fn generate() -> Result<Self, Ed25519KeyError> {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed).map_err(Ed25519KeyError::Rng)?;
        Ok(ed25519_dalek::SigningKey::from_bytes(&seed).into())
    }

    /// Import a keypair from a [`KeyExport`].
    ///
    /// Accepts anything that converts `Into<KeyExport>`, including `&[u8; 32]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the seed has the wrong length.
    pub fn import(key: impl Into<KeyExport>) -> Result<Self, Ed25519KeyError> {
        let key = key.into();
        let seed: [u8; 32] = key
            .as_bytes()
            .try_into()
            .map_err(|_| Ed25519KeyError::InvalidSeedLength(key.as_bytes().len()))?;
        Ok(ed25519_dalek::SigningKey::from_bytes(&seed).into())
    }

    /// Export the seed.
    #[must_use]
    pub fn export(&self) -> KeyExport {
        KeyExport::Extractable(self.signer.to_bytes().to_vec())
    }

    /// Get the associated Ed25519 DID (verifier).
    #[must_use]
    pub const fn ed25519_did(&self) -> &Ed25519Verifier {
        &self.did
    }

    /// The verification method id this signer signs as.
    #[must_use]
    pub fn verification_method_id(&self) -> &str {
        &self.verification_method
    }
}

impl std::fmt::Display for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.did)
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl dzcap::Signer for Ed25519Signer {
    fn id(&self) -> Option<&str> {
        Some(&self.verification_method)
    }

    async fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SignError> {
        use signature::Signer as _;

        let signature = self
            .signer
            .try_sign(data)
            .map_err(|e| SignError::SigningFailed(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }
}

impl Serialize for Ed25519Signer {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.did.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dzcap::{Signer as _, Verifier as _};

    fn test_signer(seed: u8) -> Ed25519Signer {
        Ed25519Signer::import(&[seed; 32]).unwrap()
    }

    #[test]
    fn ed25519_did_round_trip() {
        let signer = test_signer(0);
        let did_string = signer.ed25519_did().to_string();
        let parsed: Ed25519Verifier = did_string.parse().unwrap();
        assert_eq!(&parsed, signer.ed25519_did());
    }

    #[test]
    fn it_signs_as_its_verification_method() {
        let signer = test_signer(1);
        let id = signer.id().unwrap();
        assert_eq!(id, signer.ed25519_did().verification_method_id());
        let (did, fragment) = id.split_once('#').unwrap();
        assert_eq!(did, signer.to_string());
        assert_eq!(fragment, signer.ed25519_did().multibase());
    }

    #[tokio::test]
    async fn ed25519_signer_produces_valid_signature() {
        let signer = test_signer(42);
        let msg = b"test message for async signing";

        let signature = signer.sign(msg).await.unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signer.ed25519_did().verify(msg, &signature).await);
    }

    #[tokio::test]
    async fn ed25519_signer_wrong_message_fails_verification() {
        let signer = test_signer(99);
        let signature = signer.sign(b"original message").await.unwrap();

        assert!(
            !signer
                .ed25519_did()
                .verify(b"tampered message", &signature)
                .await,
            "Verification should fail for wrong message"
        );
    }

    #[tokio::test]
    async fn different_signers_do_not_cross_verify() {
        let signer1 = test_signer(1);
        let signer2 = test_signer(2);
        let msg = b"same message";

        let sig1 = signer1.sign(msg).await.unwrap();
        let sig2 = signer2.sign(msg).await.unwrap();
        assert_ne!(sig1, sig2);

        assert!(!signer1.ed25519_did().verify(msg, &sig2).await);
        assert!(!signer2.ed25519_did().verify(msg, &sig1).await);
    }

    #[test]
    fn export_import_roundtrip_preserves_did() {
        let seed = [55u8; 32];
        let signer = Ed25519Signer::import(&seed).unwrap();

        let exported = signer.export();
        assert_eq!(exported.as_bytes(), &seed);

        let restored = Ed25519Signer::import(exported).unwrap();
        assert_eq!(restored.ed25519_did(), signer.ed25519_did());
    }

    #[test]
    fn import_rejects_short_seeds() {
        assert!(matches!(
            Ed25519Signer::import(vec![0u8; 31]),
            Err(Ed25519KeyError::InvalidSeedLength(31))
        ));
    }

    #[test]
    fn generated_signers_are_distinct() {
        let a = Ed25519Signer::generate().unwrap();
        let b = Ed25519Signer::generate().unwrap();
        assert_ne!(a.ed25519_did(), b.ed25519_did());
        assert!(a.to_string().starts_with("did:key:z6Mk"));
    }
}
