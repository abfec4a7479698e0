//! Ed25519 `did:key` verifier.

use std::{fmt, str::FromStr};

use async_trait::async_trait;
use base58::{FromBase58, ToBase58};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use super::{ED25519_PUB_MULTICODEC, ED25519_VERIFICATION_KEY_2020, error::Ed25519DidFromStrError};

const DID_KEY_PREFIX: &str = "did:key:";

/// An `Ed25519` `did:key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ed25519Verifier(pub ed25519_dalek::VerifyingKey);

impl From<ed25519_dalek::VerifyingKey> for Ed25519Verifier {
    fn from(key: ed25519_dalek::VerifyingKey) -> Self {
        Ed25519Verifier(key)
    }
}

impl From<&ed25519_dalek::SigningKey> for Ed25519Verifier {
    fn from(key: &ed25519_dalek::SigningKey) -> Self {
        Ed25519Verifier(key.verifying_key())
    }
}

impl Ed25519Verifier {
    /// The multibase (`z…`) encoding of the multicodec-prefixed key.
    #[must_use]
    pub fn multibase(&self) -> String {
        let mut raw_bytes = Vec::with_capacity(34);
        raw_bytes.extend_from_slice(&ED25519_PUB_MULTICODEC);
        raw_bytes.extend_from_slice(self.0.as_bytes());
        format!("z{}", raw_bytes.to_base58())
    }

    /// The id of the key's verification method, `did:key:z…#z…`.
    #[must_use]
    pub fn verification_method_id(&self) -> String {
        let multibase = self.multibase();
        format!("{DID_KEY_PREFIX}{multibase}#{multibase}")
    }

    /// Parse either a bare `did:key` or one of its verification method ids.
    ///
    /// # Errors
    ///
    /// Returns [`Ed25519DidFromStrError`] when the DID is not an Ed25519
    /// `did:key`, or when a fragment names a different key.
    pub fn from_key_id(key_id: &str) -> Result<Self, Ed25519DidFromStrError> {
        match key_id.split_once('#') {
            None => key_id.parse(),
            Some((did, fragment)) => {
                let verifier: Self = did.parse()?;
                if fragment != verifier.multibase() {
                    return Err(Ed25519DidFromStrError::FragmentMismatch);
                }
                Ok(verifier)
            }
        }
    }

    /// The verification method object of this key.
    #[must_use]
    pub fn verification_method(&self) -> Value {
        json!({
            "id": self.verification_method_id(),
            "type": ED25519_VERIFICATION_KEY_2020,
            "controller": self.to_string(),
            "publicKeyMultibase": self.multibase(),
        })
    }

    /// The DID document this `did:key` expands to.
    ///
    /// The single verification method is referenced from every
    /// verification relationship, capability delegation and invocation
    /// included.
    #[must_use]
    pub fn did_document(&self) -> Value {
        let method_id = self.verification_method_id();
        json!({
            "@context": [
                "https://www.w3.org/ns/did/v1",
                "https://w3id.org/security/suites/ed25519-2020/v1"
            ],
            "id": self.to_string(),
            "verificationMethod": [self.verification_method()],
            "authentication": [method_id],
            "assertionMethod": [method_id],
            "capabilityDelegation": [method_id],
            "capabilityInvocation": [method_id],
        })
    }
}

impl fmt::Display for Ed25519Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DID_KEY_PREFIX}{}", self.multibase())
    }
}

impl FromStr for Ed25519Verifier {
    type Err = Ed25519DidFromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded = s
            .strip_prefix(DID_KEY_PREFIX)
            .filter(|rest| !rest.contains([':', '#', '/', '?']))
            .ok_or(Ed25519DidFromStrError::InvalidDidHeader)?;
        let b58 = encoded
            .strip_prefix('z')
            .ok_or(Ed25519DidFromStrError::MissingBase58Prefix)?;
        let key_bytes = b58
            .from_base58()
            .map_err(|_| Ed25519DidFromStrError::InvalidBase58)?;
        let key_arr = key_bytes
            .strip_prefix(&ED25519_PUB_MULTICODEC[..])
            .ok_or(Ed25519DidFromStrError::UnsupportedKeyType)?;
        let key_arr: [u8; 32] = key_arr
            .try_into()
            .map_err(|_| Ed25519DidFromStrError::InvalidKey)?;
        let key = ed25519_dalek::VerifyingKey::from_bytes(&key_arr)
            .map_err(|_| Ed25519DidFromStrError::InvalidKey)?;
        Ok(Ed25519Verifier(key))
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl dzcap::Verifier for Ed25519Verifier {
    async fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        use signature::Verifier as _;

        let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
            return false;
        };
        self.0.verify(data, &signature).is_ok()
    }
}

impl Serialize for Ed25519Verifier {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Ed25519Verifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let did = String::deserialize(deserializer)?;
        did.parse().map_err(serde::de::Error::custom)
    }
}
