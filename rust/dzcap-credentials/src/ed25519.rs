//! Ed25519 `did:key` signer, verifier and resolvers.
//!
//! A `did:key` for an Ed25519 public key is `did:key:z` followed by the
//! base58btc encoding of the multicodec prefix `0xed 0x01` and the 32 key
//! bytes. Its single verification method is the same DID with the multibase
//! key repeated as fragment:
//!
//! ```text
//! did:key:z6Mk…#z6Mk…
//! ```

mod error;
mod resolver;
mod signer;
mod verifier;

pub use error::{Ed25519DidFromStrError, Ed25519KeyError};
pub use resolver::{DidKeyDocumentResolver, DidKeyResolver};
pub use signer::Ed25519Signer;
pub use verifier::Ed25519Verifier;

/// Multicodec prefix of an Ed25519 public key.
pub const ED25519_PUB_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// Verification method type of a `did:key` Ed25519 key.
pub const ED25519_VERIFICATION_KEY_2020: &str = "Ed25519VerificationKey2020";
