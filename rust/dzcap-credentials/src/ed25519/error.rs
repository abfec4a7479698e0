//! Error types for Ed25519 key operations.

use thiserror::Error;

/// Errors from [`super::Ed25519Signer::generate`] or
/// [`super::Ed25519Signer::import`].
#[derive(Debug, Clone, Copy, Error)]
pub enum Ed25519KeyError {
    /// The seed bytes have the wrong length (expected 32).
    #[error("expected 32 seed bytes, got {0}")]
    InvalidSeedLength(usize),

    /// Random number generation failed.
    #[error("RNG error: {0}")]
    Rng(getrandom::Error),
}

/// Errors that can occur when parsing an [`super::Ed25519Verifier`] from a
/// string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Ed25519DidFromStrError {
    /// The DID header is invalid.
    #[error("invalid did header")]
    InvalidDidHeader,

    /// The base58 prefix 'z' is missing.
    #[error("missing base58 prefix 'z'")]
    MissingBase58Prefix,

    /// The base58 encoding is invalid.
    #[error("invalid base58 encoding")]
    InvalidBase58,

    /// The multicodec prefix is not `ed25519-pub`.
    #[error("not an ed25519-pub multicodec")]
    UnsupportedKeyType,

    /// The key bytes are invalid.
    #[error("invalid key bytes")]
    InvalidKey,

    /// The fragment of a verification method id does not name the key.
    #[error("verification method fragment does not match the key")]
    FragmentMismatch,
}
