//! Concrete `did:key` credentials for dzcap.
//!
//! This crate provides Ed25519 implementations of the [`Signer`],
//! [`Verifier`] and [`KeyResolver`] interfaces from `dzcap`, plus a
//! [`DocumentResolver`] that expands `did:key` identifiers into DID
//! documents.
//!
//! [`Signer`]: dzcap::Signer
//! [`Verifier`]: dzcap::Verifier
//! [`KeyResolver`]: dzcap::KeyResolver
//! [`DocumentResolver`]: dzcap::DocumentResolver

pub mod ed25519;
pub mod key;

pub use ed25519::*;
pub use key::KeyExport;
