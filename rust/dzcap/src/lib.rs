//! Authorization capabilities (ZCAP) over HTTP Signatures.
//!
//! A capability grants its controller the right to perform actions on an
//! invocation target. Rights flow from a root capability, whose id is derived
//! from the target alone, through signed delegations that may only narrow
//! what their parent grants. A holder exercises a capability by signing an
//! HTTP request; the resource server verifies the signature, the request's
//! target and action, and the delegation chain back to a root it trusts.
//!
//! # Overview
//!
//! 1. The resource owner controls `urn:zcap:root:<target>`
//! 2. The owner [`delegate`]s a narrower [`Capability`] to another key
//! 3. The holder signs a request with [`create_invocation_request`]
//! 4. The server runs [`verify_capability_invocation`]
//! 5. On success the server gets a [`VerifiedInvocation`]; on failure a
//!    [`Rejection`] with the specific reason and an HTTP status
//!
//! # Example
//!
//! ```ignore
//! use dzcap::{Capability, InvocationOptions, create_invocation_request, delegate};
//!
//! let root = Capability::root("https://example.com/items", owner_did);
//! let capability = delegate(
//!     &owner,
//!     Capability::child_of(&root, alice_did, expires).with_allowed_action(["GET"]),
//!     None,
//! )
//! .await?;
//!
//! let request = create_invocation_request(
//!     &url,
//!     InvocationOptions::new(Method::GET, &alice).capability(capability),
//! )
//! .await?;
//! ```
//!
//! Signature algorithms are not implemented here: [`Signer`], [`Verifier`]
//! and [`KeyResolver`] are supplied by the caller (see `dzcap-credentials`
//! for Ed25519 `did:key`).

pub mod capability;
pub mod config;
pub mod delegation;
pub mod did;
pub mod document;
pub mod error;
pub mod http_signature;
pub mod identity;
pub mod invocation;
pub mod json;
pub mod proof;
pub mod request;
pub mod root;
pub mod sync;
pub mod time;
pub mod verifier;

mod chain;

pub use capability::{
    AttenuationError, AttenuationPolicy, Capability, ParentCapability, RootCapability,
    ZCAP_CONTEXT, check_attenuation, dereference_root_capability_id, derive_root_capability_id,
    is_root_capability_id,
};
pub use config::{InvocationConfig, VerifierConfig};
pub use delegation::{delegate, verify_delegation};
pub use did::Did;
pub use document::{DocumentLoader, DocumentResolver, RemoteDocument, StaticDocumentResolver};
pub use error::{DocumentError, ErrorCode, Rejection, SigningError};
pub use http_signature::{HeaderParseError, SignatureHeader};
pub use identity::{CompositeKeyResolver, IdentityError, KeyResolver, SignError, Signer, Verifier};
pub use invocation::{
    Body, CapabilityInvocationHeader, InvocationError, InvocationOptions, InvocationRequest,
    InvokedCapability, create_invocation_request,
};
pub use json::{JsonInvocation, invoke, verify_json_invocation};
pub use proof::{DelegationProof, InvocationProof, ProofPurpose};
pub use request::{HttpSignatureAuthorization, SignatureOptions, ZcapInvocationRequest};
pub use root::{OwnerRootResolver, RootZcapDocumentResolver, RootZcapResolver, StaticRootResolver};
pub use verifier::{
    Verification, VerificationState, VerifiedInvocation, VerifyOptions,
    verify_capability_invocation,
};
