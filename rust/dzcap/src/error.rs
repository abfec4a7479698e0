//! Error types for capability delegation, invocation and verification.
//!
//! [`Rejection`] is the verifier's taxonomy. Every verification failure is
//! reported with its specific reason; [`ErrorCode`] maps each reason to an
//! HTTP status so a resource server can answer consistently.

use serde::Serialize;

use crate::{capability::AttenuationError, identity::SignError};

/// Reason a capability invocation was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// A required header was not present on the request.
    #[error("missing required header {name}")]
    MissingHeader {
        /// Lowercase header name.
        name: String,
    },

    /// A signature header could not be parsed or does not cover what it must.
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// The `keyId` could not be resolved to a verifier.
    #[error("unknown key {key_id}: {reason}")]
    UnknownKey {
        /// The unresolvable key id.
        key_id: String,
        /// Why resolution failed.
        reason: String,
    },

    /// The request signature does not verify.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The `digest` header does not match the request body.
    #[error("digest header does not match request body")]
    InvalidDigest,

    /// The invocation or a capability in its chain has expired.
    #[error("{subject} expired at {expires}")]
    Expired {
        /// What expired (`invocation` or a capability id).
        subject: String,
        /// Expiry as an RFC 3339 timestamp.
        expires: String,
    },

    /// The invocation was created in the future beyond the allowed skew.
    #[error("invocation not valid until {created}")]
    NotYetValid {
        /// Creation time as an RFC 3339 timestamp.
        created: String,
    },

    /// The request target is not the one the verifier expects.
    #[error("target mismatch: expected {expected}, got {actual}")]
    TargetMismatch {
        /// Expected target (or host).
        expected: String,
        /// Target (or host) found on the request or capability.
        actual: String,
    },

    /// The invoked action is not the expected or permitted one.
    #[error("action mismatch: expected {expected}, got {actual}")]
    ActionMismatch {
        /// Expected or permitted action(s).
        expected: String,
        /// Action found in the invocation.
        actual: String,
    },

    /// The chain's root capability is not one the verifier trusts or could
    /// not be resolved.
    #[error("unknown root capability {id}: {reason}")]
    UnknownRoot {
        /// Root capability id.
        id: String,
        /// Why the root was refused.
        reason: String,
    },

    /// The signer of a proof is not the controller it must be.
    #[error("controller mismatch: expected {expected}, got {actual}")]
    ControllerMismatch {
        /// Controller required by the capability.
        expected: String,
        /// Controller of the key that signed.
        actual: String,
    },

    /// A delegation proof in the chain is missing or does not verify.
    #[error("invalid delegation of {capability}: {reason}")]
    InvalidDelegation {
        /// Capability whose delegation proof failed.
        capability: String,
        /// What failed.
        reason: String,
    },

    /// A link in the chain grants more than its parent.
    #[error("capability {capability} is not a valid attenuation of its parent: {reason}")]
    AttenuationViolation {
        /// The offending child capability.
        capability: String,
        /// Which rule was broken.
        reason: AttenuationError,
    },

    /// The chain does not lead back to a root capability.
    #[error("broken capability chain at {capability}: {reason}")]
    BrokenChain {
        /// The capability whose parent could not be followed.
        capability: String,
        /// What went wrong.
        reason: String,
    },

    /// The chain has more links than the verifier allows.
    #[error("capability chain exceeds {max} delegations")]
    ChainTooLong {
        /// The configured maximum.
        max: usize,
    },

    /// A collaborator call did not complete in time.
    #[error("timed out resolving {uri}")]
    ResolutionTimeout {
        /// The URI being resolved.
        uri: String,
    },

    /// A collaborator failed for a reason other than absence.
    #[error("failed to resolve {uri}: {reason}")]
    ResolutionFailed {
        /// The URI being resolved.
        uri: String,
        /// The collaborator's error.
        reason: String,
    },

    /// The invoked capability document could not be found.
    #[error("document not found: {uri}")]
    DocumentNotFound {
        /// The missing document.
        uri: String,
    },

    /// Capabilities may only be invoked on `https:` URLs.
    #[error("request url must use https: to invoke capabilities, got {url}")]
    InsecureTransport {
        /// The offending URL.
        url: String,
    },
}

/// Error codes for rejected invocations.
///
/// Each code maps to an HTTP status code via [`ErrorCode::status_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // 400 Bad Request
    /// Required header missing
    MissingHeader,
    /// Signature header unparseable or incomplete
    MalformedSignature,
    /// Body digest mismatch
    InvalidDigest,
    /// Capability invoked over plain http
    InsecureTransport,

    // 401 Unauthorized
    /// Key id not resolvable
    UnknownKey,
    /// Signature does not verify
    InvalidSignature,
    /// Invocation or capability expired
    Expired,
    /// Invocation created in the future
    NotYetValid,

    // 403 Forbidden
    /// Target mismatch
    TargetMismatch,
    /// Action mismatch
    ActionMismatch,
    /// Root capability refused
    UnknownRoot,
    /// Signer is not the required controller
    ControllerMismatch,
    /// Delegation proof failed
    InvalidDelegation,
    /// Attenuation rule broken
    AttenuationViolation,
    /// Chain does not reach a root
    BrokenChain,
    /// Chain longer than allowed
    ChainTooLong,
    /// Invoked capability missing
    DocumentNotFound,

    // 502 / 504
    /// Collaborator failure
    ResolutionFailed,
    /// Collaborator timeout
    ResolutionTimeout,
}

impl ErrorCode {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCode::MissingHeader
            | ErrorCode::MalformedSignature
            | ErrorCode::InvalidDigest
            | ErrorCode::InsecureTransport => 400,

            ErrorCode::UnknownKey
            | ErrorCode::InvalidSignature
            | ErrorCode::Expired
            | ErrorCode::NotYetValid => 401,

            ErrorCode::TargetMismatch
            | ErrorCode::ActionMismatch
            | ErrorCode::UnknownRoot
            | ErrorCode::ControllerMismatch
            | ErrorCode::InvalidDelegation
            | ErrorCode::AttenuationViolation
            | ErrorCode::BrokenChain
            | ErrorCode::ChainTooLong
            | ErrorCode::DocumentNotFound => 403,

            ErrorCode::ResolutionFailed => 502,
            ErrorCode::ResolutionTimeout => 504,
        }
    }
}

impl Rejection {
    /// The error code classifying this rejection.
    pub fn code(&self) -> ErrorCode {
        match self {
            Rejection::MissingHeader { .. } => ErrorCode::MissingHeader,
            Rejection::MalformedSignature(_) => ErrorCode::MalformedSignature,
            Rejection::UnknownKey { .. } => ErrorCode::UnknownKey,
            Rejection::InvalidSignature(_) => ErrorCode::InvalidSignature,
            Rejection::InvalidDigest => ErrorCode::InvalidDigest,
            Rejection::Expired { .. } => ErrorCode::Expired,
            Rejection::NotYetValid { .. } => ErrorCode::NotYetValid,
            Rejection::TargetMismatch { .. } => ErrorCode::TargetMismatch,
            Rejection::ActionMismatch { .. } => ErrorCode::ActionMismatch,
            Rejection::UnknownRoot { .. } => ErrorCode::UnknownRoot,
            Rejection::ControllerMismatch { .. } => ErrorCode::ControllerMismatch,
            Rejection::InvalidDelegation { .. } => ErrorCode::InvalidDelegation,
            Rejection::AttenuationViolation { .. } => ErrorCode::AttenuationViolation,
            Rejection::BrokenChain { .. } => ErrorCode::BrokenChain,
            Rejection::ChainTooLong { .. } => ErrorCode::ChainTooLong,
            Rejection::ResolutionTimeout { .. } => ErrorCode::ResolutionTimeout,
            Rejection::ResolutionFailed { .. } => ErrorCode::ResolutionFailed,
            Rejection::DocumentNotFound { .. } => ErrorCode::DocumentNotFound,
            Rejection::InsecureTransport { .. } => ErrorCode::InsecureTransport,
        }
    }

    /// Get the HTTP status code for this rejection.
    pub fn status_code(&self) -> u16 {
        self.code().status_code()
    }
}

/// Errors from signing a delegation or an invocation.
///
/// A malformed signed artifact must never be emitted, so every failure
/// propagates to the caller.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// The signer has no stable verification method id.
    #[error("signer has no verification method id")]
    MissingSignerId,

    /// A delegated capability must name its parent.
    #[error("capability {0} has no parentCapability")]
    MissingParent(String),

    /// A delegated capability must expire.
    #[error("capability {0} has no expires")]
    MissingExpires(String),

    /// The first `@context` entry must be the ZCAP context.
    #[error("capability {0} does not start its @context with the ZCAP context")]
    InvalidContext(String),

    /// The document could not be brought into canonical form.
    #[error("failed to canonicalize document: {0}")]
    Canonicalization(String),

    /// The underlying signer failed.
    #[error(transparent)]
    Signer(#[from] SignError),
}

/// Errors from the document loader collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    /// No resolver produced a document for the URI.
    #[error("document not found: {uri}")]
    DocumentNotFound {
        /// The requested URI.
        uri: String,
    },

    /// A document was found but is not what was asked for.
    #[error("malformed document {uri}: {reason}")]
    Malformed {
        /// The requested URI.
        uri: String,
        /// Why it was refused.
        reason: String,
    },

    /// The resolver did not answer in time.
    #[error("timed out loading {uri}")]
    Timeout {
        /// The requested URI.
        uri: String,
    },

    /// Any other resolver failure.
    #[error("failed to load {uri}: {reason}")]
    Other {
        /// The requested URI.
        uri: String,
        /// The resolver's error.
        reason: String,
    },
}

impl DocumentError {
    /// Convenience constructor for [`DocumentError::DocumentNotFound`].
    pub fn not_found(uri: impl Into<String>) -> Self {
        DocumentError::DocumentNotFound { uri: uri.into() }
    }
}
