//! Linked-data style proofs: delegation proofs attached to capabilities and
//! invocation proofs attached to JSON invocations.
//!
//! Both are `Ed25519Signature2020`-shaped. The bytes a proof signs are
//!
//! ```text
//! sha256(canonical(proof options)) || sha256(canonical(document))
//! ```
//!
//! where the proof options are the proof without `proofValue`, the document
//! is taken without its `proof`, and `canonical` is JSON with object keys
//! sorted and no insignificant whitespace.

use std::fmt::Write as _;

use base58::{FromBase58, ToBase58};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// The proof type produced by this crate.
pub const ED25519_SIGNATURE_2020: &str = "Ed25519Signature2020";

/// What a proof was made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProofPurpose {
    /// Granting a capability to a new controller.
    #[serde(rename = "capabilityDelegation")]
    Delegation,
    /// Exercising a capability.
    #[serde(rename = "capabilityInvocation")]
    Invocation,
}

impl ProofPurpose {
    /// The wire name of the purpose.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofPurpose::Delegation => "capabilityDelegation",
            ProofPurpose::Invocation => "capabilityInvocation",
        }
    }
}

/// Proof on a delegated capability, made by the parent's controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationProof {
    /// Proof suite, [`ED25519_SIGNATURE_2020`].
    #[serde(rename = "type")]
    pub proof_type: String,
    /// RFC 3339 creation time.
    pub created: String,
    /// Key that made the proof.
    pub verification_method: String,
    /// Always [`ProofPurpose::Delegation`] for a valid proof.
    pub proof_purpose: ProofPurpose,
    /// Multibase (base58btc) signature.
    #[serde(default)]
    pub proof_value: String,
}

/// Proof on a JSON invocation, made by the invoker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationProof {
    /// Proof suite, [`ED25519_SIGNATURE_2020`].
    #[serde(rename = "type")]
    pub proof_type: String,
    /// RFC 3339 creation time.
    pub created: String,
    /// Key that made the proof.
    pub verification_method: String,
    /// Always [`ProofPurpose::Invocation`] for a valid proof.
    pub proof_purpose: ProofPurpose,
    /// Id of the invoked capability.
    pub capability: String,
    /// The action being invoked.
    pub capability_action: String,
    /// The target the invocation is addressed to.
    pub invocation_target: String,
    /// RFC 3339 expiry of the invocation.
    pub expires: String,
    /// Multibase (base58btc) signature.
    #[serde(default)]
    pub proof_value: String,
}

/// Failure to decode a proof value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProofValueError {
    /// Only base58btc (`z`) multibase is supported.
    #[error("unsupported multibase prefix in proof value")]
    UnsupportedMultibase,

    /// The base58 payload does not decode.
    #[error("invalid base58 in proof value")]
    InvalidBase58,
}

/// Encode bytes as multibase base58btc.
pub fn encode_multibase(bytes: &[u8]) -> String {
    format!("z{}", bytes.to_base58())
}

/// Decode a multibase base58btc string.
///
/// # Errors
///
/// Returns [`ProofValueError`] for any other base or invalid base58.
pub fn decode_multibase(value: &str) -> Result<Vec<u8>, ProofValueError> {
    let encoded = value
        .strip_prefix('z')
        .ok_or(ProofValueError::UnsupportedMultibase)?;
    encoded
        .from_base58()
        .map_err(|_| ProofValueError::InvalidBase58)
}

/// Serialize `value` canonically: object keys sorted, compact.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (index, (key, value)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_string(s, out),
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    let _ = write!(out, "{}", Value::from(s));
}

/// The bytes a proof signs over.
///
/// `document` is taken without its `proof` member and `proof` without its
/// `proofValue`. The document's `@context` is carried into the proof options
/// so that a proof cannot be moved to a document with different contexts.
pub fn signing_input(document: &Value, proof: &Value) -> Vec<u8> {
    let mut document = document.clone();
    let context = match &mut document {
        Value::Object(map) => {
            map.remove("proof");
            map.get("@context").cloned()
        }
        _ => None,
    };

    let mut options = proof.clone();
    if let Value::Object(map) = &mut options {
        map.remove("proofValue");
        if let Some(context) = context {
            map.insert("@context".to_string(), context);
        }
    }

    let mut input = Vec::with_capacity(64);
    input.extend_from_slice(&Sha256::digest(canonicalize(&options).as_bytes()));
    input.extend_from_slice(&Sha256::digest(canonicalize(&document).as_bytes()));
    input
}
