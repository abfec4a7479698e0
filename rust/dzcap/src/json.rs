//! JSON invocations.
//!
//! Besides HTTP requests, a capability can be invoked with a standalone JSON
//! document carrying an `Ed25519Signature2020` invocation proof:
//!
//! ```json
//! {
//!   "@context": ["https://w3id.org/zcap/v1", "https://w3id.org/security/suites/ed25519-2020/v1"],
//!   "id": "urn:uuid:…",
//!   "invocationTarget": "https://example.com/items",
//!   "proof": {
//!     "type": "Ed25519Signature2020",
//!     "proofPurpose": "capabilityInvocation",
//!     "capability": "urn:zcap:root:https%3A%2F%2Fexample.com%2Fitems",
//!     "capabilityAction": "read",
//!     …
//!   }
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    capability::{
        Capability, ED25519_2020_CONTEXT, ZCAP_CONTEXT, derive_root_capability_id,
        format_timestamp, parse_timestamp,
    },
    chain::{ChainWalker, check_chain_action, check_invoked, resolve_roots, within},
    config::InvocationConfig,
    did::did_for_did_uri,
    error::{Rejection, SigningError},
    identity::Signer,
    invocation::InvokedCapability,
    proof::{
        ED25519_SIGNATURE_2020, InvocationProof, ProofPurpose, decode_multibase,
        encode_multibase, signing_input,
    },
    time::{ValidityWindow, to_unix, unix_now},
    verifier::{VerifiedInvocation, VerifyOptions},
};

/// A signed JSON invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonInvocation {
    /// JSON-LD contexts.
    #[serde(rename = "@context")]
    pub context: Vec<Value>,
    /// Fresh id of this invocation.
    pub id: String,
    /// Target being invoked.
    pub invocation_target: String,
    /// The invoker's proof.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<InvocationProof>,
}

/// Invoke the root capability of `target` with a JSON invocation.
///
/// # Errors
///
/// [`SigningError`] when the signer has no id or fails.
pub async fn invoke<S>(
    target: &str,
    signer: &S,
    action: &str,
) -> Result<JsonInvocation, SigningError>
where
    S: Signer + ?Sized,
{
    let root = derive_root_capability_id(target);
    invoke_capability(&root, target, signer, action, Utc::now(), &InvocationConfig::default())
        .await
}

/// Invoke `capability` (by id) on `target`, created at `created`.
///
/// # Errors
///
/// [`SigningError`] when the signer has no id or fails.
pub async fn invoke_capability<S>(
    capability: &str,
    target: &str,
    signer: &S,
    action: &str,
    created: DateTime<Utc>,
    config: &InvocationConfig,
) -> Result<JsonInvocation, SigningError>
where
    S: Signer + ?Sized,
{
    let verification_method = signer.id().ok_or(SigningError::MissingSignerId)?;
    let lifetime = i64::try_from(config.signature_lifetime).unwrap_or(i64::MAX);
    let expires = created + Duration::seconds(lifetime);

    let mut invocation = JsonInvocation {
        context: vec![Value::from(ZCAP_CONTEXT), Value::from(ED25519_2020_CONTEXT)],
        id: format!("urn:uuid:{}", uuid::Uuid::new_v4()),
        invocation_target: target.to_string(),
        proof: None,
    };
    let mut proof = InvocationProof {
        proof_type: ED25519_SIGNATURE_2020.to_string(),
        created: format_timestamp(created),
        verification_method: verification_method.to_string(),
        proof_purpose: ProofPurpose::Invocation,
        capability: capability.to_string(),
        capability_action: action.to_string(),
        invocation_target: target.to_string(),
        expires: format_timestamp(expires),
        proof_value: String::new(),
    };

    let input = invocation_signing_input(&invocation, &proof)
        .map_err(|e| SigningError::Canonicalization(e.to_string()))?;
    proof.proof_value = encode_multibase(&signer.sign(&input).await?);
    invocation.proof = Some(proof);

    tracing::debug!(id = %invocation.id, target, action, "created JSON invocation");
    Ok(invocation)
}

fn invocation_signing_input(
    invocation: &JsonInvocation,
    proof: &InvocationProof,
) -> Result<Vec<u8>, serde_json::Error> {
    let document = serde_json::to_value(JsonInvocation {
        proof: None,
        ..invocation.clone()
    })?;
    let proof = serde_json::to_value(InvocationProof {
        proof_value: String::new(),
        ..proof.clone()
    })?;
    Ok(signing_input(&document, &proof))
}

/// Verify a JSON invocation.
///
/// `options.expected_action`, when set, must equal the invoked action;
/// `options.expected_host` does not apply.
///
/// # Errors
///
/// The [`Rejection`] of the first failed check.
pub async fn verify_json_invocation(
    invocation: &JsonInvocation,
    options: &VerifyOptions<'_>,
) -> Result<VerifiedInvocation, Rejection> {
    let result = verify(invocation, options).await;
    if let Err(rejection) = &result {
        tracing::debug!(id = %invocation.id, %rejection, "rejected JSON invocation");
    }
    result
}

async fn verify(
    invocation: &JsonInvocation,
    options: &VerifyOptions<'_>,
) -> Result<VerifiedInvocation, Rejection> {
    let config = &options.config;
    let timeout = config.resolution_timeout();

    let proof = invocation
        .proof
        .as_ref()
        .ok_or_else(|| Rejection::MalformedSignature("invocation has no proof".to_string()))?;
    if proof.proof_purpose != ProofPurpose::Invocation {
        return Err(Rejection::MalformedSignature(format!(
            "proof purpose is {}",
            proof.proof_purpose.as_str()
        )));
    }
    let timestamp = |value: &str| {
        parse_timestamp(value)
            .map(to_unix)
            .map_err(|value| Rejection::MalformedSignature(format!("invalid timestamp {value}")))
    };
    let created = timestamp(&proof.created)?;
    let expires = timestamp(&proof.expires)?;

    let key_id = proof.verification_method.as_str();
    let verifier = within(timeout, key_id, options.key_resolver.resolve_verifier(key_id))
        .await?
        .map_err(|e| Rejection::UnknownKey {
            key_id: key_id.to_string(),
            reason: e.to_string(),
        })?;
    let signature = decode_multibase(&proof.proof_value)
        .map_err(|e| Rejection::MalformedSignature(e.to_string()))?;
    let input = invocation_signing_input(invocation, proof)
        .map_err(|e| Rejection::MalformedSignature(e.to_string()))?;
    if !verifier.verify(&input, &signature).await {
        return Err(Rejection::InvalidSignature(format!(
            "proof by {key_id} does not verify"
        )));
    }

    let now = options.now.unwrap_or_else(unix_now);
    ValidityWindow::new(created, expires).check(now, config.max_clock_skew)?;

    let target = proof.invocation_target.clone();
    if target != invocation.invocation_target
        || !options.expected_target.iter().any(|expected| *expected == target)
    {
        return Err(Rejection::TargetMismatch {
            expected: options.expected_target.join(" | "),
            actual: target,
        });
    }
    if let Some(expected) = &options.expected_action {
        if *expected != proof.capability_action {
            return Err(Rejection::ActionMismatch {
                expected: expected.clone(),
                actual: proof.capability_action.clone(),
            });
        }
    }

    let roots = resolve_roots(
        options.root_resolver,
        &options.expected_root_capability,
        &target,
        timeout,
    )
    .await?;

    let walker = ChainWalker {
        key_resolver: options.key_resolver,
        document_loader: options.document_loader,
        roots: &roots,
        now,
        config,
    };
    let invoked: Capability = walker
        .invoked(&InvokedCapability::Id(proof.capability.clone()))
        .await?;
    check_invoked(&invoked, key_id, &proof.capability_action, &target, config)?;
    let chain = walker.walk(invoked.clone()).await?;
    check_chain_action(&chain, &proof.capability_action)?;
    let root = walker.terminal_root(&chain)?;

    let invoker = did_for_did_uri(key_id).map_err(|e| Rejection::UnknownKey {
        key_id: key_id.to_string(),
        reason: e.to_string(),
    })?;
    Ok(VerifiedInvocation {
        key_id: key_id.to_string(),
        invoker,
        action: proof.capability_action.clone(),
        target,
        capability: invoked,
        chain: chain.into_iter().map(|capability| capability.id).collect(),
        root,
        created,
        expires,
    })
}
