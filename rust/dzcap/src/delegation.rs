//! Capability delegation.
//!
//! [`delegate`] signs a capability on behalf of its parent's controller;
//! [`verify_delegation`] checks such a proof against the parent.

use chrono::{DateTime, Utc};

use crate::{
    capability::{Capability, format_timestamp},
    did::{Did, did_for_did_uri},
    error::{Rejection, SigningError},
    identity::{KeyResolver, Signer},
    proof::{
        DelegationProof, ED25519_SIGNATURE_2020, ProofPurpose, decode_multibase, encode_multibase,
        signing_input,
    },
};

/// Sign `capability` as a delegation from its parent.
///
/// An embedded `parentCapability` is reduced to its id before signing, and
/// any existing proof is replaced. `created` is `date`, or now.
///
/// # Errors
///
/// Returns [`SigningError`] when the signer has no id, the capability lacks a
/// parent or an expiry, its `@context` does not start with the ZCAP context,
/// or the signer fails.
pub async fn delegate<S>(
    signer: &S,
    capability: Capability,
    date: Option<DateTime<Utc>>,
) -> Result<Capability, SigningError>
where
    S: Signer + ?Sized,
{
    let verification_method = signer.id().ok_or(SigningError::MissingSignerId)?;

    let mut capability = capability.unsigned();
    if capability.parent_capability.is_none() {
        return Err(SigningError::MissingParent(capability.id));
    }
    match capability.expires_at() {
        Ok(Some(_)) => {}
        Ok(None) | Err(_) => return Err(SigningError::MissingExpires(capability.id)),
    }
    if !capability.has_zcap_context() {
        return Err(SigningError::InvalidContext(capability.id));
    }

    let mut proof = DelegationProof {
        proof_type: ED25519_SIGNATURE_2020.to_string(),
        created: format_timestamp(date.unwrap_or_else(Utc::now)),
        verification_method: verification_method.to_string(),
        proof_purpose: ProofPurpose::Delegation,
        proof_value: String::new(),
    };

    let input = delegation_signing_input(&capability, &proof)
        .map_err(|e| SigningError::Canonicalization(e.to_string()))?;
    let signature = signer.sign(&input).await?;
    proof.proof_value = encode_multibase(&signature);

    tracing::debug!(
        capability = %capability.id,
        parent = ?capability.parent_id(),
        signer = %proof.verification_method,
        "signed delegation"
    );
    capability.proof = Some(proof);
    Ok(capability)
}

fn delegation_signing_input(
    capability: &Capability,
    proof: &DelegationProof,
) -> Result<Vec<u8>, serde_json::Error> {
    let document = serde_json::to_value(capability.unsigned())?;
    let proof = serde_json::to_value(proof)?;
    Ok(signing_input(&document, &proof))
}

fn same_controller(signer: &Did, controller: &str) -> bool {
    did_for_did_uri(controller).is_ok_and(|controller| &controller == signer)
}

/// Verify the delegation proof of `capability` against its `parent`.
///
/// The proof must have the delegation purpose, be made by a key of the
/// parent's controller, and verify over the capability's signing input.
///
/// # Errors
///
/// [`Rejection::InvalidDelegation`] for a missing, mis-purposed or bad proof;
/// [`Rejection::ControllerMismatch`] when someone other than the parent's
/// controller signed.
pub async fn verify_delegation<R>(
    capability: &Capability,
    parent: &Capability,
    key_resolver: &R,
) -> Result<(), Rejection>
where
    R: KeyResolver + ?Sized,
{
    let invalid = |reason: String| Rejection::InvalidDelegation {
        capability: capability.id.clone(),
        reason,
    };

    let proof = capability
        .proof
        .as_ref()
        .ok_or_else(|| invalid("missing proof".to_string()))?;
    if proof.proof_purpose != ProofPurpose::Delegation {
        return Err(invalid(format!(
            "proof purpose is {}",
            proof.proof_purpose.as_str()
        )));
    }

    let signer = did_for_did_uri(&proof.verification_method)
        .map_err(|e| invalid(e.to_string()))?;
    if !same_controller(&signer, &parent.controller) {
        return Err(Rejection::ControllerMismatch {
            expected: parent.controller.clone(),
            actual: signer.to_string(),
        });
    }

    let verifier = key_resolver
        .resolve_verifier(&proof.verification_method)
        .await
        .map_err(|e| invalid(e.to_string()))?;
    let signature = decode_multibase(&proof.proof_value).map_err(|e| invalid(e.to_string()))?;
    let unsigned_proof = DelegationProof {
        proof_value: String::new(),
        ..proof.clone()
    };
    let input = delegation_signing_input(capability, &unsigned_proof)
        .map_err(|e| invalid(e.to_string()))?;

    if !verifier.verify(&input, &signature).await {
        tracing::debug!(capability = %capability.id, "delegation signature does not verify");
        return Err(invalid("signature does not verify".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IdentityError, SignError, Verifier};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Arc;

    const ALICE: &str = "did:example:alice";
    const BOB: &str = "did:example:bob";

    /// A toy signature: the input prefixed with the signer's DID.
    struct Toy(String);

    #[async_trait]
    impl Signer for Toy {
        fn id(&self) -> Option<&str> {
            Some(&self.0)
        }

        async fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SignError> {
            let did = self.0.split('#').next().unwrap_or_default();
            Ok([did.as_bytes(), data].concat())
        }
    }

    struct ToyVerifier(String);

    #[async_trait]
    impl Verifier for ToyVerifier {
        async fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
            signature == [self.0.as_bytes(), data].concat()
        }
    }

    struct ToyResolver;

    #[async_trait]
    impl KeyResolver for ToyResolver {
        async fn resolve_verifier(
            &self,
            key_id: &str,
        ) -> Result<Arc<dyn Verifier>, IdentityError> {
            let did = key_id.split('#').next().unwrap_or_default();
            Ok(Arc::new(ToyVerifier(did.to_string())))
        }
    }

    fn expiry() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn it_signs_and_verifies_a_delegation() {
        let root = Capability::root("https://example.com/a", ALICE);
        let child = Capability::child_of(&root, BOB, expiry()).with_allowed_action(["read"]);
        let signed = delegate(&Toy(format!("{ALICE}#key-1")), child, None)
            .await
            .unwrap();

        let proof = signed.proof.as_ref().unwrap();
        assert_eq!(proof.proof_purpose, ProofPurpose::Delegation);
        assert!(proof.proof_value.starts_with('z'));
        assert_eq!(verify_delegation(&signed, &root, &ToyResolver).await, Ok(()));
    }

    #[tokio::test]
    async fn it_detects_tampering() {
        let root = Capability::root("https://example.com/a", ALICE);
        let child = Capability::child_of(&root, BOB, expiry());
        let mut signed = delegate(&Toy(format!("{ALICE}#key-1")), child, None)
            .await
            .unwrap();
        signed.allowed_action = Some(vec!["write".into()]);

        assert!(matches!(
            verify_delegation(&signed, &root, &ToyResolver).await,
            Err(Rejection::InvalidDelegation { .. })
        ));
    }

    #[tokio::test]
    async fn it_requires_the_parent_controller_to_sign() {
        let root = Capability::root("https://example.com/a", ALICE);
        let child = Capability::child_of(&root, BOB, expiry());
        let signed = delegate(&Toy(format!("{BOB}#key-1")), child, None)
            .await
            .unwrap();

        assert_eq!(
            verify_delegation(&signed, &root, &ToyResolver).await,
            Err(Rejection::ControllerMismatch {
                expected: ALICE.into(),
                actual: BOB.into(),
            })
        );
    }

    #[tokio::test]
    async fn it_reduces_embedded_parents_before_signing() {
        let root = Capability::root("https://example.com/a", ALICE);
        let mut child = Capability::child_of(&root, BOB, expiry());
        child.parent_capability = Some(crate::capability::ParentCapability::Embedded(
            Box::new(root.clone()),
        ));
        let signed = delegate(&Toy(format!("{ALICE}#key-1")), child, None)
            .await
            .unwrap();

        assert_eq!(
            signed.parent_capability,
            Some(crate::capability::ParentCapability::Id(root.id.clone()))
        );
        assert_eq!(verify_delegation(&signed, &root, &ToyResolver).await, Ok(()));
    }

    #[tokio::test]
    async fn it_refuses_to_sign_incomplete_capabilities() {
        let signer = Toy(format!("{ALICE}#key-1"));
        let root = Capability::root("https://example.com/a", ALICE);

        assert!(matches!(
            delegate(&signer, root.clone(), None).await,
            Err(SigningError::MissingParent(_))
        ));

        let mut unbounded = Capability::child_of(&root, BOB, expiry());
        unbounded.expires = None;
        assert!(matches!(
            delegate(&signer, unbounded, None).await,
            Err(SigningError::MissingExpires(_))
        ));

        let mut no_context = Capability::child_of(&root, BOB, expiry());
        no_context.context.reverse();
        assert!(matches!(
            delegate(&signer, no_context, None).await,
            Err(SigningError::InvalidContext(_))
        ));
    }

    #[tokio::test]
    async fn it_uses_the_given_creation_date() {
        let root = Capability::root("https://example.com/a", ALICE);
        let child = Capability::child_of(&root, BOB, expiry());
        let date = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let signed = delegate(&Toy(format!("{ALICE}#key-1")), child, Some(date))
            .await
            .unwrap();
        assert_eq!(signed.proof.unwrap().created, "2024-05-01T12:00:00Z");
    }
}
