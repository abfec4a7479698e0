//! Delegation chains: attenuation, length limits, cycles and collaborator
//! failures, verified end to end with Ed25519 `did:key` credentials.

mod common;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use common::{ITEMS, NOW, Server, at, delegation, invocation, sign, signer};
use dzcap::{
    AttenuationError, Capability, DocumentError, IdentityError, KeyResolver, ParentCapability,
    Rejection, RootCapability, RootZcapResolver, Verifier, VerifierConfig, VerifyOptions,
    delegate, derive_root_capability_id, verify_capability_invocation, verify_delegation,
};
use dzcap_credentials::{DidKeyResolver, Ed25519Signer};
use http::Method;
use pretty_assertions::assert_eq;
use testresult::TestResult;

/// Delegates `length` times from the owner, returning the chain
/// root-first and the final holder.
async fn chain_of(server: &Server, length: u8) -> (Vec<Capability>, Ed25519Signer) {
    let mut capabilities = Vec::new();
    let mut parent = server.root(ITEMS);
    let mut holder = server.owner.clone();
    for seed in 0..length {
        let next = signer(10 + seed);
        let capability = delegation(&holder, &parent, &next, &["GET"], NOW + 3600).await;
        capabilities.push(capability.clone());
        parent = capability;
        holder = next;
    }
    (capabilities, holder)
}

#[test_log::test(tokio::test)]
async fn delegation_proofs_verify_against_the_parent() -> TestResult {
    let server = Server::new();
    let alice = signer(2);
    let root = server.root(ITEMS);
    let capability = delegation(&server.owner, &root, &alice, &["GET"], NOW + 3600).await;

    verify_delegation(&capability, &root, &DidKeyResolver).await?;

    let mut widened = capability.clone();
    widened.allowed_action = Some(vec!["GET".into(), "DELETE".into()]);
    assert!(matches!(
        verify_delegation(&widened, &root, &DidKeyResolver).await,
        Err(Rejection::InvalidDelegation { .. })
    ));

    let mut unsigned = capability;
    unsigned.proof = None;
    assert!(matches!(
        verify_delegation(&unsigned, &root, &DidKeyResolver).await,
        Err(Rejection::InvalidDelegation { .. })
    ));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn two_hop_chain_is_accepted() -> TestResult {
    let server = Server::new();
    let (capabilities, bob) = chain_of(&server, 2).await;
    let server = server.storing(&[&capabilities[0]]);

    let request = sign(ITEMS, invocation(Method::GET, &bob).capability(capabilities[1].clone())).await;
    let verified = verify_capability_invocation(&request, &server.options(ITEMS)).await?;

    assert_eq!(
        verified.chain,
        vec![
            capabilities[1].id.clone(),
            capabilities[0].id.clone(),
            derive_root_capability_id(ITEMS),
        ]
    );
    assert_eq!(verified.root, RootCapability::new(ITEMS, server.owner.to_string()));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn embedded_parents_need_no_loader() -> TestResult {
    let server = Server::new();
    let alice = signer(2);
    let bob = signer(3);
    let parent = delegation(&server.owner, &server.root(ITEMS), &alice, &["GET"], NOW + 3600).await;

    let mut child = Capability::child_of(&parent, bob.to_string(), at(NOW + 3600))
        .with_allowed_action(["GET"]);
    child = delegate(&alice, child, Some(at(NOW))).await?;
    child.parent_capability = Some(ParentCapability::Embedded(Box::new(parent)));

    let request = sign(ITEMS, invocation(Method::GET, &bob).capability(child)).await;
    verify_capability_invocation(&request, &server.options(ITEMS)).await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn chain_length_is_limited() -> TestResult {
    let server = Server::new();
    let (capabilities, holder) = chain_of(&server, 4).await;
    let stored: Vec<&Capability> = capabilities.iter().collect();
    let server = server.storing(&stored);
    let limited = VerifierConfig::default().with_max_chain_length(3);

    let (last, _) = capabilities.split_last().expect("four capabilities");
    let request = sign(ITEMS, invocation(Method::GET, &holder).capability(last.clone())).await;
    let rejection = verify_capability_invocation(&request, &server.options(ITEMS).config(limited.clone()))
        .await
        .unwrap_err();
    assert_eq!(rejection, Rejection::ChainTooLong { max: 3 });
    assert_eq!(rejection.status_code(), 403);

    let third_holder = signer(12);
    let request = sign(
        ITEMS,
        invocation(Method::GET, &third_holder).capability(capabilities[2].clone()),
    )
    .await;
    verify_capability_invocation(&request, &server.options(ITEMS).config(limited)).await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn delegations_cannot_widen_actions() {
    let server = Server::new();
    let alice = signer(2);
    let bob = signer(3);
    let parent = delegation(&server.owner, &server.root(ITEMS), &alice, &["GET"], NOW + 3600).await;
    let child = delegation(&alice, &parent, &bob, &["GET", "DELETE"], NOW + 3600).await;
    let server = server.storing(&[&parent]);

    let request = sign(ITEMS, invocation(Method::GET, &bob).capability(child.clone())).await;
    assert_eq!(
        verify_capability_invocation(&request, &server.options(ITEMS)).await,
        Err(Rejection::AttenuationViolation {
            capability: child.id,
            reason: AttenuationError::ActionNotAllowed {
                action: "DELETE".into()
            },
        })
    );
}

#[test_log::test(tokio::test)]
async fn delegations_cannot_outlive_their_parent() {
    let server = Server::new();
    let alice = signer(2);
    let bob = signer(3);
    let parent = delegation(&server.owner, &server.root(ITEMS), &alice, &["GET"], NOW + 3600).await;
    let child = delegation(&alice, &parent, &bob, &["GET"], NOW + 7200).await;
    let server = server.storing(&[&parent]);

    let request = sign(ITEMS, invocation(Method::GET, &bob).capability(child)).await;
    assert!(matches!(
        verify_capability_invocation(&request, &server.options(ITEMS)).await,
        Err(Rejection::AttenuationViolation {
            reason: AttenuationError::ExpiresAfterParent { .. },
            ..
        })
    ));
}

#[test_log::test(tokio::test)]
async fn unrestricted_children_inherit_parent_actions() -> TestResult {
    let server = Server::new();
    let alice = signer(2);
    let bob = signer(3);
    let parent = delegation(&server.owner, &server.root(ITEMS), &alice, &["GET"], NOW + 3600).await;
    let child = delegate(
        &alice,
        Capability::child_of(&parent, bob.to_string(), at(NOW + 3600)),
        Some(at(NOW)),
    )
    .await?;
    let server = server.storing(&[&parent]);

    let read = sign(ITEMS, invocation(Method::GET, &bob).capability(child.clone())).await;
    verify_capability_invocation(&read, &server.options(ITEMS)).await?;

    let delete = sign(ITEMS, invocation(Method::DELETE, &bob).capability(child)).await;
    assert!(matches!(
        verify_capability_invocation(&delete, &server.options(ITEMS)).await,
        Err(Rejection::ActionMismatch { .. })
    ));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn narrowed_targets_need_target_attenuation() -> TestResult {
    let server = Server::new();
    let alice = signer(2);
    let bob = signer(3);
    let item = "https://example.com/items/42";
    let parent = delegation(&server.owner, &server.root(ITEMS), &alice, &["GET"], NOW + 3600).await;
    let child = delegate(
        &alice,
        Capability::child_of(&parent, bob.to_string(), at(NOW + 3600))
            .with_allowed_action(["GET"])
            .with_invocation_target(item),
        Some(at(NOW)),
    )
    .await?;
    let server = server.storing(&[&parent]);

    let request = sign(item, invocation(Method::GET, &bob).capability(child)).await;
    let options = server
        .options(item)
        .expected_root_capability(derive_root_capability_id(ITEMS));

    assert!(matches!(
        verify_capability_invocation(&request, &options).await,
        Err(Rejection::AttenuationViolation {
            reason: AttenuationError::TargetNotEqual { .. },
            ..
        })
    ));
    verify_capability_invocation(
        &request,
        &options.config(VerifierConfig::default().with_target_attenuation(true)),
    )
    .await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn chains_may_end_at_any_trusted_root() -> TestResult {
    let server = Server::new();
    let alice = signer(2);
    let archive = derive_root_capability_id("https://example.com/archive");
    let capability = delegation(&server.owner, &server.root(ITEMS), &alice, &["GET"], NOW + 3600).await;
    let request = sign(ITEMS, invocation(Method::GET, &alice).capability(capability.clone())).await;

    let archive_only = server.options(ITEMS).expected_root_capability(archive.clone());
    assert!(matches!(
        verify_capability_invocation(&request, &archive_only).await,
        Err(Rejection::UnknownRoot { .. })
    ));

    let either = archive_only.or_root_capability(derive_root_capability_id(ITEMS));
    let verified = verify_capability_invocation(&request, &either).await?;
    assert_eq!(verified.root, RootCapability::new(ITEMS, server.owner.to_string()));
    assert_eq!(verified.chain, vec![capability.id, derive_root_capability_id(ITEMS)]);

    let direct = sign(ITEMS, invocation(Method::GET, &server.owner)).await;
    let verified = verify_capability_invocation(&direct, &either).await?;
    assert_eq!(verified.chain, vec![derive_root_capability_id(ITEMS)]);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn delegation_cycles_are_broken_chains() -> TestResult {
    let server = Server::new();
    let alice = signer(2);
    let root = server.root(ITEMS);

    let mut first = Capability::child_of(&root, alice.to_string(), at(NOW + 3600));
    let mut second = Capability::child_of(&root, alice.to_string(), at(NOW + 3600));
    first.parent_capability = Some(ParentCapability::Id(second.id.clone()));
    second.parent_capability = Some(ParentCapability::Id(first.id.clone()));
    let first = delegate(&alice, first, Some(at(NOW))).await?;
    let second = delegate(&alice, second, Some(at(NOW))).await?;
    let server = server.storing(&[&first, &second]);

    let request = sign(ITEMS, invocation(Method::GET, &alice).capability(first)).await;
    assert!(matches!(
        verify_capability_invocation(&request, &server.options(ITEMS)).await,
        Err(Rejection::BrokenChain { .. })
    ));
    Ok(())
}

struct SlowKeys(Duration);

#[async_trait]
impl KeyResolver for SlowKeys {
    async fn resolve_verifier(&self, key_id: &str) -> Result<Arc<dyn Verifier>, IdentityError> {
        tokio::time::sleep(self.0).await;
        DidKeyResolver.resolve_verifier(key_id).await
    }
}

struct FailingRoots;

#[async_trait]
impl RootZcapResolver for FailingRoots {
    async fn resolve_root_zcap(&self, id: &str) -> Result<RootCapability, DocumentError> {
        Err(DocumentError::Other {
            uri: id.to_string(),
            reason: "registry unavailable".into(),
        })
    }
}

#[test_log::test(tokio::test)]
async fn slow_collaborators_time_out() -> TestResult {
    let server = Server::new();
    let request = sign(ITEMS, invocation(Method::GET, &server.owner)).await;
    let slow = SlowKeys(Duration::from_millis(500));
    let config = VerifierConfig::default().with_resolution_timeout(Some(Duration::from_millis(20)));

    let options = VerifyOptions::new(&slow, &server.loader, &server.roots, ITEMS)
        .at(NOW)
        .config(config);
    let rejection = verify_capability_invocation(&request, &options)
        .await
        .unwrap_err();
    assert_eq!(
        rejection,
        Rejection::ResolutionTimeout {
            uri: server.owner.verification_method_id().to_string()
        }
    );
    assert_eq!(rejection.status_code(), 504);

    let quick = SlowKeys(Duration::from_millis(1));
    let options = VerifyOptions::new(&quick, &server.loader, &server.roots, ITEMS)
        .at(NOW)
        .config(VerifierConfig::default().with_resolution_timeout(Some(Duration::from_secs(5))));
    verify_capability_invocation(&request, &options).await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn failing_root_resolution_is_a_bad_gateway() {
    let server = Server::new();
    let request = sign(ITEMS, invocation(Method::GET, &server.owner)).await;

    let roots = FailingRoots;
    let options = VerifyOptions::new(&server.keys, &server.loader, &roots, ITEMS).at(NOW);
    let rejection = verify_capability_invocation(&request, &options)
        .await
        .unwrap_err();
    assert!(matches!(rejection, Rejection::ResolutionFailed { .. }));
    assert_eq!(rejection.status_code(), 502);
}
