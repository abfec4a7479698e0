//! JSON invocations and the server-side request views.

mod common;

use common::{ITEMS, NOW, Server, at, delegation, invocation, sign, signer, url};
use dzcap::{
    HttpSignatureAuthorization, InvocationConfig, InvocationRequest, InvokedCapability, Rejection,
    SignatureOptions, ZcapInvocationRequest, derive_root_capability_id,
    http_signature::sign_request, json::invoke_capability, time::rfc3339, verify_json_invocation,
};
use dzcap_credentials::{DidKeyResolver, Ed25519Signer};
use http::Method;
use pretty_assertions::assert_eq;
use testresult::TestResult;

#[test_log::test(tokio::test)]
async fn json_invocation_round_trip() -> TestResult {
    let server = Server::new();
    let root = derive_root_capability_id(ITEMS);
    let invocation = invoke_capability(
        &root,
        ITEMS,
        &server.owner,
        "read",
        at(NOW),
        &InvocationConfig::default(),
    )
    .await?;

    let proof = invocation.proof.as_ref().expect("signed invocation");
    assert_eq!(proof.capability, root);
    assert_eq!(proof.expires, "2023-11-14T22:23:20Z");

    let verified =
        verify_json_invocation(&invocation, &server.options(ITEMS).expected_action("read"))
            .await?;
    assert_eq!(verified.action, "read");
    assert_eq!(verified.invoker.to_string(), server.owner.to_string());

    assert!(matches!(
        verify_json_invocation(&invocation, &server.options(ITEMS).expected_action("write")).await,
        Err(Rejection::ActionMismatch { .. })
    ));
    assert!(matches!(
        verify_json_invocation(&invocation, &server.options(ITEMS).at(NOW + 601)).await,
        Err(Rejection::Expired { .. })
    ));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn json_invocation_is_tamper_evident() -> TestResult {
    let server = Server::new();
    let root = derive_root_capability_id(ITEMS);
    let invocation = invoke_capability(
        &root,
        ITEMS,
        &server.owner,
        "read",
        at(NOW),
        &InvocationConfig::default(),
    )
    .await?;

    let mut escalated = invocation.clone();
    if let Some(proof) = escalated.proof.as_mut() {
        proof.capability_action = "write".into();
    }
    assert!(matches!(
        verify_json_invocation(&escalated, &server.options(ITEMS)).await,
        Err(Rejection::InvalidSignature(_))
    ));

    let mut unsigned = invocation;
    unsigned.proof = None;
    assert!(matches!(
        verify_json_invocation(&unsigned, &server.options(ITEMS)).await,
        Err(Rejection::MalformedSignature(_))
    ));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn json_invocation_of_a_stored_delegation() -> TestResult {
    let server = Server::new();
    let alice = signer(2);
    let capability =
        delegation(&server.owner, &server.root(ITEMS), &alice, &["read"], NOW + 3600).await;
    let server = server.storing(&[&capability]);

    let invocation = invoke_capability(
        &capability.id,
        ITEMS,
        &alice,
        "read",
        at(NOW),
        &InvocationConfig::default(),
    )
    .await?;
    let verified = verify_json_invocation(&invocation, &server.options(ITEMS)).await?;
    assert_eq!(verified.chain, vec![capability.id.clone(), derive_root_capability_id(ITEMS)]);

    let invocation = invoke_capability(
        &capability.id,
        ITEMS,
        &alice,
        "write",
        at(NOW),
        &InvocationConfig::default(),
    )
    .await?;
    assert!(matches!(
        verify_json_invocation(&invocation, &server.options(ITEMS)).await,
        Err(Rejection::ActionMismatch { .. })
    ));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn zcap_request_exposes_the_claim_before_verifying() -> TestResult {
    let server = Server::new();
    let alice = signer(2);
    let capability =
        delegation(&server.owner, &server.root(ITEMS), &alice, &["GET"], NOW + 3600).await;
    let request = sign(ITEMS, invocation(Method::GET, &alice).capability(capability.clone())).await;

    let claim = ZcapInvocationRequest::from_request(request.clone())?;
    assert_eq!(claim.invoker()?.to_string(), alice.to_string());
    assert_eq!(claim.action(), "GET");
    assert_eq!(
        claim.capability(),
        &InvokedCapability::Embedded(Box::new(capability))
    );

    let verified = ZcapInvocationRequest::verified(&request, server.options("ignored")).await?;
    assert_eq!(verified.target, ITEMS);

    let mut plain = request;
    plain.url = url("http://example.com/items");
    assert_eq!(
        ZcapInvocationRequest::verified(&plain, server.options(ITEMS)).await,
        Err(Rejection::InsecureTransport {
            url: "http://example.com/items".into()
        })
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn zcap_request_requires_a_did_key_invoker() -> TestResult {
    let server = Server::new();
    let mut request = sign(ITEMS, invocation(Method::GET, &server.owner)).await;
    let authorization = request.headers["authorization"]
        .to_str()?
        .replace(server.owner.verification_method_id(), "did:web:example.com#key-1");
    request
        .headers
        .insert(http::header::AUTHORIZATION, authorization.parse()?);

    let claim = ZcapInvocationRequest::from_request(request)?;
    assert!(matches!(claim.invoker(), Err(Rejection::UnknownKey { .. })));
    Ok(())
}

/// Replace the `authorization` header of `request` with a signature by
/// `signer` over `parameters` in the window `created..=expires`.
async fn resign(
    request: &mut InvocationRequest,
    signer: &Ed25519Signer,
    parameters: &[&str],
    created: u64,
    expires: u64,
) -> TestResult {
    let signature = sign_request(
        signer,
        &request.method,
        &request.url,
        &request.headers,
        parameters.iter().map(|parameter| parameter.to_string()).collect(),
        created,
        expires,
    )
    .await?;
    request
        .headers
        .insert(http::header::AUTHORIZATION, signature.to_header_value().parse()?);
    Ok(())
}

const PLAIN_PARAMETERS: [&str; 5] = ["(key-id)", "(created)", "(expires)", "(request-target)", "host"];

#[test_log::test(tokio::test)]
async fn plain_http_signatures_authenticate_the_key() -> TestResult {
    let server = Server::new();
    let request = sign(ITEMS, invocation(Method::GET, &server.owner)).await;
    let options = SignatureOptions::new(&DidKeyResolver).at(NOW);

    let authorization = HttpSignatureAuthorization::verified(&request, &options).await?;
    assert_eq!(authorization.key_id, server.owner.verification_method_id());
    assert_eq!(authorization.created, NOW);
    assert_eq!(authorization.expires, NOW + 600);
    assert!(authorization.parameters.contains(&"capability-invocation".to_string()));

    let mut moved = request;
    moved.method = Method::POST;
    assert!(matches!(
        HttpSignatureAuthorization::verified(&moved, &options).await,
        Err(Rejection::InvalidSignature(_))
    ));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn plain_http_signatures_must_cover_the_request_line_and_host() -> TestResult {
    let server = Server::new();
    let mut request = sign(ITEMS, invocation(Method::GET, &server.owner)).await;
    resign(&mut request, &server.owner, &["(key-id)"], 10, 20).await?;

    request.method = Method::DELETE;
    request.url = url("https://evil.example/anything");
    request.body = Some(b"payload".to_vec());
    let options = SignatureOptions::new(&DidKeyResolver).at(NOW);
    assert_eq!(
        HttpSignatureAuthorization::verified(&request, &options).await,
        Err(Rejection::MalformedSignature("(created) is not signed".into()))
    );

    let mut request = sign(ITEMS, invocation(Method::GET, &server.owner)).await;
    resign(&mut request, &server.owner, &["(key-id)", "(created)", "(expires)", "host"], NOW, NOW + 600)
        .await?;
    assert_eq!(
        HttpSignatureAuthorization::verified(&request, &options).await,
        Err(Rejection::MalformedSignature("(request-target) is not signed".into()))
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn plain_http_signatures_are_bounded_in_time() -> TestResult {
    let server = Server::new();
    let options = SignatureOptions::new(&DidKeyResolver).at(NOW);
    let mut request = sign(ITEMS, invocation(Method::GET, &server.owner)).await;

    resign(&mut request, &server.owner, &PLAIN_PARAMETERS, NOW - 1200, NOW - 600).await?;
    assert_eq!(
        HttpSignatureAuthorization::verified(&request, &options).await,
        Err(Rejection::Expired {
            subject: "invocation".into(),
            expires: rfc3339(NOW - 600),
        })
    );

    resign(&mut request, &server.owner, &PLAIN_PARAMETERS, NOW + 301, NOW + 900).await?;
    assert!(matches!(
        HttpSignatureAuthorization::verified(&request, &options).await,
        Err(Rejection::NotYetValid { .. })
    ));
    HttpSignatureAuthorization::verified(&request, &options.max_clock_skew(301)).await?;

    resign(&mut request, &server.owner, &PLAIN_PARAMETERS, NOW, NOW).await?;
    let authorization = HttpSignatureAuthorization::verified(&request, &options).await?;
    assert_eq!(authorization.parameters, PLAIN_PARAMETERS.map(String::from).to_vec());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn requests_survive_the_http_round_trip() -> TestResult {
    let server = Server::new();
    let request = sign(
        ITEMS,
        invocation(Method::PUT, &server.owner).body(dzcap::Body::typed(b"payload".to_vec(), "text/plain")),
    )
    .await;

    let http_request = request.clone().into_http()?;
    assert_eq!(http_request.headers()["content-type"], "text/plain");

    let mut relative = http::Request::builder()
        .method(Method::PUT)
        .uri("/items")
        .body(http_request.body().clone())?;
    *relative.headers_mut() = http_request.headers().clone();

    let received = InvocationRequest::from_http(relative)?;
    assert_eq!(received.url, request.url);
    dzcap::verify_capability_invocation(&received, &server.options(ITEMS)).await?;
    Ok(())
}
