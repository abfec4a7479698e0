//! Capability invocation verification.
//!
//! A [`Verification`] moves a signed request through a fixed sequence of
//! states, short-circuiting into [`VerificationState::Rejected`] at the first
//! failed check:
//!
//! ```text
//! Start → HeadersExtracted → SignatureParsed → KeyResolved → SignatureVerified
//!       → TemporalValid → TargetMatched → RootResolved → ChainAttenuated → Accepted
//! ```
//!
//! Every collaborator call (key, root and document resolution) runs under
//! the configured timeout. Nothing is retried and nothing is cached.

use std::sync::Arc;

use http::HeaderMap;
use url::Url;

use crate::{
    capability::{Capability, RootCapability},
    chain::{ChainWalker, check_chain_action, check_invoked, resolve_roots, within},
    config::VerifierConfig,
    did::{Did, did_for_did_uri},
    document::DocumentLoader,
    error::Rejection,
    http_signature::{
        AUTHORIZATION, CAPABILITY_INVOCATION, CONTENT_TYPE, CREATED, DIGEST, EXPIRES, HOST,
        KEY_ID, REQUEST_TARGET, SignatureHeader, SigningStringError, digest_matches,
    },
    identity::{KeyResolver, Verifier},
    invocation::{CapabilityInvocationHeader, InvocationRequest},
    root::RootZcapResolver,
    time::{ValidityWindow, unix_now},
};

/// Where a verification currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationState {
    /// Nothing checked yet.
    Start,
    /// Both signature headers are present.
    HeadersExtracted,
    /// Both signature headers parse and cover what they must.
    SignatureParsed,
    /// The `keyId` resolved to a verifier.
    KeyResolved,
    /// The request signature (and body digest) verified.
    SignatureVerified,
    /// The signature window contains now.
    TemporalValid,
    /// Target and action are the expected ones.
    TargetMatched,
    /// The trusted root resolved.
    RootResolved,
    /// The delegation chain verified down to the root.
    ChainAttenuated,
    /// The invocation is authorized.
    Accepted,
    /// A check failed.
    Rejected(Rejection),
}

/// What a verifier trusts and expects.
#[derive(Clone)]
pub struct VerifyOptions<'a> {
    /// Resolves invocation and delegation `keyId`s.
    pub key_resolver: &'a dyn KeyResolver,
    /// Loads delegated capabilities referenced by id.
    pub document_loader: &'a DocumentLoader,
    /// Resolves the trusted root capability.
    pub root_resolver: &'a dyn RootZcapResolver,
    /// Host to build the invoked URL with instead of the `host` header.
    pub expected_host: Option<String>,
    /// Acceptable invocation targets.
    pub expected_target: Vec<String>,
    /// Expected action; defaults to the request method.
    pub expected_action: Option<String>,
    /// Trusted root ids; the chain may end at any of them. Empty means the
    /// root of the matched target.
    pub expected_root_capability: Vec<String>,
    /// Verification time in unix seconds; defaults to now.
    pub now: Option<u64>,
    /// Limits.
    pub config: VerifierConfig,
}

impl<'a> VerifyOptions<'a> {
    /// Options expecting `expected_target`, with default limits.
    pub fn new(
        key_resolver: &'a dyn KeyResolver,
        document_loader: &'a DocumentLoader,
        root_resolver: &'a dyn RootZcapResolver,
        expected_target: impl Into<String>,
    ) -> Self {
        Self {
            key_resolver,
            document_loader,
            root_resolver,
            expected_host: None,
            expected_target: vec![expected_target.into()],
            expected_action: None,
            expected_root_capability: Vec::new(),
            now: None,
            config: VerifierConfig::default(),
        }
    }

    /// Also accept `target`.
    #[must_use]
    pub fn or_target(mut self, target: impl Into<String>) -> Self {
        self.expected_target.push(target.into());
        self
    }

    /// Set [`VerifyOptions::expected_host`].
    #[must_use]
    pub fn expected_host(mut self, host: impl Into<String>) -> Self {
        self.expected_host = Some(host.into());
        self
    }

    /// Set [`VerifyOptions::expected_action`].
    #[must_use]
    pub fn expected_action(mut self, action: impl Into<String>) -> Self {
        self.expected_action = Some(action.into());
        self
    }

    /// Trust only the root `id`.
    #[must_use]
    pub fn expected_root_capability(mut self, id: impl Into<String>) -> Self {
        self.expected_root_capability = vec![id.into()];
        self
    }

    /// Also trust the root `id`.
    #[must_use]
    pub fn or_root_capability(mut self, id: impl Into<String>) -> Self {
        self.expected_root_capability.push(id.into());
        self
    }

    /// Verify as of `now` (unix seconds).
    #[must_use]
    pub fn at(mut self, now: u64) -> Self {
        self.now = Some(now);
        self
    }

    /// Use `config`.
    #[must_use]
    pub fn config(mut self, config: VerifierConfig) -> Self {
        self.config = config;
        self
    }
}

/// An authorized invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedInvocation {
    /// The authenticated signing key.
    pub key_id: String,
    /// The invoker: the DID controlling `key_id`.
    pub invoker: Did,
    /// The invoked action.
    pub action: String,
    /// The matched target.
    pub target: String,
    /// The invoked capability.
    pub capability: Capability,
    /// Capability ids from the invoked capability up to the root.
    pub chain: Vec<String>,
    /// The trusted root.
    pub root: RootCapability,
    /// Signature creation, unix seconds.
    pub created: u64,
    /// Signature expiry, unix seconds.
    pub expires: u64,
}

/// One run of the verifier over one request.
pub struct Verification<'r, 'o> {
    request: &'r InvocationRequest,
    options: &'r VerifyOptions<'o>,
    state: VerificationState,
}

impl<'r, 'o> Verification<'r, 'o> {
    /// A verification of `request`, in [`VerificationState::Start`].
    pub fn new(request: &'r InvocationRequest, options: &'r VerifyOptions<'o>) -> Self {
        Self {
            request,
            options,
            state: VerificationState::Start,
        }
    }

    /// The current state.
    pub fn state(&self) -> &VerificationState {
        &self.state
    }

    fn advance(&mut self, next: VerificationState) {
        tracing::trace!(from = ?self.state, to = ?next, "verification state");
        self.state = next;
    }

    /// Run every check, leaving the verification in `Accepted` or
    /// `Rejected`.
    ///
    /// # Errors
    ///
    /// The [`Rejection`] of the first failed check.
    pub async fn run(&mut self) -> Result<VerifiedInvocation, Rejection> {
        match self.checks().await {
            Ok(verified) => {
                self.advance(VerificationState::Accepted);
                tracing::debug!(
                    key_id = %verified.key_id,
                    action = %verified.action,
                    target = %verified.target,
                    "accepted capability invocation"
                );
                Ok(verified)
            }
            Err(rejection) => {
                tracing::debug!(
                    state = ?self.state,
                    code = ?rejection.code(),
                    %rejection,
                    "rejected capability invocation"
                );
                self.advance(VerificationState::Rejected(rejection.clone()));
                Err(rejection)
            }
        }
    }

    async fn checks(&mut self) -> Result<VerifiedInvocation, Rejection> {
        let options = self.options;
        let request = self.request;
        let config = &options.config;
        let timeout = config.resolution_timeout();

        let (authorization, invocation) = extract_headers(&request.headers)?;
        self.advance(VerificationState::HeadersExtracted);

        let signature = SignatureHeader::parse(authorization)
            .map_err(|e| Rejection::MalformedSignature(e.to_string()))?;
        let invocation = CapabilityInvocationHeader::parse(invocation)
            .map_err(|e| Rejection::MalformedSignature(e.to_string()))?;
        let (created, expires) = check_coverage(&signature, request)?;
        self.advance(VerificationState::SignatureParsed);

        let key_id = signature.key_id.as_str();
        let verifier = within(timeout, key_id, options.key_resolver.resolve_verifier(key_id))
            .await?
            .map_err(|e| Rejection::UnknownKey {
                key_id: key_id.to_string(),
                reason: e.to_string(),
            })?;
        self.advance(VerificationState::KeyResolved);

        verify_signature(&signature, request, verifier).await?;
        self.advance(VerificationState::SignatureVerified);

        let now = options.now.unwrap_or_else(unix_now);
        ValidityWindow::new(created, expires).check(now, config.max_clock_skew)?;
        self.advance(VerificationState::TemporalValid);

        let target = match_target(request, options)?;
        let expected_action = options
            .expected_action
            .clone()
            .unwrap_or_else(|| request.method.as_str().to_string());
        if invocation.action != expected_action {
            return Err(Rejection::ActionMismatch {
                expected: expected_action,
                actual: invocation.action,
            });
        }
        self.advance(VerificationState::TargetMatched);

        let roots = resolve_roots(
            options.root_resolver,
            &options.expected_root_capability,
            &target,
            timeout,
        )
        .await?;
        self.advance(VerificationState::RootResolved);

        let walker = ChainWalker {
            key_resolver: options.key_resolver,
            document_loader: options.document_loader,
            roots: &roots,
            now,
            config,
        };
        let invoked = walker.invoked(&invocation.capability).await?;
        check_invoked(&invoked, key_id, &invocation.action, &target, config)?;
        let chain = walker.walk(invoked.clone()).await?;
        check_chain_action(&chain, &invocation.action)?;
        let root = walker.terminal_root(&chain)?;
        self.advance(VerificationState::ChainAttenuated);

        let invoker = did_for_did_uri(key_id).map_err(|e| Rejection::UnknownKey {
            key_id: key_id.to_string(),
            reason: e.to_string(),
        })?;
        Ok(VerifiedInvocation {
            key_id: key_id.to_string(),
            invoker,
            action: invocation.action,
            target,
            capability: invoked,
            chain: chain.into_iter().map(|capability| capability.id).collect(),
            root,
            created,
            expires,
        })
    }
}

/// Verify a capability invocation request.
///
/// # Errors
///
/// The [`Rejection`] of the first failed check.
pub async fn verify_capability_invocation(
    request: &InvocationRequest,
    options: &VerifyOptions<'_>,
) -> Result<VerifiedInvocation, Rejection> {
    Verification::new(request, options).run().await
}

pub(crate) fn header<'h>(headers: &'h HeaderMap, name: &str) -> Result<&'h str, Rejection> {
    headers
        .get(name)
        .ok_or_else(|| Rejection::MissingHeader {
            name: name.to_string(),
        })?
        .to_str()
        .map_err(|_| Rejection::MalformedSignature(format!("{name} header is not text")))
}

fn extract_headers(headers: &HeaderMap) -> Result<(&str, &str), Rejection> {
    Ok((
        header(headers, AUTHORIZATION)?,
        header(headers, CAPABILITY_INVOCATION)?,
    ))
}

/// The signature must cover the request line, the host, the invocation and
/// its own window, and a body through its digest.
fn check_coverage(
    signature: &SignatureHeader,
    request: &InvocationRequest,
) -> Result<(u64, u64), Rejection> {
    let mut required = vec![KEY_ID, CREATED, EXPIRES, REQUEST_TARGET, HOST, CAPABILITY_INVOCATION];
    if request.body_bytes().is_some() {
        required.push(DIGEST);
        if request.headers.contains_key(CONTENT_TYPE) {
            required.push(CONTENT_TYPE);
        }
    }
    if let Some(missing) = required.iter().find(|name| !signature.covers(name)) {
        return Err(Rejection::MalformedSignature(format!(
            "{missing} is not signed"
        )));
    }

    match (signature.created, signature.expires) {
        (Some(created), Some(expires)) => Ok((created, expires)),
        _ => Err(Rejection::MalformedSignature(
            "signature must carry created and expires".to_string(),
        )),
    }
}

/// The request URL as the client addressed it; TLS may have been terminated
/// in front of us.
fn https_url(url: &Url) -> Url {
    let mut url = url.clone();
    if url.scheme() != "https" {
        let _ = url.set_scheme("https");
    }
    url
}

async fn verify_signature(
    signature: &SignatureHeader,
    request: &InvocationRequest,
    verifier: Arc<dyn Verifier>,
) -> Result<(), Rejection> {
    let url = https_url(&request.url);
    let plaintext = signature
        .signing_string(&request.method, &url, &request.headers)
        .map_err(|e| match e {
            SigningStringError::MissingHeader(name) => Rejection::MissingHeader { name },
            other => Rejection::InvalidSignature(other.to_string()),
        })?;

    if !verifier.verify(plaintext.as_bytes(), &signature.signature).await {
        return Err(Rejection::InvalidSignature(format!(
            "signature by {} does not verify",
            signature.key_id
        )));
    }

    if let Some(body) = request.body_bytes() {
        let digest = header(&request.headers, DIGEST)?;
        if !digest_matches(digest, body) {
            return Err(Rejection::InvalidDigest);
        }
    }
    Ok(())
}

fn match_target(request: &InvocationRequest, options: &VerifyOptions<'_>) -> Result<String, Rejection> {
    let host_header = request
        .headers
        .get(HOST)
        .and_then(|host| host.to_str().ok());
    let host = match (&options.expected_host, host_header) {
        (Some(expected), Some(actual)) if !expected.eq_ignore_ascii_case(actual) => {
            return Err(Rejection::TargetMismatch {
                expected: expected.clone(),
                actual: actual.to_string(),
            });
        }
        (Some(expected), _) => expected.to_ascii_lowercase(),
        (None, Some(actual)) => actual.to_ascii_lowercase(),
        (None, None) => {
            return Err(Rejection::MissingHeader {
                name: HOST.to_string(),
            });
        }
    };

    let mut target = format!("https://{host}{}", request.url.path());
    if let Some(query) = request.url.query() {
        target.push('?');
        target.push_str(query);
    }

    if options.expected_target.iter().any(|expected| *expected == target) {
        Ok(target)
    } else {
        Err(Rejection::TargetMismatch {
            expected: options.expected_target.join(" | "),
            actual: target,
        })
    }
}
