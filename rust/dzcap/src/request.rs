//! Server-side views of incoming signed requests.

use crate::{
    capability::derive_root_capability_id,
    did::{Did, did_for_did_uri, is_did_key_verification_method_id},
    error::Rejection,
    config::DEFAULT_MAX_CLOCK_SKEW,
    http_signature::{
        AUTHORIZATION, CAPABILITY_INVOCATION, CREATED, EXPIRES, HOST, KEY_ID, REQUEST_TARGET,
        SignatureHeader,
    },
    identity::KeyResolver,
    invocation::{CapabilityInvocationHeader, InvocationRequest, InvokedCapability},
    time::{ValidityWindow, unix_now},
    verifier::{VerifiedInvocation, VerifyOptions, header, verify_capability_invocation},
};

fn parse_signature(request: &InvocationRequest) -> Result<SignatureHeader, Rejection> {
    SignatureHeader::parse(header(&request.headers, AUTHORIZATION)?)
        .map_err(|e| Rejection::MalformedSignature(e.to_string()))
}

/// A request that claims to invoke a capability, parsed but not verified.
#[derive(Debug, Clone)]
pub struct ZcapInvocationRequest {
    request: InvocationRequest,
    signature: SignatureHeader,
    invocation: CapabilityInvocationHeader,
}

impl ZcapInvocationRequest {
    /// Parse the signature headers of `request`.
    ///
    /// # Errors
    ///
    /// [`Rejection::MissingHeader`] or [`Rejection::MalformedSignature`].
    pub fn from_request(request: InvocationRequest) -> Result<Self, Rejection> {
        let signature = parse_signature(&request)?;
        let invocation =
            CapabilityInvocationHeader::parse(header(&request.headers, CAPABILITY_INVOCATION)?)
                .map_err(|e| Rejection::MalformedSignature(e.to_string()))?;
        Ok(Self {
            request,
            signature,
            invocation,
        })
    }

    /// The DID claiming to invoke. The `keyId` must be a `did:key`
    /// verification method id.
    ///
    /// # Errors
    ///
    /// [`Rejection::UnknownKey`] for any other kind of key id.
    pub fn invoker(&self) -> Result<Did, Rejection> {
        let key_id = &self.signature.key_id;
        let unknown = |reason: String| Rejection::UnknownKey {
            key_id: key_id.clone(),
            reason,
        };
        if !is_did_key_verification_method_id(key_id) {
            return Err(unknown("expected a did:key verification method id".to_string()));
        }
        did_for_did_uri(key_id).map_err(|e| unknown(e.to_string()))
    }

    /// The claimed capability.
    pub fn capability(&self) -> &InvokedCapability {
        &self.invocation.capability
    }

    /// The claimed action.
    pub fn action(&self) -> &str {
        &self.invocation.action
    }

    /// The underlying request.
    pub fn request(&self) -> &InvocationRequest {
        &self.request
    }

    /// Verify `request` as an invocation of its own URL.
    ///
    /// The URL must be `https:`. The expected target becomes the request URL
    /// and the expected root its root capability, replacing whatever
    /// `options` carried.
    ///
    /// # Errors
    ///
    /// [`Rejection::InsecureTransport`] for a non-`https:` URL, otherwise the
    /// verifier's rejection.
    pub async fn verified(
        request: &InvocationRequest,
        mut options: VerifyOptions<'_>,
    ) -> Result<VerifiedInvocation, Rejection> {
        if request.url.scheme() != "https" {
            return Err(Rejection::InsecureTransport {
                url: request.url.to_string(),
            });
        }
        let target = request.url.to_string();
        options.expected_root_capability = vec![derive_root_capability_id(&target)];
        options.expected_target = vec![target];
        verify_capability_invocation(request, &options).await
    }
}

/// Parameters every plain HTTP signature must cover.
const REQUIRED_PARAMETERS: [&str; 5] = [KEY_ID, CREATED, EXPIRES, REQUEST_TARGET, HOST];

/// What a plain HTTP signature is verified with.
#[derive(Clone, Copy)]
pub struct SignatureOptions<'a> {
    /// Resolves the `keyId`.
    pub key_resolver: &'a dyn KeyResolver,
    /// Verification time in unix seconds; defaults to now.
    pub now: Option<u64>,
    /// How far in the future (seconds) `created` may be.
    pub max_clock_skew: u64,
}

impl<'a> SignatureOptions<'a> {
    /// Options resolving keys through `key_resolver`, with the default skew.
    pub fn new(key_resolver: &'a dyn KeyResolver) -> Self {
        Self {
            key_resolver,
            now: None,
            max_clock_skew: DEFAULT_MAX_CLOCK_SKEW,
        }
    }

    /// Verify as of `now` (unix seconds).
    #[must_use]
    pub fn at(mut self, now: u64) -> Self {
        self.now = Some(now);
        self
    }

    /// Set [`SignatureOptions::max_clock_skew`].
    #[must_use]
    pub fn max_clock_skew(mut self, seconds: u64) -> Self {
        self.max_clock_skew = seconds;
        self
    }
}

/// A verified plain HTTP signature, without capability semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSignatureAuthorization {
    /// The authenticated key.
    pub key_id: String,
    /// Signed parameters, in signing order.
    pub parameters: Vec<String>,
    /// Raw signature bytes.
    pub signature: Vec<u8>,
    /// `created`, unix seconds.
    pub created: u64,
    /// `expires`, unix seconds.
    pub expires: u64,
}

impl HttpSignatureAuthorization {
    /// Verify the `authorization` signature of `request`.
    ///
    /// The signature must cover its key, its window, the request line and
    /// the host, and the window must contain the verification time.
    ///
    /// # Errors
    ///
    /// [`Rejection::MissingHeader`], [`Rejection::MalformedSignature`],
    /// [`Rejection::UnknownKey`], [`Rejection::InvalidSignature`],
    /// [`Rejection::NotYetValid`] or [`Rejection::Expired`].
    pub async fn verified(
        request: &InvocationRequest,
        options: &SignatureOptions<'_>,
    ) -> Result<Self, Rejection> {
        let signature = parse_signature(request)?;
        if let Some(missing) = REQUIRED_PARAMETERS
            .iter()
            .find(|name| !signature.covers(name))
        {
            return Err(Rejection::MalformedSignature(format!(
                "{missing} is not signed"
            )));
        }
        let (Some(created), Some(expires)) = (signature.created, signature.expires) else {
            return Err(Rejection::MalformedSignature(
                "signature must carry created and expires".to_string(),
            ));
        };

        let verifier = options
            .key_resolver
            .resolve_verifier(&signature.key_id)
            .await
            .map_err(|e| Rejection::UnknownKey {
                key_id: signature.key_id.clone(),
                reason: e.to_string(),
            })?;
        let plaintext = signature
            .signing_string(&request.method, &request.url, &request.headers)
            .map_err(|e| Rejection::InvalidSignature(e.to_string()))?;
        if !verifier.verify(plaintext.as_bytes(), &signature.signature).await {
            return Err(Rejection::InvalidSignature(format!(
                "signature by {} does not verify",
                signature.key_id
            )));
        }

        let now = options.now.unwrap_or_else(unix_now);
        ValidityWindow::new(created, expires).check(now, options.max_clock_skew)?;

        Ok(Self {
            key_id: signature.key_id,
            parameters: signature.headers,
            signature: signature.signature,
            created,
            expires,
        })
    }
}
