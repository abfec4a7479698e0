//! HTTP Signatures as used for capability invocations.
//!
//! A request is signed over a signing string made of `name: value` lines,
//! one per signed parameter, in exactly the order the `headers` parameter
//! lists them. Pseudo-headers come from the signature itself or the request
//! line:
//!
//! | parameter          | value                                     |
//! |--------------------|-------------------------------------------|
//! | `(key-id)`         | the `keyId`                               |
//! | `(created)`        | unix seconds                              |
//! | `(expires)`        | unix seconds                              |
//! | `(request-target)` | lowercase method, a space, path and query |
//!
//! Any other parameter names a request header.

pub mod digest;
pub mod header;

pub use digest::{digest_header_value, digest_matches};
pub use header::{AuthParams, HeaderParseError};

use base64::{
    Engine,
    alphabet,
    engine::{
        DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig, general_purpose::URL_SAFE_NO_PAD,
    },
};
use http::{HeaderMap, Method};
use url::Url;

use crate::identity::{SignError, Signer};

/// The `authorization` header.
pub const AUTHORIZATION: &str = "authorization";
/// The `capability-invocation` header.
pub const CAPABILITY_INVOCATION: &str = "capability-invocation";
/// The `host` header.
pub const HOST: &str = "host";
/// The `content-type` header.
pub const CONTENT_TYPE: &str = "content-type";
/// The `digest` header.
pub const DIGEST: &str = "digest";

/// `(key-id)` pseudo-header.
pub const KEY_ID: &str = "(key-id)";
/// `(created)` pseudo-header.
pub const CREATED: &str = "(created)";
/// `(expires)` pseudo-header.
pub const EXPIRES: &str = "(expires)";
/// `(request-target)` pseudo-header.
pub const REQUEST_TARGET: &str = "(request-target)";

/// Scheme of the `authorization` header.
pub const SIGNATURE_SCHEME: &str = "Signature";

const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The parameters an invocation signs, given what body it carries.
///
/// Every invocation signs `(key-id) (created) (expires) (request-target)
/// host capability-invocation`. A body with a non-empty content type adds
/// `content-type` and `digest`; a body without one adds `digest` only.
pub fn signed_parameters(has_body: bool, content_type: Option<&str>) -> Vec<String> {
    let mut parameters: Vec<String> = [
        KEY_ID,
        CREATED,
        EXPIRES,
        REQUEST_TARGET,
        HOST,
        CAPABILITY_INVOCATION,
    ]
    .iter()
    .map(|name| name.to_string())
    .collect();

    if has_body {
        if content_type.is_some_and(|content_type| !content_type.is_empty()) {
            parameters.push(CONTENT_TYPE.to_string());
        }
        parameters.push(DIGEST.to_string());
    }
    parameters
}

/// `(request-target)` of a request: `get /path?query`.
pub fn request_target(method: &Method, url: &Url) -> String {
    let mut target = format!("{} {}", method.as_str().to_ascii_lowercase(), url.path());
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    target
}

/// Why a signing string could not be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningStringError {
    /// A signed header is absent from the request.
    #[error("signed header {0} is not present")]
    MissingHeader(String),

    /// A signed pseudo-header has no value.
    #[error("signed parameter {0} has no value")]
    MissingParameter(&'static str),

    /// A signed header value is not visible ASCII.
    #[error("header {0} has a non-text value")]
    InvalidHeaderValue(String),
}

/// What the signing string is computed from.
#[derive(Debug, Clone, Copy)]
pub struct SigningContext<'a> {
    /// Request method.
    pub method: &'a Method,
    /// Request URL.
    pub url: &'a Url,
    /// Request headers.
    pub headers: &'a HeaderMap,
    /// The signing key id.
    pub key_id: &'a str,
    /// `(created)`, unix seconds.
    pub created: Option<u64>,
    /// `(expires)`, unix seconds.
    pub expires: Option<u64>,
}

impl SigningContext<'_> {
    fn value_of(&self, parameter: &str) -> Result<String, SigningStringError> {
        match parameter {
            KEY_ID => Ok(self.key_id.to_string()),
            CREATED => self
                .created
                .map(|created| created.to_string())
                .ok_or(SigningStringError::MissingParameter(CREATED)),
            EXPIRES => self
                .expires
                .map(|expires| expires.to_string())
                .ok_or(SigningStringError::MissingParameter(EXPIRES)),
            REQUEST_TARGET => Ok(request_target(self.method, self.url)),
            name => {
                let mut values = Vec::new();
                for value in self.headers.get_all(name) {
                    let value = value
                        .to_str()
                        .map_err(|_| SigningStringError::InvalidHeaderValue(name.to_string()))?;
                    values.push(value.trim());
                }
                if values.is_empty() {
                    return Err(SigningStringError::MissingHeader(name.to_string()));
                }
                Ok(values.join(", "))
            }
        }
    }
}

/// Build the signing string for `parameters`, in their order.
///
/// # Errors
///
/// [`SigningStringError`] when a parameter has no value on the request.
pub fn signing_string(
    parameters: &[String],
    context: &SigningContext<'_>,
) -> Result<String, SigningStringError> {
    let lines = parameters
        .iter()
        .map(|parameter| {
            let name = parameter.to_ascii_lowercase();
            context
                .value_of(&name)
                .map(|value| format!("{name}: {value}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines.join("\n"))
}

/// A parsed or freshly made `authorization: Signature ...` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Verification method id of the signing key.
    pub key_id: String,
    /// Signed parameters in signing order.
    pub headers: Vec<String>,
    /// `created`, unix seconds.
    pub created: Option<u64>,
    /// `expires`, unix seconds.
    pub expires: Option<u64>,
    /// Raw signature bytes.
    pub signature: Vec<u8>,
}

impl SignatureHeader {
    /// Parse an `authorization` header value.
    ///
    /// # Errors
    ///
    /// [`HeaderParseError`] when the value is not a `Signature` header, or
    /// lacks `keyId`, `headers` or `signature`.
    pub fn parse(value: &str) -> Result<Self, HeaderParseError> {
        let parsed = AuthParams::parse(AUTHORIZATION, value)?;
        if !parsed.scheme.eq_ignore_ascii_case(SIGNATURE_SCHEME) {
            return Err(HeaderParseError::UnsupportedScheme {
                header: AUTHORIZATION,
                scheme: parsed.scheme,
            });
        }

        let required = |param: &'static str| {
            parsed
                .get(param)
                .filter(|value| !value.is_empty())
                .ok_or(HeaderParseError::MissingParameter {
                    header: AUTHORIZATION,
                    param,
                })
        };
        let timestamp = |param: &'static str| {
            parsed
                .get(param)
                .map(|value| {
                    value
                        .parse::<u64>()
                        .map_err(|e| HeaderParseError::InvalidParameter {
                            header: AUTHORIZATION,
                            param,
                            reason: e.to_string(),
                        })
                })
                .transpose()
        };

        let key_id = required("keyId")?.to_string();
        let headers = required("headers")?
            .split_ascii_whitespace()
            .map(str::to_ascii_lowercase)
            .collect();
        let signature = decode_signature(required("signature")?).map_err(|reason| {
            HeaderParseError::InvalidParameter {
                header: AUTHORIZATION,
                param: "signature",
                reason,
            }
        })?;

        Ok(Self {
            key_id,
            headers,
            created: timestamp("created")?,
            expires: timestamp("expires")?,
            signature,
        })
    }

    /// Render as an `authorization` header value.
    pub fn to_header_value(&self) -> String {
        let mut params = vec![("keyId".to_string(), self.key_id.clone())];
        if let Some(created) = self.created {
            params.push(("created".to_string(), created.to_string()));
        }
        if let Some(expires) = self.expires {
            params.push(("expires".to_string(), expires.to_string()));
        }
        params.push(("headers".to_string(), self.headers.join(" ")));
        params.push(("signature".to_string(), URL_SAFE_NO_PAD.encode(&self.signature)));
        AuthParams {
            scheme: SIGNATURE_SCHEME.to_string(),
            params,
        }
        .to_header_value()
    }

    /// Whether `parameter` is among the signed parameters.
    pub fn covers(&self, parameter: &str) -> bool {
        self.headers.iter().any(|signed| signed == parameter)
    }

    /// The signing string this signature claims to cover, recomputed from a
    /// request.
    ///
    /// # Errors
    ///
    /// [`SigningStringError`] when a signed parameter is absent.
    pub fn signing_string(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<String, SigningStringError> {
        signing_string(
            &self.headers,
            &SigningContext {
                method,
                url,
                headers,
                key_id: &self.key_id,
                created: self.created,
                expires: self.expires,
            },
        )
    }
}

/// Decode a signature in base64url or base64, padded or not.
fn decode_signature(value: &str) -> Result<Vec<u8>, String> {
    let standard = value.replace('-', "+").replace('_', "/");
    LENIENT_STANDARD
        .decode(standard)
        .map_err(|e| e.to_string())
}

/// Errors from signing a request.
#[derive(Debug, thiserror::Error)]
pub enum HttpSignatureError {
    /// The signer has no verification method id to use as `keyId`.
    #[error("signer has no verification method id")]
    MissingSignerId,

    /// A parameter to be signed has no value.
    #[error(transparent)]
    SigningString(#[from] SigningStringError),

    /// The signer failed.
    #[error(transparent)]
    Signer(#[from] SignError),
}

/// Sign a request over `parameters`.
///
/// # Errors
///
/// [`HttpSignatureError`] when the signer has no id, a parameter has no
/// value on the request, or the signer fails.
pub async fn sign_request<S>(
    signer: &S,
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
    parameters: Vec<String>,
    created: u64,
    expires: u64,
) -> Result<SignatureHeader, HttpSignatureError>
where
    S: Signer + ?Sized,
{
    let key_id = signer.id().ok_or(HttpSignatureError::MissingSignerId)?;
    let plaintext = signing_string(
        &parameters,
        &SigningContext {
            method,
            url,
            headers,
            key_id,
            created: Some(created),
            expires: Some(expires),
        },
    )?;
    tracing::trace!(key_id, %plaintext, "signing request");
    let signature = signer.sign(plaintext.as_bytes()).await?;

    Ok(SignatureHeader {
        key_id: key_id.to_string(),
        headers: parameters,
        created: Some(created),
        expires: Some(expires),
        signature,
    })
}
