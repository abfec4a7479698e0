//! Invocation construction.
//!
//! [`create_invocation_request`] turns a URL, a capability and a signer into
//! the headers of a signed HTTP request. Nothing is sent: the caller hands
//! the returned [`InvocationRequest`] to whatever HTTP client it uses.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use url::Url;

use crate::{
    capability::{Capability, derive_root_capability_id},
    config::InvocationConfig,
    http_signature::{
        AUTHORIZATION, AuthParams, CAPABILITY_INVOCATION, CONTENT_TYPE, DIGEST, HOST,
        HeaderParseError, HttpSignatureError, digest_header_value, sign_request,
        signed_parameters,
    },
    identity::Signer,
    time::unix_now,
};

/// Scheme of the `capability-invocation` header.
pub const ZCAP_SCHEME: &str = "zcap";

/// The capability an invocation exercises.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokedCapability {
    /// Referenced by id; the verifier resolves it.
    Id(String),
    /// Carried in the request itself.
    Embedded(Box<Capability>),
}

impl InvokedCapability {
    /// The invoked capability's id.
    pub fn id(&self) -> &str {
        match self {
            InvokedCapability::Id(id) => id,
            InvokedCapability::Embedded(capability) => &capability.id,
        }
    }
}

impl From<Capability> for InvokedCapability {
    /// Roots travel by id; delegated capabilities are embedded.
    fn from(capability: Capability) -> Self {
        if capability.is_root() {
            InvokedCapability::Id(capability.id)
        } else {
            InvokedCapability::Embedded(Box::new(capability))
        }
    }
}

/// The `capability-invocation` header.
///
/// ```text
/// capability-invocation: zcap id="urn:zcap:root:...",action="GET"
/// capability-invocation: zcap capability="<base64url JSON>",action="read"
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityInvocationHeader {
    /// The invoked capability.
    pub capability: InvokedCapability,
    /// The invoked action.
    pub action: String,
}

impl CapabilityInvocationHeader {
    /// Parse a `capability-invocation` header value.
    ///
    /// # Errors
    ///
    /// [`HeaderParseError`] when the scheme is not `zcap`, `action` is
    /// missing, or neither `id` nor a decodable `capability` is present.
    pub fn parse(value: &str) -> Result<Self, HeaderParseError> {
        let parsed = AuthParams::parse(CAPABILITY_INVOCATION, value)?;
        if !parsed.scheme.eq_ignore_ascii_case(ZCAP_SCHEME) {
            return Err(HeaderParseError::UnsupportedScheme {
                header: CAPABILITY_INVOCATION,
                scheme: parsed.scheme,
            });
        }

        let action = parsed
            .get("action")
            .filter(|action| !action.is_empty())
            .ok_or(HeaderParseError::MissingParameter {
                header: CAPABILITY_INVOCATION,
                param: "action",
            })?
            .to_string();

        let capability = if let Some(encoded) = parsed.get("capability") {
            let invalid = |reason: String| HeaderParseError::InvalidParameter {
                header: CAPABILITY_INVOCATION,
                param: "capability",
                reason,
            };
            let json = URL_SAFE_NO_PAD
                .decode(encoded.trim_end_matches('='))
                .map_err(|e| invalid(e.to_string()))?;
            let capability: Capability =
                serde_json::from_slice(&json).map_err(|e| invalid(e.to_string()))?;
            InvokedCapability::Embedded(Box::new(capability))
        } else {
            let id = parsed
                .get("id")
                .filter(|id| !id.is_empty())
                .ok_or(HeaderParseError::MissingParameter {
                    header: CAPABILITY_INVOCATION,
                    param: "id",
                })?;
            InvokedCapability::Id(id.to_string())
        };

        Ok(Self { capability, action })
    }

    /// Render as a header value.
    ///
    /// # Errors
    ///
    /// Returns the serialization error of an embedded capability.
    pub fn to_header_value(&self) -> Result<String, serde_json::Error> {
        let reference = match &self.capability {
            InvokedCapability::Id(id) => ("id".to_string(), id.clone()),
            InvokedCapability::Embedded(capability) => (
                "capability".to_string(),
                URL_SAFE_NO_PAD.encode(serde_json::to_vec(capability)?),
            ),
        };
        Ok(AuthParams {
            scheme: ZCAP_SCHEME.to_string(),
            params: vec![reference, ("action".to_string(), self.action.clone())],
        }
        .to_header_value())
    }
}

/// A request body and, when known, its media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    /// Raw bytes.
    pub bytes: Vec<u8>,
    /// Media type; `None` for a typeless body.
    pub content_type: Option<String>,
}

impl Body {
    /// A body with a known media type.
    pub fn typed(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: Some(content_type.into()),
        }
    }

    /// A body without a media type.
    pub fn typeless(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: None,
        }
    }

    /// `value` as an `application/json` body.
    ///
    /// # Errors
    ///
    /// Returns the serialization error.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::typed(serde_json::to_vec(value)?, "application/json"))
    }
}

/// Errors from constructing an invocation.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    /// The URL cannot be invoked (no host).
    #[error("cannot invoke {0}: url has no host")]
    InvalidUrl(String),

    /// A header value cannot be represented.
    #[error("invalid {name} header value: {reason}")]
    InvalidHeader {
        /// Header name.
        name: String,
        /// Why it was refused.
        reason: String,
    },

    /// `expires` is before `created`.
    #[error("invocation expires ({expires}) before it is created ({created})")]
    InvalidExpiry {
        /// Unix seconds.
        created: u64,
        /// Unix seconds.
        expires: u64,
    },

    /// The embedded capability could not be serialized.
    #[error("failed to encode capability: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Signing failed.
    #[error(transparent)]
    Signature(#[from] HttpSignatureError),
}

/// Everything an invocation needs besides its URL.
pub struct InvocationOptions<'a, S: ?Sized> {
    /// Capability to invoke; `None` invokes the root capability of the URL.
    pub capability: Option<InvokedCapability>,
    /// HTTP method.
    pub method: Method,
    /// Invoked action; defaults to the method.
    pub action: Option<String>,
    /// Signs the request as the invoker.
    pub signer: &'a S,
    /// Extra headers to send (and, where signed, to sign).
    pub headers: HeaderMap,
    /// Request body.
    pub body: Option<Body>,
    /// `(created)`; defaults to now.
    pub created: Option<u64>,
    /// `(expires)`; defaults to `created` plus the signature lifetime.
    pub expires: Option<u64>,
    /// Lifetime settings.
    pub config: InvocationConfig,
}

impl<'a, S: Signer + ?Sized> InvocationOptions<'a, S> {
    /// Options for invoking the root capability with `method`.
    pub fn new(method: Method, signer: &'a S) -> Self {
        Self {
            capability: None,
            method,
            action: None,
            signer,
            headers: HeaderMap::new(),
            body: None,
            created: None,
            expires: None,
            config: InvocationConfig::default(),
        }
    }

    /// Invoke `capability` instead of the root.
    #[must_use]
    pub fn capability(mut self, capability: impl Into<InvokedCapability>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    /// Invoke `action` instead of the method.
    #[must_use]
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Send `body`.
    #[must_use]
    pub fn body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Fix the signature window.
    #[must_use]
    pub fn window(mut self, created: u64, expires: u64) -> Self {
        self.created = Some(created);
        self.expires = Some(expires);
        self
    }

    /// Use `config`.
    #[must_use]
    pub fn config(mut self, config: InvocationConfig) -> Self {
        self.config = config;
        self
    }
}

/// A signed request, ready to send or to verify.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    /// HTTP method.
    pub method: Method,
    /// Request URL.
    pub url: Url,
    /// All headers, including `authorization` and `capability-invocation`.
    pub headers: HeaderMap,
    /// Request body, if any.
    pub body: Option<Vec<u8>>,
}

impl InvocationRequest {
    /// The body bytes, if there is a non-empty body.
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref().filter(|body| !body.is_empty())
    }

    /// Build from an `http` request. A relative URI is completed with the
    /// `host` header as an `https` URL.
    ///
    /// # Errors
    ///
    /// [`InvocationError::InvalidUrl`] when no absolute URL can be formed.
    pub fn from_http<B: Into<Vec<u8>>>(request: http::Request<B>) -> Result<Self, InvocationError> {
        let (parts, body) = request.into_parts();
        let uri = parts.uri.to_string();
        let url = if parts.uri.scheme().is_some() {
            Url::parse(&uri)
        } else {
            let host = parts
                .headers
                .get(HOST)
                .and_then(|host| host.to_str().ok())
                .ok_or_else(|| InvocationError::InvalidUrl(uri.clone()))?;
            Url::parse(&format!("https://{host}{uri}"))
        }
        .map_err(|_| InvocationError::InvalidUrl(uri.clone()))?;

        let body: Vec<u8> = body.into();
        Ok(Self {
            method: parts.method,
            url,
            headers: parts.headers,
            body: (!body.is_empty()).then_some(body),
        })
    }

    /// Convert into an `http` request.
    ///
    /// # Errors
    ///
    /// Returns the `http` builder error.
    pub fn into_http(self) -> Result<http::Request<Vec<u8>>, http::Error> {
        let mut builder = http::Request::builder()
            .method(self.method)
            .uri(self.url.as_str());
        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.headers);
        }
        builder.body(self.body.unwrap_or_default())
    }
}

/// The `host` header value for `url`: hostname and any non-default port.
pub fn host_header(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, InvocationError> {
    HeaderValue::from_str(value).map_err(|e| InvocationError::InvalidHeader {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Sign a capability invocation of `url`.
///
/// Sets `host`, `capability-invocation` and, for a non-empty body, `digest`
/// and `content-type` (when the body is typed), then signs the parameters
/// [`signed_parameters`] selects and sets `authorization`.
///
/// # Errors
///
/// [`InvocationError`] when the URL has no host, a header value is not
/// representable, the window is inverted or signing fails.
pub async fn create_invocation_request<S>(
    url: &Url,
    options: InvocationOptions<'_, S>,
) -> Result<InvocationRequest, InvocationError>
where
    S: Signer + ?Sized,
{
    let InvocationOptions {
        capability,
        method,
        action,
        signer,
        mut headers,
        body,
        created,
        expires,
        config,
    } = options;

    let host = host_header(url).ok_or_else(|| InvocationError::InvalidUrl(url.to_string()))?;
    let capability = capability
        .unwrap_or_else(|| InvokedCapability::Id(derive_root_capability_id(url.as_str())));
    let action = action.unwrap_or_else(|| method.as_str().to_string());

    let created = created.unwrap_or_else(unix_now);
    let expires = expires.unwrap_or_else(|| created.saturating_add(config.signature_lifetime));
    if expires < created {
        return Err(InvocationError::InvalidExpiry { created, expires });
    }

    headers.insert(http::header::HOST, header_value(HOST, &host)?);
    let invocation = CapabilityInvocationHeader {
        capability,
        action,
    };
    headers.insert(
        HeaderName::from_static(CAPABILITY_INVOCATION),
        header_value(CAPABILITY_INVOCATION, &invocation.to_header_value()?)?,
    );

    let body = body.filter(|body| !body.bytes.is_empty());
    let content_type = match &body {
        Some(Body {
            content_type: Some(content_type),
            ..
        }) if !content_type.is_empty() => {
            headers.insert(
                http::header::CONTENT_TYPE,
                header_value(CONTENT_TYPE, content_type)?,
            );
            Some(content_type.clone())
        }
        Some(_) => headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        None => None,
    };
    if let Some(body) = &body {
        headers.insert(
            HeaderName::from_static(DIGEST),
            header_value(DIGEST, &digest_header_value(&body.bytes))?,
        );
    }

    let parameters = signed_parameters(body.is_some(), content_type.as_deref());
    let signature =
        sign_request(signer, &method, url, &headers, parameters, created, expires).await?;
    headers.insert(
        http::header::AUTHORIZATION,
        header_value(AUTHORIZATION, &signature.to_header_value())?,
    );

    tracing::debug!(
        %url,
        %method,
        capability = invocation.capability.id(),
        action = %invocation.action,
        key_id = %signature.key_id,
        "created invocation request"
    );

    Ok(InvocationRequest {
        method,
        url: url.clone(),
        headers,
        body: body.map(|body| body.bytes),
    })
}
