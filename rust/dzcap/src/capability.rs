//! The capability data model.
//!
//! A [`Capability`] grants its `controller` the right to perform
//! `allowedAction`s on an `invocationTarget`. Every chain of delegated
//! capabilities ends at a root capability whose id is derived from the
//! target alone:
//!
//! ```text
//! urn:zcap:root:<percent-encoded invocationTarget>
//! ```
//!
//! Root capabilities are never signed. Delegated capabilities reference their
//! parent by id and carry a [`DelegationProof`] made by the parent's
//! controller.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::proof::DelegationProof;

/// The ZCAP JSON-LD context. It is always the first `@context` entry.
pub const ZCAP_CONTEXT: &str = "https://w3id.org/zcap/v1";

/// The Ed25519Signature2020 suite context.
pub const ED25519_2020_CONTEXT: &str = "https://w3id.org/security/suites/ed25519-2020/v1";

/// Prefix of every root capability id.
pub const ROOT_CAPABILITY_PREFIX: &str = "urn:zcap:root:";

/// Derive the root capability id for `invocation_target`.
///
/// The target is percent-encoded exactly once; callers must pass the target
/// as it appears on the wire, not an already encoded form.
#[must_use]
pub fn derive_root_capability_id(invocation_target: &str) -> String {
    format!(
        "{ROOT_CAPABILITY_PREFIX}{}",
        urlencoding::encode(invocation_target)
    )
}

/// Returns `true` when `id` has the shape of a root capability id.
#[must_use]
pub fn is_root_capability_id(id: &str) -> bool {
    id.starts_with(ROOT_CAPABILITY_PREFIX)
}

/// Error when dereferencing a root capability id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RootIdError {
    /// The id does not start with `urn:zcap:root:`.
    #[error("not a root capability id: {0}")]
    NotRoot(String),

    /// The encoded target is empty or not valid percent-encoded UTF-8.
    #[error("invalid encoded target in {0}")]
    InvalidTarget(String),
}

/// Recover the invocation target from a root capability id.
///
/// # Errors
///
/// Returns [`RootIdError`] when `id` is not a root id or its target cannot
/// be decoded.
pub fn dereference_root_capability_id(id: &str) -> Result<String, RootIdError> {
    let encoded = id
        .strip_prefix(ROOT_CAPABILITY_PREFIX)
        .ok_or_else(|| RootIdError::NotRoot(id.to_string()))?;
    if encoded.is_empty() {
        return Err(RootIdError::InvalidTarget(id.to_string()));
    }
    urlencoding::decode(encoded)
        .map(|target| target.into_owned())
        .map_err(|_| RootIdError::InvalidTarget(id.to_string()))
}

/// A root capability as a resolver knows it: who controls a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootCapability {
    /// Identifier of the resource owner.
    pub controller: String,
    /// The target the root grants.
    pub invocation_target: String,
}

impl RootCapability {
    /// The root of `invocation_target`, controlled by `controller`.
    pub fn new(invocation_target: impl Into<String>, controller: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            invocation_target: invocation_target.into(),
        }
    }

    /// The derived root capability id.
    pub fn id(&self) -> String {
        derive_root_capability_id(&self.invocation_target)
    }

    /// The root as a capability document.
    pub fn to_capability(&self) -> Capability {
        Capability::root(self.invocation_target.clone(), self.controller.clone())
    }
}

/// Reference from a capability to its parent.
///
/// On the wire this is the parent's id. An embedded parent is accepted when
/// building a delegation, but it is reduced to its id before signing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParentCapability {
    /// The parent's id.
    Id(String),
    /// A full parent capability.
    Embedded(Box<Capability>),
}

impl ParentCapability {
    /// The id of the referenced parent.
    pub fn id(&self) -> &str {
        match self {
            ParentCapability::Id(id) => id,
            ParentCapability::Embedded(parent) => &parent.id,
        }
    }
}

impl From<&str> for ParentCapability {
    fn from(id: &str) -> Self {
        ParentCapability::Id(id.to_string())
    }
}

impl From<String> for ParentCapability {
    fn from(id: String) -> Self {
        ParentCapability::Id(id)
    }
}

/// An authorization capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    /// JSON-LD contexts; the first entry is [`ZCAP_CONTEXT`].
    #[serde(rename = "@context")]
    pub context: Vec<Value>,

    /// Unique id of this capability.
    pub id: String,

    /// Identifier (typically a DID) of the holder.
    pub controller: String,

    /// URI of the resource this capability authorizes access to.
    pub invocation_target: String,

    /// Permitted actions; `None` means whatever the parent chain permits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_action: Option<Vec<String>>,

    /// The capability this one was delegated from; `None` only for roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_capability: Option<ParentCapability>,

    /// ISO-8601 expiry, kept exactly as signed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    /// Delegation proof, present once signed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<DelegationProof>,
}

impl Capability {
    /// The root capability of `invocation_target`, controlled by
    /// `controller`.
    pub fn root(invocation_target: impl Into<String>, controller: impl Into<String>) -> Self {
        let invocation_target = invocation_target.into();
        Self {
            context: vec![Value::from(ZCAP_CONTEXT)],
            id: derive_root_capability_id(&invocation_target),
            controller: controller.into(),
            invocation_target,
            allowed_action: None,
            parent_capability: None,
            expires: None,
            proof: None,
        }
    }

    /// An unsigned capability delegated from `parent` to `controller`, with
    /// the parent's target, a fresh `urn:uuid:` id and the given expiry.
    pub fn child_of(
        parent: &Capability,
        controller: impl Into<String>,
        expires: DateTime<Utc>,
    ) -> Self {
        Self {
            context: vec![Value::from(ZCAP_CONTEXT), Value::from(ED25519_2020_CONTEXT)],
            id: format!("urn:uuid:{}", uuid::Uuid::new_v4()),
            controller: controller.into(),
            invocation_target: parent.invocation_target.clone(),
            allowed_action: None,
            parent_capability: Some(ParentCapability::Id(parent.id.clone())),
            expires: Some(format_timestamp(expires)),
            proof: None,
        }
    }

    /// Restrict the permitted actions.
    #[must_use]
    pub fn with_allowed_action<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_action = Some(actions.into_iter().map(Into::into).collect());
        self
    }

    /// Narrow the invocation target.
    #[must_use]
    pub fn with_invocation_target(mut self, target: impl Into<String>) -> Self {
        self.invocation_target = target.into();
        self
    }

    /// Whether this is a root capability (root id and no parent).
    pub fn is_root(&self) -> bool {
        self.parent_capability.is_none() && is_root_capability_id(&self.id)
    }

    /// Id of the parent capability, if any.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_capability.as_ref().map(ParentCapability::id)
    }

    /// Whether the first `@context` entry is the ZCAP context.
    pub fn has_zcap_context(&self) -> bool {
        self.context.first().and_then(Value::as_str) == Some(ZCAP_CONTEXT)
    }

    /// Parsed expiry.
    ///
    /// # Errors
    ///
    /// Returns the unparseable string when `expires` is not ISO-8601.
    pub fn expires_at(&self) -> Result<Option<DateTime<Utc>>, String> {
        self.expires.as_deref().map(parse_timestamp).transpose()
    }

    /// Whether `action` is permitted by this capability alone.
    pub fn permits_action(&self, action: &str) -> bool {
        match &self.allowed_action {
            None => true,
            Some(actions) => actions.iter().any(|allowed| allowed == action),
        }
    }

    /// A copy with the embedded parent (if any) reduced to its id and
    /// without a proof, i.e. the form a delegation proof is made over.
    pub fn unsigned(&self) -> Self {
        let mut unsigned = self.clone();
        unsigned.parent_capability = self
            .parent_capability
            .as_ref()
            .map(|parent| ParentCapability::Id(parent.id().to_string()));
        unsigned.proof = None;
        unsigned
    }
}

/// Format a timestamp the way capability documents carry it.
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an ISO-8601 timestamp.
///
/// RFC 3339 is accepted, as is the minute-precision `YYYY-MM-DDTHH:MMZ`
/// form some issuers use for far-future expiries.
///
/// # Errors
///
/// Returns the input when it matches neither form.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.with_timezone(&Utc));
    }
    value
        .strip_suffix('Z')
        .and_then(|naive| NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M").ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| value.to_string())
}

/// How much a verifier lets a delegation narrow its target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttenuationPolicy {
    /// Allow a child to target a sub-resource of its parent's target.
    pub allow_target_attenuation: bool,
}

/// A broken attenuation rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttenuationError {
    /// Targets differ and target attenuation is not allowed.
    #[error("invocation target {child} differs from parent target {parent}")]
    TargetNotEqual {
        /// Child target.
        child: String,
        /// Parent target.
        parent: String,
    },

    /// Target attenuation is allowed but the child target is not below the
    /// parent's.
    #[error("invocation target {child} is not a sub-resource of {parent}")]
    TargetNotSubResource {
        /// Child target.
        child: String,
        /// Parent target.
        parent: String,
    },

    /// The child allows an action its parent does not.
    #[error("action {action} is not allowed by the parent capability")]
    ActionNotAllowed {
        /// The added action.
        action: String,
    },

    /// The child outlives its parent.
    #[error("expires {child} is after parent expiry {parent}")]
    ExpiresAfterParent {
        /// Child expiry.
        child: String,
        /// Parent expiry.
        parent: String,
    },

    /// A delegated capability without an expiry.
    #[error("delegated capability has no expiry")]
    MissingExpires,

    /// An expiry that is not ISO-8601.
    #[error("unparseable expiry {0}")]
    InvalidExpires(String),
}

/// Whether `child` is `parent` followed by a path or query.
pub fn is_sub_resource(child: &str, parent: &str) -> bool {
    let Some(rest) = child.strip_prefix(parent) else {
        return false;
    };
    !rest.is_empty() && (parent.ends_with('/') || rest.starts_with(['/', '?']))
}

/// Check that `child` is a valid attenuation of `parent`.
///
/// # Errors
///
/// Returns the first rule `child` breaks: target, then actions, then
/// expiry.
pub fn check_attenuation(
    child: &Capability,
    parent: &Capability,
    policy: AttenuationPolicy,
) -> Result<(), AttenuationError> {
    if child.invocation_target != parent.invocation_target {
        if !policy.allow_target_attenuation {
            return Err(AttenuationError::TargetNotEqual {
                child: child.invocation_target.clone(),
                parent: parent.invocation_target.clone(),
            });
        }
        if !is_sub_resource(&child.invocation_target, &parent.invocation_target) {
            return Err(AttenuationError::TargetNotSubResource {
                child: child.invocation_target.clone(),
                parent: parent.invocation_target.clone(),
            });
        }
    }

    if let (Some(child_actions), Some(parent_actions)) =
        (&child.allowed_action, &parent.allowed_action)
    {
        if let Some(action) = child_actions
            .iter()
            .find(|action| !parent_actions.contains(action))
        {
            return Err(AttenuationError::ActionNotAllowed {
                action: action.clone(),
            });
        }
    }
    // An unrestricted child inherits the parent's actions.

    let child_expires = child
        .expires_at()
        .map_err(AttenuationError::InvalidExpires)?;
    let parent_expires = parent
        .expires_at()
        .map_err(AttenuationError::InvalidExpires)?;
    match (child_expires, parent_expires) {
        (Some(child_at), Some(parent_at)) if child_at > parent_at => {
            Err(AttenuationError::ExpiresAfterParent {
                child: format_timestamp(child_at),
                parent: format_timestamp(parent_at),
            })
        }
        (None, Some(_)) => Err(AttenuationError::MissingExpires),
        _ => Ok(()),
    }
}
