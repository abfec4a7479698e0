//! Delegation chain resolution.
//!
//! A chain is walked from the invoked capability to the root, one parent per
//! hop, each parent loaded lazily through the [`DocumentLoader`]. Every hop
//! checks the child's delegation proof and attenuation against the parent.

use std::{collections::HashSet, future::Future, time::Duration};

use crate::{
    capability::{
        AttenuationPolicy, Capability, ParentCapability, RootCapability, check_attenuation,
        derive_root_capability_id, is_root_capability_id, is_sub_resource,
    },
    config::VerifierConfig,
    delegation::verify_delegation,
    did::did_for_did_uri,
    document::DocumentLoader,
    error::{DocumentError, Rejection},
    identity::KeyResolver,
    invocation::InvokedCapability,
    root::RootZcapResolver,
    time::{rfc3339, to_unix},
};

/// Run a collaborator call under the configured timeout.
#[cfg(not(target_arch = "wasm32"))]
pub(crate) async fn within<T>(
    timeout: Option<Duration>,
    uri: &str,
    call: impl Future<Output = T>,
) -> Result<T, Rejection> {
    match timeout {
        None => Ok(call.await),
        Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
            tracing::warn!(uri, ?limit, "collaborator call timed out");
            Rejection::ResolutionTimeout {
                uri: uri.to_string(),
            }
        }),
    }
}

/// There is no timer on `wasm32`; the host environment bounds the call.
#[cfg(target_arch = "wasm32")]
pub(crate) async fn within<T>(
    _timeout: Option<Duration>,
    _uri: &str,
    call: impl Future<Output = T>,
) -> Result<T, Rejection> {
    Ok(call.await)
}

fn broken(capability: &str, reason: impl Into<String>) -> Rejection {
    Rejection::BrokenChain {
        capability: capability.to_string(),
        reason: reason.into(),
    }
}

/// Resolve the trusted root `id` through `resolver`.
///
/// The resolved root must derive back to `id`.
async fn resolve_root(
    resolver: &dyn RootZcapResolver,
    id: &str,
    timeout: Option<Duration>,
) -> Result<RootCapability, Rejection> {
    let unknown = |reason: String| Rejection::UnknownRoot {
        id: id.to_string(),
        reason,
    };
    if !is_root_capability_id(id) {
        return Err(unknown("not a root capability id".to_string()));
    }
    let root = match within(timeout, id, resolver.resolve_root_zcap(id)).await? {
        Ok(root) => root,
        Err(DocumentError::Timeout { uri }) => return Err(Rejection::ResolutionTimeout { uri }),
        Err(DocumentError::Other { uri, reason }) => {
            return Err(Rejection::ResolutionFailed { uri, reason });
        }
        Err(error) => return Err(unknown(error.to_string())),
    };
    if root.id() != id {
        return Err(unknown(format!(
            "resolved root targets {}",
            root.invocation_target
        )));
    }
    Ok(root)
}

/// Resolve every trusted root: the `expected` ids, or the root of `target`
/// when none are given.
pub(crate) async fn resolve_roots(
    resolver: &dyn RootZcapResolver,
    expected: &[String],
    target: &str,
    timeout: Option<Duration>,
) -> Result<Vec<RootCapability>, Rejection> {
    let derived;
    let ids = if expected.is_empty() {
        derived = [derive_root_capability_id(target)];
        &derived[..]
    } else {
        expected
    };
    let mut roots = Vec::with_capacity(ids.len());
    for id in ids {
        roots.push(resolve_root(resolver, id, timeout).await?);
    }
    Ok(roots)
}

/// Walks and checks delegation chains ending at one of the trusted roots.
pub(crate) struct ChainWalker<'a> {
    pub key_resolver: &'a dyn KeyResolver,
    pub document_loader: &'a DocumentLoader,
    pub roots: &'a [RootCapability],
    pub now: u64,
    pub config: &'a VerifierConfig,
}

impl ChainWalker<'_> {
    fn policy(&self) -> AttenuationPolicy {
        AttenuationPolicy {
            allow_target_attenuation: self.config.allow_target_attenuation,
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.config.resolution_timeout()
    }

    /// Load a delegated capability by id.
    async fn load(&self, id: &str) -> Result<Capability, Rejection> {
        tracing::trace!(id, "loading capability");
        let remote = match within(self.timeout(), id, self.document_loader.load(id)).await? {
            Ok(remote) => remote,
            Err(DocumentError::DocumentNotFound { uri }) => {
                return Err(Rejection::DocumentNotFound { uri });
            }
            Err(DocumentError::Timeout { uri }) => {
                return Err(Rejection::ResolutionTimeout { uri });
            }
            Err(DocumentError::Malformed { uri, reason }) => return Err(broken(&uri, reason)),
            Err(DocumentError::Other { uri, reason }) => {
                return Err(Rejection::ResolutionFailed { uri, reason });
            }
        };
        let capability: Capability = serde_json::from_value(remote.document)
            .map_err(|e| broken(id, format!("not a capability: {e}")))?;
        if capability.id != id {
            return Err(broken(
                id,
                format!("loaded document has id {}", capability.id),
            ));
        }
        Ok(capability)
    }

    /// The capability a reference points at. Root ids must be the trusted
    /// root.
    pub async fn invoked(&self, reference: &InvokedCapability) -> Result<Capability, Rejection> {
        match reference {
            InvokedCapability::Embedded(capability) => {
                if capability.is_root() {
                    return Err(broken(&capability.id, "root capabilities are not embedded"));
                }
                Ok((**capability).clone())
            }
            InvokedCapability::Id(id) if is_root_capability_id(id) => self.root_for(id),
            InvokedCapability::Id(id) => self.load(id).await,
        }
    }

    /// The trusted root named `id`.
    pub fn trusted_root(&self, id: &str) -> Result<&RootCapability, Rejection> {
        self.roots
            .iter()
            .find(|root| root.id() == id)
            .ok_or_else(|| Rejection::UnknownRoot {
                id: id.to_string(),
                reason: format!(
                    "expected root {}",
                    self.roots
                        .iter()
                        .map(RootCapability::id)
                        .collect::<Vec<_>>()
                        .join(" | ")
                ),
            })
    }

    /// The trusted root a verified chain ends at.
    pub fn terminal_root(&self, chain: &[Capability]) -> Result<RootCapability, Rejection> {
        let last = chain
            .last()
            .ok_or_else(|| broken("", "empty chain"))?;
        self.trusted_root(&last.id).cloned()
    }

    fn root_for(&self, id: &str) -> Result<Capability, Rejection> {
        self.trusted_root(id).map(RootCapability::to_capability)
    }

    async fn parent_of(&self, child: &Capability) -> Result<Capability, Rejection> {
        match &child.parent_capability {
            None => Err(broken(&child.id, "delegated capability has no parent")),
            Some(ParentCapability::Id(id)) if is_root_capability_id(id) => self.root_for(id),
            Some(ParentCapability::Id(id)) => self.load(id).await,
            Some(ParentCapability::Embedded(parent)) if parent.is_root() => {
                self.root_for(&parent.id)
            }
            Some(ParentCapability::Embedded(parent)) => Ok((**parent).clone()),
        }
    }

    fn check_link(&self, capability: &Capability) -> Result<(), Rejection> {
        if !capability.has_zcap_context() {
            return Err(broken(&capability.id, "@context does not start with the ZCAP context"));
        }
        let expires = capability
            .expires_at()
            .map_err(|value| broken(&capability.id, format!("unparseable expires {value}")))?
            .ok_or_else(|| Rejection::InvalidDelegation {
                capability: capability.id.clone(),
                reason: "delegated capability has no expires".to_string(),
            })?;
        if to_unix(expires) < self.now {
            return Err(Rejection::Expired {
                subject: capability.id.clone(),
                expires: rfc3339(to_unix(expires)),
            });
        }
        Ok(())
    }

    /// Walk from `invoked` to the root, returning the chain invoked-first.
    pub async fn walk(&self, invoked: Capability) -> Result<Vec<Capability>, Rejection> {
        let policy = self.policy();
        let mut seen = HashSet::new();
        let mut chain = vec![invoked];

        loop {
            let Some(child) = chain.last() else {
                return Err(broken("", "empty chain"));
            };
            if child.is_root() {
                self.trusted_root(&child.id)?;
                return Ok(chain);
            }

            if !seen.insert(child.id.clone()) {
                return Err(broken(&child.id, "delegation cycle"));
            }
            if seen.len() > self.config.max_chain_length {
                return Err(Rejection::ChainTooLong {
                    max: self.config.max_chain_length,
                });
            }
            self.check_link(child)?;

            if let Some(parent_id) = child.parent_id() {
                if seen.contains(parent_id) {
                    return Err(broken(&child.id, "delegation cycle"));
                }
            }
            let parent = self.parent_of(child).await?;

            within(
                self.timeout(),
                &child.id,
                verify_delegation(child, &parent, self.key_resolver),
            )
            .await??;
            check_attenuation(child, &parent, policy).map_err(|reason| {
                Rejection::AttenuationViolation {
                    capability: child.id.clone(),
                    reason,
                }
            })?;

            tracing::trace!(child = %child.id, parent = %parent.id, "verified delegation link");
            chain.push(parent);
        }
    }
}

/// Checks binding the invoker to the invoked capability: the invoker is its
/// controller, the action is allowed and the target is covered.
pub(crate) fn check_invoked(
    invoked: &Capability,
    key_id: &str,
    action: &str,
    target: &str,
    config: &VerifierConfig,
) -> Result<(), Rejection> {
    let invoker = did_for_did_uri(key_id).map_err(|e| Rejection::UnknownKey {
        key_id: key_id.to_string(),
        reason: e.to_string(),
    })?;
    let controls = did_for_did_uri(&invoked.controller).is_ok_and(|did| did == invoker);
    if !controls {
        return Err(Rejection::ControllerMismatch {
            expected: invoked.controller.clone(),
            actual: invoker.to_string(),
        });
    }

    if !invoked.permits_action(action) {
        return Err(Rejection::ActionMismatch {
            expected: invoked
                .allowed_action
                .as_deref()
                .unwrap_or_default()
                .join(", "),
            actual: action.to_string(),
        });
    }

    let covered = invoked.invocation_target == target
        || (config.allow_target_attenuation && is_sub_resource(target, &invoked.invocation_target));
    if !covered {
        return Err(Rejection::TargetMismatch {
            expected: invoked.invocation_target.clone(),
            actual: target.to_string(),
        });
    }
    Ok(())
}

/// `action` must be permitted by every capability of the verified chain; a
/// capability without `allowedAction` inherits its parent's restriction.
pub(crate) fn check_chain_action(chain: &[Capability], action: &str) -> Result<(), Rejection> {
    match chain.iter().find(|capability| !capability.permits_action(action)) {
        None => Ok(()),
        Some(capability) => Err(Rejection::ActionMismatch {
            expected: capability
                .allowed_action
                .as_deref()
                .unwrap_or_default()
                .join(", "),
            actual: action.to_string(),
        }),
    }
}
