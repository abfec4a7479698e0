//! Shared fixtures: a resource server owning `https://example.com` and
//! deterministic Ed25519 `did:key` principals.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use dzcap::{
    Capability, DocumentLoader, InvocationOptions, InvocationRequest, OwnerRootResolver,
    StaticDocumentResolver, VerifyOptions, create_invocation_request, delegate, time::from_unix,
};
use dzcap_credentials::{DidKeyResolver, Ed25519Signer};
use http::Method;
use url::Url;

/// Fixed verification time.
pub const NOW: u64 = 1_700_000_000;

pub const ORIGIN: &str = "https://example.com";
pub const ITEMS: &str = "https://example.com/items";

pub fn signer(seed: u8) -> Ed25519Signer {
    Ed25519Signer::import(&[seed; 32]).expect("32 byte seed")
}

pub fn at(seconds: u64) -> DateTime<Utc> {
    from_unix(seconds)
}

pub fn url(target: &str) -> Url {
    Url::parse(target).expect("valid url")
}

/// A resource server whose owner controls every root under [`ORIGIN`].
pub struct Server {
    pub owner: Ed25519Signer,
    pub keys: DidKeyResolver,
    pub roots: OwnerRootResolver,
    pub loader: DocumentLoader,
}

impl Server {
    pub fn new() -> Self {
        let owner = signer(1);
        let roots = OwnerRootResolver::new(url(ORIGIN), owner.to_string());
        Self {
            owner,
            keys: DidKeyResolver,
            roots,
            loader: DocumentLoader::new(),
        }
    }

    /// Serve `capabilities` by id.
    pub fn storing(mut self, capabilities: &[&Capability]) -> Self {
        let mut documents = StaticDocumentResolver::new();
        for capability in capabilities {
            documents
                .insert_serialized(capability.id.clone(), *capability)
                .expect("capability serializes");
        }
        self.loader = DocumentLoader::new().with(documents);
        self
    }

    pub fn root(&self, target: &str) -> Capability {
        Capability::root(target, self.owner.to_string())
    }

    /// Verification options for `target` as of [`NOW`].
    pub fn options(&self, target: &str) -> VerifyOptions<'_> {
        VerifyOptions::new(&self.keys, &self.loader, &self.roots, target).at(NOW)
    }
}

/// Delegate `parent` from `from` to `to`, allowing `actions` until `expires`.
pub async fn delegation(
    from: &Ed25519Signer,
    parent: &Capability,
    to: &Ed25519Signer,
    actions: &[&str],
    expires: u64,
) -> Capability {
    let capability = Capability::child_of(parent, to.to_string(), at(expires))
        .with_allowed_action(actions.iter().copied());
    delegate(from, capability, Some(at(NOW)))
        .await
        .expect("delegation signs")
}

/// Options for `method` signed by `signer` in a window opening at [`NOW`].
pub fn invocation(method: Method, signer: &Ed25519Signer) -> InvocationOptions<'_, Ed25519Signer> {
    InvocationOptions::new(method, signer).window(NOW, NOW + 600)
}

pub async fn sign(target: &str, options: InvocationOptions<'_, Ed25519Signer>) -> InvocationRequest {
    create_invocation_request(&url(target), options)
        .await
        .expect("invocation signs")
}
