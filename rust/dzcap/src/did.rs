//! DID (Decentralized Identifier) types and helpers.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A [Decentralized Identifier][did-core] string.
///
/// Wraps a raw DID string like `did:key:z6Mk...` or `did:web:example.com`.
/// Fragments, paths and queries are not part of a [`Did`]; use
/// [`did_for_did_uri`] to strip them from a DID URL first.
///
/// [did-core]: https://www.w3.org/TR/did-core/
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Did(String);

impl Did {
    /// Get the raw DID string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the DID method name (e.g. `"key"` for `did:key:...`).
    #[must_use]
    pub fn method(&self) -> &str {
        self.0["did:".len()..]
            .split(':')
            .next()
            .unwrap_or_default()
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error when parsing a DID string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid DID: {0}")]
pub struct DidParseError(pub String);

impl FromStr for Did {
    type Err = DidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(rest) = s.strip_prefix("did:") else {
            return Err(DidParseError(format!("expected did: prefix, got: {s}")));
        };
        let Some((method, identifier)) = rest.split_once(':') else {
            return Err(DidParseError(format!(
                "expected did:method:identifier, got: {s}"
            )));
        };
        if method.is_empty() || identifier.is_empty() {
            return Err(DidParseError(format!(
                "expected did:method:identifier, got: {s}"
            )));
        }
        if s.contains(['#', '?', '/']) {
            return Err(DidParseError(format!(
                "a DID may not carry a path, query or fragment: {s}"
            )));
        }
        Ok(Did(s.to_string()))
    }
}

impl TryFrom<String> for Did {
    type Error = DidParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl Serialize for Did {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Returns `true` when `s` is a bare `did:key` DID (no fragment).
#[must_use]
pub fn is_did_key(s: &str) -> bool {
    s.strip_prefix("did:key:")
        .is_some_and(|rest| !rest.is_empty() && !rest.contains([':', '#']))
}

/// Returns `true` when `s` is a `did:key` verification method id, i.e.
/// `did:key:<multibase>#<fragment>`.
#[must_use]
pub fn is_did_key_verification_method_id(s: &str) -> bool {
    let Some((did, fragment)) = s.split_once('#') else {
        return false;
    };
    is_did_key(did) && !fragment.is_empty() && !fragment.contains([':', '#'])
}

/// Strips the path, query and fragment of a DID URL, leaving the DID.
///
/// # Errors
///
/// Returns [`DidParseError`] when what remains is not a DID.
pub fn did_for_did_uri(uri: &str) -> Result<Did, DidParseError> {
    let end = uri.find(['#', '?', '/']).unwrap_or(uri.len());
    uri[..end].parse()
}

/// Returns the DID that controls a verification method id
/// (the part before `#`).
///
/// # Errors
///
/// Returns [`DidParseError`] when the id does not start with a DID.
pub fn controller_of_verification_method(verification_method: &str) -> Result<Did, DidParseError> {
    did_for_did_uri(verification_method)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "did:key:z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK";

    #[test]
    fn it_parses_a_did_and_reports_its_method() {
        let did: Did = KEY.parse().unwrap();
        assert_eq!(did.method(), "key");
        assert_eq!(did.to_string(), KEY);

        let web: Did = "did:web:example.com".parse().unwrap();
        assert_eq!(web.method(), "web");
    }

    #[test]
    fn it_rejects_malformed_dids() {
        assert!("key:z6Mk".parse::<Did>().is_err());
        assert!("did:key".parse::<Did>().is_err());
        assert!("did::abc".parse::<Did>().is_err());
        assert!(format!("{KEY}#frag").parse::<Did>().is_err());
    }

    #[test]
    fn it_recognizes_did_key_forms() {
        assert!(is_did_key(KEY));
        assert!(!is_did_key(&format!("{KEY}#z6Mk")));
        assert!(!is_did_key("did:web:example.com"));

        assert!(is_did_key_verification_method_id(&format!("{KEY}#z6Mk")));
        assert!(!is_did_key_verification_method_id(KEY));
        assert!(!is_did_key_verification_method_id(&format!("{KEY}#")));
    }

    #[test]
    fn it_finds_the_controller_of_a_verification_method() {
        let vm = format!("{KEY}#z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK");
        assert_eq!(controller_of_verification_method(&vm).unwrap().as_str(), KEY);
        assert_eq!(did_for_did_uri("did:web:example.com/path?x=1").unwrap().as_str(), "did:web:example.com");
        assert!(controller_of_verification_method("https://example.com#key").is_err());
    }
}
