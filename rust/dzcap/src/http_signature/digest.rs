//! The `digest` header: `SHA-256=<base64 sha256(body)>`.

use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};

const SHA_256: &str = "SHA-256";

/// The `digest` header value for `body`.
pub fn digest_header_value(body: &[u8]) -> String {
    format!("{SHA_256}={}", STANDARD.encode(Sha256::digest(body)))
}

/// Whether `header_value` carries a SHA-256 digest matching `body`.
///
/// The header may list several `algorithm=value` pairs; only SHA-256 is
/// checked, and a header without one does not match.
pub fn digest_matches(header_value: &str, body: &[u8]) -> bool {
    let expected = Sha256::digest(body);
    header_value
        .split(',')
        .filter_map(|entry| entry.trim().split_once('='))
        .filter(|(algorithm, _)| algorithm.eq_ignore_ascii_case(SHA_256))
        .any(|(_, value)| {
            STANDARD
                .decode(value.trim())
                .is_ok_and(|digest| digest.as_slice() == expected.as_slice())
        })
}
