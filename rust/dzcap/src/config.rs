//! Verifier and invocation settings.
//!
//! Both structs deserialize from partial documents; anything left out takes
//! its default.
//!
//! ```toml
//! max_chain_length = 4
//! resolution_timeout = 250
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of delegations a chain may contain.
pub const DEFAULT_MAX_CHAIN_LENGTH: usize = 10;

/// Default tolerance, in seconds, for an invocation created in the future.
pub const DEFAULT_MAX_CLOCK_SKEW: u64 = 300;

/// Default per-call collaborator timeout in milliseconds.
pub const DEFAULT_RESOLUTION_TIMEOUT: u64 = 5_000;

/// Default lifetime, in seconds, of an invocation signature.
pub const DEFAULT_SIGNATURE_LIFETIME: u64 = 600;

/// Limits applied while verifying an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Maximum number of delegated capabilities between the invoked
    /// capability and the root.
    pub max_chain_length: usize,

    /// How far in the future (seconds) an invocation's `created` may be.
    pub max_clock_skew: u64,

    /// Timeout (milliseconds) for each collaborator call; `None` waits
    /// indefinitely. Not enforced on `wasm32`, which has no timer.
    pub resolution_timeout: Option<u64>,

    /// Allow a delegation to narrow its target to a sub-resource.
    pub allow_target_attenuation: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_chain_length: DEFAULT_MAX_CHAIN_LENGTH,
            max_clock_skew: DEFAULT_MAX_CLOCK_SKEW,
            resolution_timeout: Some(DEFAULT_RESOLUTION_TIMEOUT),
            allow_target_attenuation: false,
        }
    }
}

impl VerifierConfig {
    /// The collaborator timeout as a [`Duration`].
    pub fn resolution_timeout(&self) -> Option<Duration> {
        self.resolution_timeout.map(Duration::from_millis)
    }

    /// Set [`VerifierConfig::allow_target_attenuation`].
    #[must_use]
    pub fn with_target_attenuation(mut self, allow: bool) -> Self {
        self.allow_target_attenuation = allow;
        self
    }

    /// Set [`VerifierConfig::max_chain_length`].
    #[must_use]
    pub fn with_max_chain_length(mut self, max: usize) -> Self {
        self.max_chain_length = max;
        self
    }

    /// Set the collaborator timeout.
    #[must_use]
    pub fn with_resolution_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.resolution_timeout =
            timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self
    }
}

/// Settings for constructing invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationConfig {
    /// Seconds between `created` and `expires` when the caller does not
    /// choose an expiry.
    pub signature_lifetime: u64,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            signature_lifetime: DEFAULT_SIGNATURE_LIFETIME,
        }
    }
}
