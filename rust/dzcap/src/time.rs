//! Unix-second timestamps and invocation validity windows.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::{capability::format_timestamp, error::Rejection};

/// Current time in unix seconds.
pub fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or_default()
}

/// Unix seconds as a UTC date.
pub fn from_unix(seconds: u64) -> DateTime<Utc> {
    i64::try_from(seconds)
        .ok()
        .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A UTC date as unix seconds; dates before the epoch clamp to zero.
pub fn to_unix(time: DateTime<Utc>) -> u64 {
    u64::try_from(time.timestamp()).unwrap_or_default()
}

/// RFC 3339 rendering of unix seconds, for error reports.
pub fn rfc3339(seconds: u64) -> String {
    format_timestamp(from_unix(seconds))
}

/// The `(created)`..`(expires)` window of a signed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    /// When the signature was made.
    pub created: u64,
    /// Last second the signature is valid.
    pub expires: u64,
}

impl ValidityWindow {
    /// A window from `created` to `expires`, both unix seconds.
    #[must_use]
    pub const fn new(created: u64, expires: u64) -> Self {
        Self { created, expires }
    }

    /// Check the window against `now`.
    ///
    /// `created` may be up to `max_clock_skew` seconds in the future. Expiry
    /// gets no skew: the window is still valid when `expires == now`.
    ///
    /// # Errors
    ///
    /// [`Rejection::NotYetValid`] or [`Rejection::Expired`].
    pub fn check(&self, now: u64, max_clock_skew: u64) -> Result<(), Rejection> {
        if self.created > now.saturating_add(max_clock_skew) {
            return Err(Rejection::NotYetValid {
                created: rfc3339(self.created),
            });
        }
        if self.expires < now {
            return Err(Rejection::Expired {
                subject: "invocation".to_string(),
                expires: rfc3339(self.expires),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ValidityWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.created, self.expires)
    }
}
