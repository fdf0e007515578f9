//! In-memory bearer token with expiry tracking.
//!
//! The portal's login response declares a time-to-live as a loose duration
//! spec ("2h", "90m", "1h30m"). The token is reused across runs for as long
//! as the expiry has not passed; it is never refreshed in place, only
//! replaced wholesale or cleared.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    value: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a persisted token. The caller is responsible
    /// for checking that `expires_at` is still in the future.
    pub fn restore(value: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: Some(value),
            expires_at: Some(expires_at),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Testable version: validity at a given instant.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match (&self.value, self.expires_at) {
            (Some(_), Some(expires_at)) => now < expires_at,
            _ => false,
        }
    }

    pub fn set_token(&mut self, value: impl Into<String>, ttl_spec: &str) {
        self.set_token_at(value, ttl_spec, Utc::now());
    }

    /// Testable version: replace the token, computing expiry from `now`.
    pub fn set_token_at(&mut self, value: impl Into<String>, ttl_spec: &str, now: DateTime<Utc>) {
        let secs = parse_ttl(ttl_spec);
        if secs == 0 && !ttl_spec.trim().is_empty() {
            // Zero TTL means the token is stale immediately and the next
            // run logs in afresh.
            warn!("Unparseable token TTL spec {:?}, treating as already expired", ttl_spec);
        }
        // chrono::Duration is bounded by i64 milliseconds
        let secs = secs.min(i64::MAX as u64 / 1_000) as i64;
        self.value = Some(value.into());
        self.expires_at = Some(now + Duration::seconds(secs));
    }

    pub fn clear(&mut self) {
        self.value = None;
        self.expires_at = None;
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

/// Parse a duration spec into whole seconds.
///
/// An hours component and a minutes component are matched independently:
/// the first digit run immediately followed by `h` counts as hours, the
/// first followed by `m` as minutes. Unmatched components are zero, so an
/// empty or unrecognizable spec yields zero seconds.
pub fn parse_ttl(spec: &str) -> u64 {
    let hours = component(spec, 'h');
    let minutes = component(spec, 'm');
    hours.saturating_mul(3600).saturating_add(minutes.saturating_mul(60))
}

/// First digit run immediately preceding `unit`, or 0 if none exists.
fn component(spec: &str, unit: char) -> u64 {
    let bytes = spec.as_bytes();
    for (i, c) in spec.char_indices() {
        if c != unit {
            continue;
        }
        let mut start = i;
        while start > 0 && bytes[start - 1].is_ascii_digit() {
            start -= 1;
        }
        if start < i {
            return spec[start..i].parse().unwrap_or(0);
        }
    }
    0
}
