use std::fmt;

use chrono::Utc;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::claims::decode_expiry;

/// Access/refresh credential pair.
///
/// Always replaced as a whole; secrets are wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Tokens {
    access: String,
    refresh: String,
}

impl Tokens {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }

    pub fn access(&self) -> &str {
        &self.access
    }

    pub fn refresh(&self) -> &str {
        &self.refresh
    }

    /// Whether the access token is usable right now
    pub fn is_access_valid(&self, leeway_secs: i64) -> bool {
        is_valid_at(&self.access, Utc::now().timestamp(), leeway_secs)
    }
}

impl fmt::Debug for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Tokens([REDACTED])")
    }
}

/// Validity of an access token at `now` (epoch seconds).
///
/// Valid iff the token decodes, carries a numeric expiry and that expiry lies
/// strictly beyond `now + leeway_secs`.
pub fn is_valid_at(access: &str, now: i64, leeway_secs: i64) -> bool {
    if access.is_empty() {
        return false;
    }
    match decode_expiry(access) {
        Some(exp) => exp > now.saturating_add(leeway_secs),
        None => false,
    }
}
