//! Unverified access-token claim decoding.
//!
//! Signature checks belong to the issuing backend; the client only needs the
//! expiry to decide when to refresh. Every malformed input decodes to `None`.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::Value;

/// Claims read from the payload segment of an access token
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionClaims {
    /// `exp`, seconds since the Unix epoch
    pub expires_at: Option<i64>,
    /// `iat`, seconds since the Unix epoch
    pub issued_at: Option<i64>,
    /// `sub`
    pub subject: Option<String>,
    /// `user_id`, kept as raw JSON since backends disagree on its type
    pub user_id: Option<Value>,
    /// `token_type` (e.g. `access`)
    pub token_type: Option<String>,
}

impl SessionClaims {
    /// Decode the payload of a three-segment token
    pub fn decode(token: &str) -> Option<Self> {
        let payload = decode_payload(token)?;
        let claims = payload.as_object()?;

        Some(Self {
            expires_at: claims.get("exp").and_then(numeric_seconds),
            issued_at: claims.get("iat").and_then(numeric_seconds),
            subject: claims.get("sub").and_then(Value::as_str).map(str::to_string),
            user_id: claims.get("user_id").cloned(),
            token_type: claims
                .get("token_type")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// Expiry of `token` in epoch seconds; `None` means treat as expired
pub fn decode_expiry(token: &str) -> Option<i64> {
    SessionClaims::decode(token)?.expires_at
}

fn decode_payload(token: &str) -> Option<Value> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn numeric_seconds(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
}
