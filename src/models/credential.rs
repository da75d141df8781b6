// src/models/credential.rs
//! Attestation credential data model.
//!
//! Credentials are kept as the compact JWT the issuer returned; only the
//! claims needed for holder resolution, matching and expiry are decoded.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::serialization::base64url_decode;

/// A signed credential proving the holder may perform a registry action.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AttestationCredential {
    /// Compact JWT as issued.
    pub raw: String,
    /// DID the credential was issued to.
    pub holder: String,
    /// Credential format (`jwt_vc`, `jwt_vc_json`, ...).
    pub format: String,
    /// Credential type it was requested for.
    pub credential_type: String,
    /// Expiry, when the credential carries one.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AttestationCredential {
    /// Wraps an issued JWT credential, reading holder and expiry from its claims.
    ///
    /// `fallback_holder` is used when the credential names no subject.
    pub fn from_jwt(raw: String, format: &str, credential_type: &str, fallback_holder: &str) -> Self {
        let claims = decode_jwt_claims(&raw).unwrap_or(Value::Null);
        let holder = claims
            .get("sub")
            .and_then(Value::as_str)
            .or_else(|| {
                claims
                    .pointer("/vc/credentialSubject/id")
                    .and_then(Value::as_str)
            })
            .unwrap_or(fallback_holder)
            .to_string();
        Self {
            expires_at: expiry_of(&claims),
            raw,
            holder,
            format: format.to_string(),
            credential_type: credential_type.to_string(),
        }
    }

    /// Whether the credential is still usable at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |exp| exp > now)
    }

    /// Decoded JWT claims (unverified).
    pub fn claims(&self) -> Option<Value> {
        decode_jwt_claims(&self.raw)
    }
}

/// Decodes the payload of a compact JWS without verifying it.
pub fn decode_jwt_claims(jwt: &str) -> Option<Value> {
    let payload = jwt.split('.').nth(1)?;
    let bytes = base64url_decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Expiry from `exp`, `vc.expirationDate` (VCDM 1.1) or `vc.validUntil` (VCDM 2.0).
fn expiry_of(claims: &Value) -> Option<DateTime<Utc>> {
    if let Some(exp) = claims.get("exp").and_then(Value::as_i64) {
        return Utc.timestamp_opt(exp, 0).single();
    }
    ["/vc/expirationDate", "/vc/validUntil"]
        .iter()
        .filter_map(|p| claims.pointer(p).and_then(Value::as_str))
        .find_map(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
