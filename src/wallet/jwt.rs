// src/wallet/jwt.rs
//! JWT construction for the holder: request objects, ID tokens, proofs of
//! possession and verifiable presentations.
//!
//! Every token is ES256, signed with the DID's secp256r1 authentication key
//! and carrying `kid = did#thumbprint`.

use chrono::Utc;
use jsonwebtoken::{Algorithm, Header};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::presentation::{DescriptorMapping, PresentationDefinition, PresentationSubmission};
use crate::wallet::key_management::{DidKeyPair, KeyPurpose};

/// Lifetime of short-lived holder tokens, in seconds.
pub const HOLDER_TOKEN_TTL_SECS: i64 = 300;

/// Signs `claims` as a compact ES256 JWS.
///
/// # Errors
/// [`Error::KeyFormat`] if `key` is not an authentication-capable
/// secp256r1 key; [`Error::Jwt`] if encoding fails.
pub fn sign_jwt<T: Serialize>(key: &DidKeyPair, kid: &str, typ: &str, claims: &T) -> Result<String> {
    if !key.has_purpose(KeyPurpose::Authentication) {
        return Err(Error::KeyFormat("JWTs must be signed with an authentication key".into()));
    }
    let mut header = Header::new(Algorithm::ES256);
    header.typ = Some(typ.to_string());
    header.kid = Some(kid.to_string());
    Ok(jsonwebtoken::encode(&header, claims, &key.jwt_encoding_key()?)?)
}

/// Self-issued ID token answering an `id_token` authorization request.
pub fn id_token(holder_did: &str, key: &DidKeyPair, audience: &str, nonce: &str) -> Result<String> {
    let now = Utc::now().timestamp();
    let claims = json!({
        "iss": holder_did,
        "sub": holder_did,
        "aud": audience,
        "nonce": nonce,
        "iat": now,
        "exp": now + HOLDER_TOKEN_TTL_SECS,
    });
    sign_jwt(key, &key.kid(holder_did), "JWT", &claims)
}

/// OpenID4VCI proof of possession for a credential request.
pub fn credential_proof(
    client_id: &str,
    holder_did: &str,
    key: &DidKeyPair,
    credential_issuer: &str,
    c_nonce: Option<&str>,
) -> Result<String> {
    let now = Utc::now().timestamp();
    let mut claims = json!({
        "iss": client_id,
        "aud": credential_issuer,
        "iat": now,
        "exp": now + HOLDER_TOKEN_TTL_SECS,
    });
    if let Some(nonce) = c_nonce {
        claims["nonce"] = Value::String(nonce.to_string());
    }
    sign_jwt(key, &key.kid(holder_did), "openid4vci-proof+jwt", &claims)
}

/// A signed presentation with the submission describing it.
#[derive(Debug, Clone)]
pub struct SignedPresentation {
    pub vp_token: String,
    pub submission: PresentationSubmission,
}

/// Builds and signs a JWT VP over `credentials`.
///
/// `selected` pairs each input-descriptor id with the index of the
/// credential satisfying it. An empty `selected` still produces a submission
/// (with an empty `descriptor_map`), which scopes without input descriptors
/// require.
pub fn build_presentation(
    holder_did: &str,
    key: &DidKeyPair,
    audience: &str,
    nonce: &str,
    definition: &PresentationDefinition,
    credentials: &[String],
    selected: &[(String, usize)],
) -> Result<SignedPresentation> {
    let now = Utc::now().timestamp();
    let vp_id = format!("urn:uuid:{}", Uuid::new_v4());
    let claims = json!({
        "jti": vp_id,
        "iss": holder_did,
        "sub": holder_did,
        "aud": audience,
        "nonce": nonce,
        "iat": now,
        "nbf": now,
        "exp": now + HOLDER_TOKEN_TTL_SECS,
        "vp": {
            "@context": ["https://www.w3.org/2018/credentials/v1"],
            "id": vp_id,
            "type": ["VerifiablePresentation"],
            "holder": holder_did,
            "verifiableCredential": credentials,
        }
    });
    let vp_token = sign_jwt(key, &key.kid(holder_did), "JWT", &claims)?;

    let submission = PresentationSubmission {
        id: Uuid::new_v4().to_string(),
        definition_id: definition.id.clone(),
        descriptor_map: selected
            .iter()
            .map(|(descriptor_id, index)| DescriptorMapping::jwt_vc_in_vp(descriptor_id, *index))
            .collect(),
    };
    Ok(SignedPresentation { vp_token, submission })
}
