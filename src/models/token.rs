// src/models/token.rs
//! OAuth2 / OpenID discovery and token response types.

use serde::{Deserialize, Serialize};

/// Scope-bound access token for one class of registry writes.
///
/// Lives only as long as the registration that requested it.
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct ScopedAccessToken {
    pub scope: String,
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

impl std::fmt::Debug for ScopedAccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedAccessToken")
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// `/.well-known/openid-configuration` of an authorisation server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: String,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    /// Non-standard, but every registry authorisation server exposes it.
    #[serde(default)]
    pub presentation_definition_endpoint: Option<String>,
}

/// Raw token endpoint response; every field is optional so a missing
/// `access_token` can be reported as a token-exchange failure.
#[derive(Deserialize, Debug, Default)]
pub(crate) struct TokenResponse {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    pub c_nonce: Option<String>,
}
