// src/services/attestation.rs
//! Attestation credential acquisition.
//!
//! Runs the OpenID4VCI authorization-code flow against a trusted issuer:
//! discovery, a PKCE-protected authorization request, the holder's proof of
//! control (an ID token or a VP, posted back with `direct_post`), the code
//! exchange and finally the credential request with a proof of possession.
//!
//! The flow never follows redirects on its own; every `Location` header is
//! parsed so `code`, `error` and request parameters can be read from it.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::models::credential::{decode_jwt_claims, AttestationCredential};
use crate::models::presentation::PresentationDefinition;
use crate::models::token::{AuthorizationServerMetadata, TokenResponse};
use crate::utils::crypto::{random_token, sha256};
use crate::utils::http::{join_url, read_json};
use crate::utils::serialization::base64url;
use crate::wallet::credential_storage::CredentialStorage;
use crate::wallet::jwt::{self, HOLDER_TOKEN_TTL_SECS};
use crate::wallet::key_management::DidKeySet;

/// Progress marker of one attestation flow, reported when it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationState {
    Discovering,
    Authorizing,
    ProvingControl,
    ExchangingCode,
    RequestingCredential,
}

impl fmt::Display for AttestationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discovering => "discovering issuer metadata",
            Self::Authorizing => "requesting authorization",
            Self::ProvingControl => "proving DID control",
            Self::ExchangingCode => "exchanging the authorization code",
            Self::RequestingCredential => "requesting the credential",
        };
        f.write_str(s)
    }
}

/// What to ask the issuer for.
#[derive(Debug, Clone)]
pub struct AttestationRequest {
    pub issuer_url: String,
    /// Credential type, e.g. `VerifiableAuthorisationToOnboard`.
    pub credential_type: String,
    /// Accepted formats; empty accepts any.
    pub acceptable_formats: Vec<String>,
    /// OAuth client id; the holder DID when `None`.
    pub client_id: Option<String>,
    pub redirect_uri: String,
    /// Upper bound for the whole flow.
    pub timeout: Duration,
}

impl AttestationRequest {
    /// Same request for a different credential type.
    pub fn for_type(&self, credential_type: &str) -> Self {
        Self {
            credential_type: credential_type.to_string(),
            ..self.clone()
        }
    }
}

/// Source of attestation credentials.
#[async_trait]
pub trait AttestationSource: Send + Sync {
    /// Obtains a credential of `request.credential_type` for `holder_did`.
    ///
    /// `held` are the credentials the holder may present if the issuer asks
    /// for a VP.
    async fn obtain(
        &self,
        request: &AttestationRequest,
        holder_did: &str,
        keys: &DidKeySet,
        held: &CredentialStorage,
    ) -> Result<AttestationCredential>;
}

/// `/.well-known/openid-credential-issuer`, draft 11 and draft 13 shapes.
#[derive(Deserialize, Debug, Clone)]
struct IssuerMetadata {
    credential_issuer: String,
    #[serde(default)]
    authorization_server: Option<String>,
    #[serde(default)]
    authorization_servers: Vec<String>,
    credential_endpoint: String,
    #[serde(default)]
    credential_configurations_supported: Map<String, Value>,
    #[serde(default)]
    credentials_supported: Vec<Value>,
}

impl IssuerMetadata {
    fn authorization_server(&self) -> &str {
        self.authorization_servers
            .first()
            .or(self.authorization_server.as_ref())
            .unwrap_or(&self.credential_issuer)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CredentialConfiguration {
    format: String,
    types: Vec<String>,
}

/// First configuration offering `credential_type` in an acceptable format.
fn select_configuration(
    metadata: &IssuerMetadata,
    credential_type: &str,
    formats: &[String],
) -> Option<CredentialConfiguration> {
    metadata
        .credential_configurations_supported
        .values()
        .chain(metadata.credentials_supported.iter())
        .find_map(|config| {
            let format = config.get("format")?.as_str()?;
            if !formats.is_empty() && !formats.iter().any(|f| f == format) {
                return None;
            }
            let types: Vec<String> = config
                .pointer("/credential_definition/type")
                .or_else(|| config.get("types"))?
                .as_array()?
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            types.iter().any(|t| t == credential_type).then(|| CredentialConfiguration {
                format: format.to_string(),
                types,
            })
        })
}

/// RFC 7636 S256 code challenge.
fn pkce_challenge(verifier: &str) -> String {
    base64url(sha256(verifier.as_bytes()))
}

/// Query parameters of a redirect target, resolved against `base`.
fn location_params(base: &str, location: &str) -> std::result::Result<HashMap<String, String>, String> {
    let url = reqwest::Url::parse(location)
        .or_else(|_| reqwest::Url::parse(base).and_then(|b| b.join(location)))
        .map_err(|e| format!("unparseable redirect `{location}`: {e}"))?;
    Ok(url.query_pairs().into_owned().collect())
}

fn flow_error(state: AttestationState, reason: impl Into<String>) -> Error {
    Error::AttestationFlow {
        state,
        reason: reason.into(),
    }
}

/// HTTP implementation of [`AttestationSource`].
#[derive(Clone)]
pub struct AttestationObtainer {
    http: reqwest::Client,
}

impl AttestationObtainer {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.http.get(url).send().await.map_err(|e| Error::http(url, e))?;
        read_json(url, response).await
    }

    /// Reads the redirect parameters out of a 3xx response.
    ///
    /// An `error` parameter aborts the flow with the issuer's description.
    async fn redirect_params(
        &self,
        state: AttestationState,
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<HashMap<String, String>> {
        let status = response.status();
        if !status.is_redirection() {
            let body = response.text().await.unwrap_or_default();
            if status.is_success() {
                return Err(flow_error(state, format!("{endpoint} answered {status} instead of redirecting")));
            }
            return Err(Error::HttpStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| flow_error(state, format!("{endpoint} redirected without a Location")))?;
        let params = location_params(endpoint, location).map_err(|reason| flow_error(state, reason))?;

        if let Some(error) = params.get("error") {
            let description = params.get("error_description").map(String::as_str).unwrap_or("");
            return Err(flow_error(state, format!("{error}: {description}")));
        }
        Ok(params)
    }

    /// Merges parameters carried by `request` or `request_uri` into the
    /// inline ones. Values from the request object win.
    async fn resolve_request_object(&self, mut params: HashMap<String, String>) -> Result<HashMap<String, String>> {
        let request_jwt = match (params.remove("request"), params.get("request_uri").cloned()) {
            (Some(jwt), _) => Some(jwt),
            (None, Some(uri)) => {
                let response = self.http.get(&uri).send().await.map_err(|e| Error::http(&uri, e))?;
                let status = response.status();
                let body = response.text().await.map_err(|e| Error::http(&uri, e))?;
                if !status.is_success() {
                    return Err(Error::HttpStatus {
                        endpoint: uri,
                        status: status.as_u16(),
                        body,
                    });
                }
                Some(body.trim().to_string())
            }
            (None, None) => None,
        };

        if let Some(jwt) = request_jwt {
            let claims = decode_jwt_claims(&jwt)
                .ok_or_else(|| flow_error(AttestationState::ProvingControl, "request object is not a JWT"))?;
            if let Value::Object(map) = claims {
                for (key, value) in map {
                    let value = match value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    params.insert(key, value);
                }
            }
        }
        Ok(params)
    }

    /// Answers an `id_token` or `vp_token` request and returns the
    /// parameters of the final redirect (carrying `code`).
    async fn prove_control(
        &self,
        params: HashMap<String, String>,
        holder_did: &str,
        keys: &DidKeySet,
        held: &CredentialStorage,
        fallback_audience: &str,
    ) -> Result<HashMap<String, String>> {
        let state = AttestationState::ProvingControl;
        let params = self.resolve_request_object(params).await?;

        let response_uri = params
            .get("response_uri")
            .or_else(|| params.get("redirect_uri"))
            .ok_or_else(|| flow_error(state, "proof request carries no redirect_uri"))?
            .clone();
        let audience = params.get("client_id").map(String::as_str).unwrap_or(fallback_audience);
        let nonce = params.get("nonce").map(String::as_str).unwrap_or_default();
        let request_state = params.get("state").cloned();

        let mut form: Vec<(&str, String)> = Vec::new();
        match params.get("response_type").map(String::as_str) {
            Some("id_token") => {
                log::debug!("answering id_token request from {audience}");
                form.push(("id_token", jwt::id_token(holder_did, &keys.authentication, audience, nonce)?));
            }
            Some("vp_token") => {
                let definition: PresentationDefinition = match (
                    params.get("presentation_definition"),
                    params.get("presentation_definition_uri"),
                ) {
                    (Some(inline), _) => serde_json::from_str(inline)?,
                    (None, Some(uri)) => self.get_json(uri).await?,
                    (None, None) => return Err(flow_error(state, "vp_token request without presentation_definition")),
                };
                let now = Utc::now();
                let mut credentials = Vec::new();
                let mut selected = Vec::new();
                for descriptor in &definition.input_descriptors {
                    if let Some(credential) = held.find_matching(descriptor, now) {
                        selected.push((descriptor.id.clone(), credentials.len()));
                        credentials.push(credential.raw.clone());
                    }
                }
                log::debug!(
                    "answering vp_token request from {audience} with {} credential(s)",
                    credentials.len()
                );
                let presentation = jwt::build_presentation(
                    holder_did,
                    &keys.authentication,
                    audience,
                    nonce,
                    &definition,
                    &credentials,
                    &selected,
                )?;
                form.push(("vp_token", presentation.vp_token));
                form.push(("presentation_submission", serde_json::to_string(&presentation.submission)?));
            }
            other => return Err(flow_error(state, format!("unsupported response_type {other:?}"))),
        }
        if let Some(s) = request_state {
            form.push(("state", s));
        }

        let response = self
            .http
            .post(&response_uri)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::http(&response_uri, e))?;
        self.redirect_params(state, &response_uri, response).await
    }

    async fn run(
        &self,
        request: &AttestationRequest,
        holder_did: &str,
        keys: &DidKeySet,
        held: &CredentialStorage,
        progress: &mut AttestationState,
    ) -> Result<AttestationCredential> {
        let client_id = request.client_id.as_deref().unwrap_or(holder_did);

        *progress = AttestationState::Discovering;
        let issuer: IssuerMetadata = self
            .get_json(&join_url(&request.issuer_url, ".well-known/openid-credential-issuer"))
            .await?;
        let configuration = select_configuration(&issuer, &request.credential_type, &request.acceptable_formats)
            .ok_or_else(|| {
                flow_error(
                    *progress,
                    format!(
                        "{} offers no {} credential in formats {:?}",
                        issuer.credential_issuer, request.credential_type, request.acceptable_formats
                    ),
                )
            })?;
        let server: AuthorizationServerMetadata = self
            .get_json(&join_url(issuer.authorization_server(), ".well-known/openid-configuration"))
            .await?;
        let authorization_endpoint = server
            .authorization_endpoint
            .clone()
            .ok_or_else(|| flow_error(*progress, format!("{} has no authorization_endpoint", server.issuer)))?;

        *progress = AttestationState::Authorizing;
        let code_verifier = random_token(64);
        let state = random_token(32);
        let nonce = random_token(32);
        let authorization_details = json!([{
            "type": "openid_credential",
            "format": configuration.format,
            "types": configuration.types,
            "locations": [issuer.credential_issuer],
        }]);
        let client_metadata = json!({"authorization_endpoint": "openid:"});
        let now = Utc::now().timestamp();
        let request_object = jwt::sign_jwt(
            &keys.authentication,
            &keys.authentication.kid(holder_did),
            "JWT",
            &json!({
                "iss": client_id,
                "aud": server.issuer,
                "iat": now,
                "exp": now + HOLDER_TOKEN_TTL_SECS,
                "response_type": "code",
                "scope": "openid",
                "client_id": client_id,
                "redirect_uri": request.redirect_uri,
                "state": state,
                "nonce": nonce,
                "code_challenge": pkce_challenge(&code_verifier),
                "code_challenge_method": "S256",
                "authorization_details": authorization_details,
                "client_metadata": client_metadata,
            }),
        )?;
        let query = [
            ("response_type", "code".to_string()),
            ("scope", "openid".to_string()),
            ("client_id", client_id.to_string()),
            ("redirect_uri", request.redirect_uri.clone()),
            ("state", state.clone()),
            ("nonce", nonce),
            ("code_challenge", pkce_challenge(&code_verifier)),
            ("code_challenge_method", "S256".to_string()),
            ("authorization_details", authorization_details.to_string()),
            ("client_metadata", client_metadata.to_string()),
            ("request", request_object),
        ];
        log::info!("requesting {} from {}", request.credential_type, issuer.credential_issuer);
        let response = self
            .http
            .get(&authorization_endpoint)
            .query(&query)
            .send()
            .await
            .map_err(|e| Error::http(&authorization_endpoint, e))?;
        let proof_request = self
            .redirect_params(*progress, &authorization_endpoint, response)
            .await?;

        *progress = AttestationState::ProvingControl;
        let authorized = self
            .prove_control(proof_request, holder_did, keys, held, &server.issuer)
            .await?;
        if authorized.get("state").map_or(false, |s| s != &state) {
            return Err(flow_error(*progress, "authorization response state does not match"));
        }
        let code = authorized
            .get("code")
            .ok_or_else(|| flow_error(*progress, "authorization response carries no code"))?;

        *progress = AttestationState::ExchangingCode;
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", client_id),
            ("code", code.as_str()),
            ("code_verifier", code_verifier.as_str()),
            ("redirect_uri", request.redirect_uri.as_str()),
        ];
        let response = self
            .http
            .post(&server.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::http(&server.token_endpoint, e))?;
        let token: TokenResponse = read_json(&server.token_endpoint, response).await?;
        let access_token = token
            .access_token
            .ok_or_else(|| flow_error(*progress, "token response carries no access_token"))?;

        *progress = AttestationState::RequestingCredential;
        let proof = jwt::credential_proof(
            client_id,
            holder_did,
            &keys.authentication,
            &issuer.credential_issuer,
            token.c_nonce.as_deref(),
        )?;
        let response = self
            .http
            .post(&issuer.credential_endpoint)
            .bearer_auth(&access_token)
            .json(&json!({
                "format": configuration.format,
                "types": configuration.types,
                "proof": {"proof_type": "jwt", "jwt": proof},
            }))
            .send()
            .await
            .map_err(|e| Error::http(&issuer.credential_endpoint, e))?;
        let body: Value = read_json(&issuer.credential_endpoint, response).await?;

        match body.get("credential").and_then(Value::as_str) {
            Some(raw) => {
                let format = body
                    .get("format")
                    .and_then(Value::as_str)
                    .unwrap_or(&configuration.format);
                let credential =
                    AttestationCredential::from_jwt(raw.to_string(), format, &request.credential_type, client_id);
                log::info!("{} issued to {}", request.credential_type, credential.holder);
                Ok(credential)
            }
            None if body.get("acceptance_token").is_some() || body.get("transaction_id").is_some() => {
                Err(flow_error(*progress, "issuer deferred issuance"))
            }
            None => Err(flow_error(*progress, "credential response carries no credential")),
        }
    }
}

#[async_trait]
impl AttestationSource for AttestationObtainer {
    async fn obtain(
        &self,
        request: &AttestationRequest,
        holder_did: &str,
        keys: &DidKeySet,
        held: &CredentialStorage,
    ) -> Result<AttestationCredential> {
        let mut progress = AttestationState::Discovering;
        let outcome = tokio::time::timeout(
            request.timeout,
            self.run(request, holder_did, keys, held, &mut progress),
        )
        .await;
        match outcome {
            Ok(result) => {
                if let Err(err) = &result {
                    log::warn!("attestation flow stopped while {progress}: {err}");
                }
                result
            }
            Err(_) => Err(flow_error(
                progress,
                format!("timed out after {:?}", request.timeout),
            )),
        }
    }
}
