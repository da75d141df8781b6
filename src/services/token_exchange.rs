// src/services/token_exchange.rs
//! Scope-bound access tokens for registry writes.
//!
//! The authorisation server publishes a Presentation Definition per scope.
//! The holder answers it with a VP over matching attestation credentials
//! and trades that VP for a bearer token (`grant_type=vp_token`).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Error, Result};
use crate::models::presentation::PresentationDefinition;
use crate::models::token::{AuthorizationServerMetadata, ScopedAccessToken, TokenResponse};
use crate::services::attestation::{AttestationRequest, AttestationSource};
use crate::utils::crypto::random_token;
use crate::utils::http::{append_query, join_url, percent_encode, read_json};
use crate::wallet::credential_storage::CredentialStorage;
use crate::wallet::jwt;
use crate::wallet::key_management::DidKeySet;

/// Scope for inserting a new DID document.
pub const INVITE_SCOPE: &str = "didr_invite";
/// Scope for writing to an existing DID document.
pub const WRITE_SCOPE: &str = "didr_write";

/// The holder a token is requested for.
pub struct HolderContext<'a> {
    pub did: &'a str,
    pub keys: &'a DidKeySet,
    /// Credentials available for presentation; newly obtained ones are added.
    pub credentials: &'a mut CredentialStorage,
}

/// Source of scoped access tokens.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self, scope: &str, holder: &mut HolderContext<'_>) -> Result<ScopedAccessToken>;
}

/// Exchanges verifiable presentations for access tokens at one
/// authorisation server.
pub struct ScopedAccessTokenExchanger {
    http: reqwest::Client,
    authorisation_base: String,
    attestation: Arc<dyn AttestationSource>,
    attestation_request: AttestationRequest,
}

impl ScopedAccessTokenExchanger {
    /// # Arguments
    /// * `authorisation_base` - base URL of the authorisation server
    /// * `attestation` - used when no held credential satisfies a descriptor
    /// * `attestation_request` - template for those fallback requests
    pub fn new(
        http: reqwest::Client,
        authorisation_base: &str,
        attestation: Arc<dyn AttestationSource>,
        attestation_request: AttestationRequest,
    ) -> Self {
        Self {
            http,
            authorisation_base: authorisation_base.trim_end_matches('/').to_string(),
            attestation,
            attestation_request,
        }
    }

    async fn metadata(&self) -> Result<AuthorizationServerMetadata> {
        let url = join_url(&self.authorisation_base, ".well-known/openid-configuration");
        let response = self.http.get(&url).send().await.map_err(|e| Error::http(&url, e))?;
        read_json(&url, response).await
    }

    async fn presentation_definition(
        &self,
        metadata: &AuthorizationServerMetadata,
        scope: &str,
    ) -> Result<PresentationDefinition> {
        let endpoint = metadata
            .presentation_definition_endpoint
            .clone()
            .unwrap_or_else(|| join_url(&self.authorisation_base, "presentation-definitions"));
        // Form encoding would turn the space into `+`.
        let url = append_query(&endpoint, &format!("scope=openid%20{}", percent_encode(scope)))?;
        let response = self.http.get(&url).send().await.map_err(|e| Error::http(&url, e))?;
        read_json(&url, response).await
    }

    /// Picks (or obtains) one credential per input descriptor.
    ///
    /// Returns the credentials to embed and the descriptor → index pairs.
    async fn select_credentials(
        &self,
        definition: &PresentationDefinition,
        holder: &mut HolderContext<'_>,
    ) -> Result<(Vec<String>, Vec<(String, usize)>)> {
        let mut credentials: Vec<String> = Vec::new();
        let mut selected = Vec::new();

        let expired = holder.credentials.purge_expired(Utc::now());
        if expired > 0 {
            log::debug!("dropped {expired} expired credential(s)");
        }
        log::debug!(
            "{} held credential(s) for {} input descriptor(s)",
            holder.credentials.count_credentials(),
            definition.input_descriptors.len()
        );

        for descriptor in &definition.input_descriptors {
            let now = Utc::now();
            let raw = match holder.credentials.find_matching(descriptor, now) {
                Some(held) => held.raw.clone(),
                None => {
                    let credential_type = descriptor
                        .required_type()
                        .unwrap_or_else(|| self.attestation_request.credential_type.clone());
                    log::info!(
                        "no held credential satisfies `{}`; requesting {credential_type}",
                        descriptor.id
                    );
                    let request = self.attestation_request.for_type(&credential_type);
                    let obtained = self
                        .attestation
                        .obtain(&request, holder.did, holder.keys, holder.credentials)
                        .await?;
                    let raw = obtained.raw.clone();
                    holder.credentials.store_credential(obtained);
                    raw
                }
            };
            let index = match credentials.iter().position(|c| c == &raw) {
                Some(index) => index,
                None => {
                    credentials.push(raw);
                    credentials.len() - 1
                }
            };
            selected.push((descriptor.id.clone(), index));
        }
        Ok((credentials, selected))
    }
}

#[async_trait]
impl AccessTokenSource for ScopedAccessTokenExchanger {
    /// # Errors
    /// - [`Error::HttpStatus`] with the problem-details body on non-2xx
    /// - [`Error::TokenExchange`] when the response has no `access_token`
    async fn access_token(&self, scope: &str, holder: &mut HolderContext<'_>) -> Result<ScopedAccessToken> {
        let metadata = self.metadata().await?;
        let definition = self.presentation_definition(&metadata, scope).await?;
        let (credentials, selected) = self.select_credentials(&definition, holder).await?;

        let presentation = jwt::build_presentation(
            holder.did,
            &holder.keys.authentication,
            &metadata.issuer,
            &random_token(32),
            &definition,
            &credentials,
            &selected,
        )?;
        let form = [
            ("grant_type", "vp_token".to_string()),
            ("scope", format!("openid {scope}")),
            ("vp_token", presentation.vp_token),
            ("presentation_submission", serde_json::to_string(&presentation.submission)?),
        ];

        log::debug!(
            "requesting {scope} token with {} credential(s) for definition {}",
            credentials.len(),
            definition.id
        );
        let response = self
            .http
            .post(&metadata.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::http(&metadata.token_endpoint, e))?;
        let token: TokenResponse = read_json(&metadata.token_endpoint, response).await?;

        let access_token = token.access_token.ok_or_else(|| Error::TokenExchange {
            scope: scope.to_string(),
            reason: "token response carries no access_token".into(),
        })?;
        log::info!(
            "obtained {scope} access token (granted scope {:?})",
            token.scope.as_deref().unwrap_or(scope)
        );
        Ok(ScopedAccessToken {
            scope: scope.to_string(),
            access_token,
            token_type: token.token_type.unwrap_or_else(|| "Bearer".into()),
            expires_in: token.expires_in.unwrap_or_default(),
        })
    }
}
