// src/config.rs
//! Runtime settings.
//!
//! Layered with the `config` crate: an optional `onboarding.{toml,yaml,json}`
//! file first, then `DID_ONBOARDING__*` environment variables (`__`
//! separates nested keys, e.g. `DID_ONBOARDING__ANCHOR__MAX_WAIT=90000`).

use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::blockchain::anchor::AnchorPollParams;
use crate::contracts::did_registry::VALIDITY_YEARS;
use crate::error::{Error, Result};
use crate::models::did::ServiceEndpoint;
use crate::services::attestation::AttestationRequest;
use crate::services::onboarding::OnboardingRequest;

const ENV_PREFIX: &str = "DID_ONBOARDING";
const DEFAULT_FILE: &str = "onboarding";

/// Where to obtain the onboarding attestation.
#[derive(Debug, Clone, Deserialize)]
pub struct AttestationSettings {
    pub issuer_url: String,
    #[serde(default = "default_credential_type")]
    pub credential_type: String,
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    /// Bound on the whole flow, in milliseconds.
    #[serde(default = "default_attestation_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Registry API base, e.g. `https://api.example/did-registry/v5`.
    pub registry_url: String,
    /// Authorisation API base, e.g. `https://api.example/authorisation/v4`.
    pub authorisation_url: String,
    pub attestation: AttestationSettings,
    #[serde(default)]
    pub did: Option<String>,
    /// Hex (optionally `0x`-prefixed) secp256k1 private key.
    #[serde(default)]
    pub controller_key: Option<String>,
    /// Hex (optionally `0x`-prefixed) secp256r1 private key.
    #[serde(default)]
    pub authentication_key: Option<String>,
    #[serde(default)]
    pub anchor: AnchorPollParams,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_validity_years")]
    pub validity_years: i64,
    #[serde(default)]
    pub services: Vec<ServiceEndpoint>,
    #[serde(default)]
    pub require_anchoring: bool,
    /// Optional bound on the whole registration, in milliseconds.
    #[serde(default)]
    pub run_timeout_ms: Option<u64>,
}

fn default_credential_type() -> String {
    "VerifiableAuthorisationToOnboard".into()
}

fn default_formats() -> Vec<String> {
    vec!["jwt_vc".into(), "jwt_vc_json".into()]
}

fn default_redirect_uri() -> String {
    "openid://".into()
}

fn default_attestation_timeout_ms() -> u64 {
    60_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_validity_years() -> i64 {
    5
}

impl Settings {
    /// Loads `onboarding.*` (if present) overlaid with the environment.
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(DEFAULT_FILE).required(false))
            .add_source(environment())
            .build()?;
        Self::checked(config.try_deserialize()?)
    }

    /// Parses TOML text overlaid with the environment.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .add_source(environment())
            .build()?;
        Self::checked(config.try_deserialize()?)
    }

    fn checked(settings: Self) -> Result<Self> {
        if !VALIDITY_YEARS.contains(&settings.validity_years) {
            return Err(Error::Config(format!(
                "validity_years must be within {}..={}, got {}",
                VALIDITY_YEARS.start(),
                VALIDITY_YEARS.end(),
                settings.validity_years
            )));
        }
        settings.anchor.validate()?;
        Ok(settings)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_ms.map(Duration::from_millis)
    }

    pub fn attestation_request(&self) -> AttestationRequest {
        AttestationRequest {
            issuer_url: self.attestation.issuer_url.clone(),
            credential_type: self.attestation.credential_type.clone(),
            acceptable_formats: self.attestation.formats.clone(),
            client_id: self.attestation.client_id.clone(),
            redirect_uri: self.attestation.redirect_uri.clone(),
            timeout: Duration::from_millis(self.attestation.timeout_ms),
        }
    }

    /// # Errors
    /// [`Error::Config`] if a configured private key is not valid hex.
    pub fn onboarding_request(&self) -> Result<OnboardingRequest> {
        Ok(OnboardingRequest {
            did: self.did.clone(),
            controller_key: decode_key("controller_key", self.controller_key.as_deref())?,
            authentication_key: decode_key("authentication_key", self.authentication_key.as_deref())?,
            attestation: self.attestation_request(),
            services: self.services.clone(),
            validity_years: self.validity_years,
            require_anchoring: self.require_anchoring,
        })
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

fn decode_key(name: &str, hex: Option<&str>) -> Result<Option<Vec<u8>>> {
    hex.map(|h| {
        ethers::utils::hex::decode(h.trim().trim_start_matches("0x"))
            .map_err(|e| Error::Config(format!("{name} is not valid hex: {e}")))
    })
    .transpose()
}
