// src/error.rs
//! Error taxonomy for the onboarding components.
//!
//! Lower layers raise typed errors carrying enough context (RPC id, scope,
//! endpoint, flow state) to diagnose a failure without retrying it. The
//! orchestrator wraps the first error it sees in
//! [`crate::services::onboarding::OnboardingError`].

use crate::services::attestation::AttestationState;

/// Errors raised by the onboarding components.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key bytes have the wrong length, are not a valid scalar, or the
    /// requested purposes break the per-type rules.
    #[error("invalid key material: {0}")]
    KeyFormat(String),

    /// The authorization-code / presentation-exchange flow failed or timed out.
    #[error("attestation flow failed while {state}: {reason}")]
    AttestationFlow {
        /// Last state the flow reached.
        state: AttestationState,
        reason: String,
    },

    /// The authorisation server did not hand out an access token.
    #[error("token exchange for scope `{scope}` failed: {reason}")]
    TokenExchange { scope: String, reason: String },

    /// Structured JSON-RPC error returned by the registry.
    #[error("registry call `{method}` (id {id}) failed with code {code}: {message}")]
    Rpc {
        method: String,
        id: u64,
        code: i64,
        message: String,
    },

    /// A non-2xx HTTP status outside the JSON-RPC envelope.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    HttpStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// HTTP transport failure (connection, timeout, body decoding).
    #[error("HTTP error calling {endpoint}: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The registry returned a transaction the signer cannot interpret.
    #[error("malformed unsigned transaction: {0}")]
    InvalidTransaction(String),

    #[error("transaction signing failed: {0}")]
    Signing(String),

    #[error("JWT encoding failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The DID document (or the awaited fragment) never became visible.
    /// Only raised when the caller asks for anchoring to be mandatory.
    #[error("{did} not anchored after {waited_ms}ms")]
    AnchorTimeout { did: String, waited_ms: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wraps a transport error with the endpoint it was raised for.
    pub(crate) fn http(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        Error::Http {
            endpoint: endpoint.into(),
            source,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
