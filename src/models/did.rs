// src/models/did.rs
//! Decentralized Identifier (DID) data model.
//!
//! The registry stores a *base document* (contexts only) and builds the
//! verification methods, relationships and services from later calls, so
//! the client only ever constructs the base document and service entries.

use base58::ToBase58;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;
use crate::utils::crypto::random_bytes;

/// DID method prefix used for legal entities.
pub const LEGAL_ENTITY_DID_PREFIX: &str = "did:ebsi:";

/// Version byte of a legal-entity method-specific identifier.
const LEGAL_ENTITY_ID_VERSION: u8 = 0x01;

/// Mints a new legal-entity DID.
///
/// The method-specific identifier is multibase base58btc (`z` prefix) of a
/// version byte followed by 16 random bytes.
pub fn generate_legal_entity_did() -> Result<String> {
    let entropy: [u8; 16] = random_bytes()?;
    let mut raw = Vec::with_capacity(17);
    raw.push(LEGAL_ENTITY_ID_VERSION);
    raw.extend_from_slice(&entropy);
    Ok(format!("{LEGAL_ENTITY_DID_PREFIX}z{}", raw.to_base58()))
}

/// The base DID document handed to `insertDidDocument` / `updateBaseDocument`.
pub fn base_document() -> Value {
    json!({
        "@context": [
            "https://www.w3.org/ns/did/v1",
            "https://w3id.org/security/suites/jws-2020/v1"
        ]
    })
}

/// Verification relationships that can be attached to a verification method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationRelationship {
    AssertionMethod,
    Authentication,
}

impl VerificationRelationship {
    /// Name the registry expects in `addVerificationRelationship`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AssertionMethod => "assertionMethod",
            Self::Authentication => "authentication",
        }
    }
}

/// A service entry registered through `addService`.
///
/// `id` may be a bare fragment (`#issuer`); it is expanded against the DID
/// when sent to the registry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServiceEndpoint {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(rename = "serviceEndpoint", alias = "serviceendpoint")]
    pub service_endpoint: String,
}

impl ServiceEndpoint {
    /// Returns the entry with its `id` made absolute for `did`.
    pub fn for_did(&self, did: &str) -> ServiceEndpoint {
        let id = if self.id.starts_with('#') {
            format!("{did}{}", self.id)
        } else {
            self.id.clone()
        };
        ServiceEndpoint { id, ..self.clone() }
    }
}
