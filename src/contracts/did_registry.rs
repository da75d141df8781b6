// src/contracts/did_registry.rs
//! DID Registry interface.
//!
//! Typed wrappers over the registry's JSON-RPC write methods. Every write
//! returns an [`UnsignedTransaction`] which must be signed with the DID's
//! controller key and handed back through
//! [`DidRegistry::send_signed_transaction`] before the write takes effect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Value};

use crate::blockchain::RegistryRpc;
use crate::error::{Error, Result};
use crate::models::did::{ServiceEndpoint, VerificationRelationship};
use crate::models::transaction::{SignedTransaction, UnsignedTransaction};
use crate::wallet::key_management::{DidKeyPair, KeyType};

/// Validity window (unix seconds) of a verification method or relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    pub not_before: i64,
    pub not_after: i64,
}

/// Accepted range for [`Validity::from_now`], in years.
pub const VALIDITY_YEARS: std::ops::RangeInclusive<i64> = 1..=100;

impl Validity {
    /// From now for `years` years.
    ///
    /// # Errors
    /// [`Error::Config`] if `years` is outside [`VALIDITY_YEARS`].
    pub fn from_now(years: i64) -> Result<Self> {
        if !VALIDITY_YEARS.contains(&years) {
            return Err(Error::Config(format!(
                "validity of {years} years is outside {}..={}",
                VALIDITY_YEARS.start(),
                VALIDITY_YEARS.end()
            )));
        }
        let now = Utc::now();
        let not_after = now
            .checked_add_signed(Duration::days(365 * years))
            .ok_or_else(|| Error::Config(format!("validity of {years} years overflows")))?;
        Ok(Self {
            not_before: now.timestamp(),
            not_after: not_after.timestamp(),
        })
    }
}

/// Registry JSON-RPC method names.
pub mod methods {
    pub const INSERT_DID_DOCUMENT: &str = "insertDidDocument";
    pub const UPDATE_BASE_DOCUMENT: &str = "updateBaseDocument";
    pub const ADD_VERIFICATION_METHOD: &str = "addVerificationMethod";
    pub const ADD_VERIFICATION_RELATIONSHIP: &str = "addVerificationRelationship";
    pub const ADD_SERVICE: &str = "addService";
    pub const SEND_SIGNED_TRANSACTION: &str = "sendSignedTransaction";
}

/// High-level access to the DID Registry's write methods.
///
/// Allocates JSON-RPC ids from a per-instance counter.
pub struct DidRegistry {
    rpc: Arc<dyn RegistryRpc>,
    next_id: AtomicU64,
}

impl DidRegistry {
    /// Creates a registry handle with ids starting at a random offset, so
    /// concurrent registrations are easy to tell apart in registry logs.
    pub fn new(rpc: Arc<dyn RegistryRpc>) -> Self {
        Self::with_first_id(rpc, u64::from(rand::random::<u32>()))
    }

    pub fn with_first_id(rpc: Arc<dyn RegistryRpc>, first_id: u64) -> Self {
        Self {
            rpc,
            next_id: AtomicU64::new(first_id),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn write(&self, method: &str, params: Value, access_token: &str) -> Result<UnsignedTransaction> {
        let result = self
            .rpc
            .call(method, vec![params], self.next_id(), access_token)
            .await?;
        UnsignedTransaction::from_registry(result)
    }

    /// Registers a new DID with its secp256k1 controller key.
    ///
    /// # Arguments
    /// * `access_token` - `didr_invite` scoped token
    /// * `did` - DID to register
    /// * `controller` - secp256k1 key; becomes the first verification method
    /// * `base_document` - contexts-only base document
    /// * `validity` - validity of the controller verification method
    pub async fn insert_did_document(
        &self,
        access_token: &str,
        did: &str,
        controller: &DidKeyPair,
        base_document: &Value,
        validity: Validity,
    ) -> Result<UnsignedTransaction> {
        let params = json!({
            "from": from_address(controller)?,
            "did": did,
            "baseDocument": serde_json::to_string(base_document)?,
            "vMethodId": controller.jwk_thumbprint(),
            "publicKey": controller.public_key_hex(),
            "isSecp256k1": true,
            "notBefore": validity.not_before,
            "notAfter": validity.not_after,
        });
        self.write(methods::INSERT_DID_DOCUMENT, params, access_token).await
    }

    /// Replaces the base document of an existing DID.
    pub async fn update_base_document(
        &self,
        access_token: &str,
        did: &str,
        controller: &DidKeyPair,
        base_document: &Value,
    ) -> Result<UnsignedTransaction> {
        let params = json!({
            "from": from_address(controller)?,
            "did": did,
            "baseDocument": serde_json::to_string(base_document)?,
        });
        self.write(methods::UPDATE_BASE_DOCUMENT, params, access_token).await
    }

    /// Adds `key` as a verification method, identified by its thumbprint.
    ///
    /// secp256k1 keys are sent as uncompressed points; other keys as the hex
    /// of their JWK JSON.
    pub async fn add_verification_method(
        &self,
        access_token: &str,
        did: &str,
        controller: &DidKeyPair,
        key: &DidKeyPair,
    ) -> Result<UnsignedTransaction> {
        let (public_key, is_secp256k1) = match key.key_type() {
            KeyType::Secp256k1 => (key.public_key_hex(), true),
            KeyType::Secp256r1 => {
                let jwk = serde_json::to_string(key.jwk())?;
                (format!("0x{}", ethers::utils::hex::encode(jwk)), false)
            }
        };
        let params = json!({
            "from": from_address(controller)?,
            "did": did,
            "vMethodId": key.jwk_thumbprint(),
            "isSecp256k1": is_secp256k1,
            "publicKey": public_key,
        });
        self.write(methods::ADD_VERIFICATION_METHOD, params, access_token).await
    }

    /// Links a verification method to a relationship (`authentication`, ...).
    pub async fn add_verification_relationship(
        &self,
        access_token: &str,
        did: &str,
        controller: &DidKeyPair,
        relationship: VerificationRelationship,
        v_method_id: &str,
        validity: Validity,
    ) -> Result<UnsignedTransaction> {
        let params = json!({
            "from": from_address(controller)?,
            "did": did,
            "name": relationship.as_str(),
            "vMethodId": v_method_id,
            "notBefore": validity.not_before,
            "notAfter": validity.not_after,
        });
        self.write(methods::ADD_VERIFICATION_RELATIONSHIP, params, access_token)
            .await
    }

    pub async fn add_service(
        &self,
        access_token: &str,
        did: &str,
        controller: &DidKeyPair,
        service: &ServiceEndpoint,
    ) -> Result<UnsignedTransaction> {
        let params = json!({
            "from": from_address(controller)?,
            "did": did,
            "service": service.for_did(did),
        });
        self.write(methods::ADD_SERVICE, params, access_token).await
    }

    /// Submits a signed transaction; returns the transaction hash.
    pub async fn send_signed_transaction(
        &self,
        access_token: &str,
        signed: &SignedTransaction,
    ) -> Result<String> {
        let id = self.next_id();
        let result = self
            .rpc
            .call(
                methods::SEND_SIGNED_TRANSACTION,
                vec![signed.submission_params()],
                id,
                access_token,
            )
            .await?;
        match result {
            Value::String(hash) => Ok(hash),
            other => Err(Error::Rpc {
                method: methods::SEND_SIGNED_TRANSACTION.into(),
                id,
                code: crate::blockchain::rpc_client::INTERNAL_ERROR,
                message: format!("expected a transaction hash, got {other}"),
            }),
        }
    }
}

fn from_address(controller: &DidKeyPair) -> Result<String> {
    Ok(format!("{:?}", controller.ethereum_address()?))
}
