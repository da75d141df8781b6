// src/wallet/key_management.rs
//! Key material for a DID registration.
//!
//! A legal-entity DID needs two key pairs:
//! - a **secp256k1** controller key (`capabilityInvocation`) that signs the
//!   registry's Ethereum transactions
//! - a **secp256r1** (P-256) key (`assertionMethod`, `authentication`) that
//!   signs request objects, ID tokens and verifiable presentations (ES256)
//!
//! Each key is identified on the ledger by its RFC 7638 JWK thumbprint.

use std::collections::BTreeSet;
use std::fmt;

use ethers::types::Address;
use jsonwebtoken::EncodingKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePrivateKey;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::crypto::{random_bytes, sha256};
use crate::utils::serialization::base64url;

/// Length of a private scalar for both supported curves.
pub const PRIVATE_KEY_LEN: usize = 32;

/// Supported key curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyType {
    Secp256k1,
    Secp256r1,
}

/// What a key may be used for in the DID document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyPurpose {
    CapabilityInvocation,
    AssertionMethod,
    Authentication,
}

impl KeyType {
    /// `crv` member of the key's JWK.
    pub fn jwk_curve(self) -> &'static str {
        match self {
            KeyType::Secp256k1 => "secp256k1",
            KeyType::Secp256r1 => "P-256",
        }
    }

    /// Purposes assigned when the caller does not choose any.
    pub fn default_purposes(self) -> BTreeSet<KeyPurpose> {
        match self {
            KeyType::Secp256k1 => BTreeSet::from([KeyPurpose::CapabilityInvocation]),
            KeyType::Secp256r1 => {
                BTreeSet::from([KeyPurpose::AssertionMethod, KeyPurpose::Authentication])
            }
        }
    }

    /// Enforces the per-curve purpose rules.
    ///
    /// - secp256k1 keys must carry `capabilityInvocation`
    /// - secp256r1 keys may only carry `assertionMethod` / `authentication`
    pub fn check_purposes(self, purposes: &BTreeSet<KeyPurpose>) -> Result<()> {
        if purposes.is_empty() {
            return Err(Error::KeyFormat(format!("{self:?} key needs at least one purpose")));
        }
        match self {
            KeyType::Secp256k1 if !purposes.contains(&KeyPurpose::CapabilityInvocation) => Err(
                Error::KeyFormat("Secp256k1 key must include capabilityInvocation".into()),
            ),
            KeyType::Secp256r1 if purposes.contains(&KeyPurpose::CapabilityInvocation) => Err(
                Error::KeyFormat(
                    "Secp256r1 key may only be used for assertionMethod and authentication".into(),
                ),
            ),
            _ => Ok(()),
        }
    }

    /// Uncompressed SEC1 public key (`0x04 || x || y`) for a private scalar.
    fn derive_public_key(self, private_key: &[u8]) -> Result<Vec<u8>> {
        let invalid = |_| Error::KeyFormat(format!("not a valid {self:?} private key"));
        let point = match self {
            KeyType::Secp256k1 => k256::SecretKey::from_slice(private_key)
                .map_err(invalid)?
                .public_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            KeyType::Secp256r1 => p256::SecretKey::from_slice(private_key)
                .map_err(invalid)?
                .public_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
        };
        Ok(point)
    }
}

/// Public JSON Web Key of an EC key.
///
/// Members are declared in lexicographic order, so the serialized form is
/// the RFC 7638 thumbprint input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub crv: String,
    pub kty: String,
    pub x: String,
    pub y: String,
}

impl Jwk {
    fn from_uncompressed(key_type: KeyType, point: &[u8]) -> Result<Self> {
        if point.len() != 65 || point[0] != 0x04 {
            return Err(Error::KeyFormat("expected an uncompressed SEC1 point".into()));
        }
        Ok(Jwk {
            crv: key_type.jwk_curve().to_string(),
            kty: "EC".to_string(),
            x: base64url(&point[1..33]),
            y: base64url(&point[33..65]),
        })
    }

    /// RFC 7638 thumbprint: base64url SHA-256 of the canonical JSON.
    pub fn thumbprint(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        Ok(base64url(sha256(canonical.as_bytes())))
    }
}

/// One key of a DID, immutable once created.
#[derive(Clone, PartialEq, Eq)]
pub struct DidKeyPair {
    private_key: Vec<u8>,
    public_key: Vec<u8>,
    key_type: KeyType,
    purposes: BTreeSet<KeyPurpose>,
    jwk: Jwk,
    jwk_thumbprint: String,
}

impl DidKeyPair {
    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    /// Uncompressed SEC1 public key.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Public key as `0x04...` hex, the form `insertDidDocument` expects.
    pub fn public_key_hex(&self) -> String {
        format!("0x{}", ethers::utils::hex::encode(&self.public_key))
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn purposes(&self) -> &BTreeSet<KeyPurpose> {
        &self.purposes
    }

    pub fn has_purpose(&self, purpose: KeyPurpose) -> bool {
        self.purposes.contains(&purpose)
    }

    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    /// Verification-method identifier on the ledger.
    pub fn jwk_thumbprint(&self) -> &str {
        &self.jwk_thumbprint
    }

    /// Full verification-method id (`did#thumbprint`), used as JWS `kid`.
    pub fn kid(&self, did: &str) -> String {
        format!("{did}#{}", self.jwk_thumbprint)
    }

    /// Ethereum address of a secp256k1 key (the registry's `from`).
    pub fn ethereum_address(&self) -> Result<Address> {
        Ok(ethers::utils::secret_key_to_address(&self.secp256k1_signing_key()?))
    }

    pub(crate) fn secp256k1_signing_key(&self) -> Result<k256::ecdsa::SigningKey> {
        match self.key_type {
            KeyType::Secp256k1 => k256::ecdsa::SigningKey::from_slice(&self.private_key)
                .map_err(|e| Error::KeyFormat(e.to_string())),
            KeyType::Secp256r1 => Err(Error::KeyFormat(
                "a Secp256k1 key is required for transaction signing".into(),
            )),
        }
    }

    /// ES256 signing key for JWTs; only secp256r1 keys sign JWTs.
    pub fn jwt_encoding_key(&self) -> Result<EncodingKey> {
        match self.key_type {
            KeyType::Secp256r1 => {
                let secret = p256::SecretKey::from_slice(&self.private_key)
                    .map_err(|e| Error::KeyFormat(e.to_string()))?;
                let der = secret
                    .to_pkcs8_der()
                    .map_err(|e| Error::KeyFormat(e.to_string()))?;
                Ok(EncodingKey::from_ec_der(der.as_bytes()))
            }
            KeyType::Secp256k1 => Err(Error::KeyFormat(
                "a Secp256r1 key is required for ES256 signatures".into(),
            )),
        }
    }
}

impl fmt::Debug for DidKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DidKeyPair")
            .field("key_type", &self.key_type)
            .field("purposes", &self.purposes)
            .field("jwk_thumbprint", &self.jwk_thumbprint)
            .finish_non_exhaustive()
    }
}

/// The two keys one legal-entity registration needs.
#[derive(Debug, Clone)]
pub struct DidKeySet {
    /// secp256k1, `capabilityInvocation`; signs ledger transactions.
    pub controller: DidKeyPair,
    /// secp256r1, `assertionMethod` + `authentication`; signs JWTs.
    pub authentication: DidKeyPair,
}

/// Parameters for provisioning one key.
#[derive(Debug, Clone, Copy)]
pub struct KeyRequest<'a> {
    pub key_type: KeyType,
    /// Imported private scalar; generated when `None`.
    pub private_key: Option<&'a [u8]>,
    /// Explicit purposes; the curve's defaults when `None`.
    pub purposes: Option<&'a [KeyPurpose]>,
}

impl<'a> KeyRequest<'a> {
    pub fn new(key_type: KeyType) -> Self {
        Self {
            key_type,
            private_key: None,
            purposes: None,
        }
    }

    pub fn with_private_key(mut self, private_key: &'a [u8]) -> Self {
        self.private_key = Some(private_key);
        self
    }

    pub fn with_purposes(mut self, purposes: &'a [KeyPurpose]) -> Self {
        self.purposes = Some(purposes);
        self
    }
}

/// Generates or imports the key pairs of a DID.
///
/// Stateless; derivation is the only work done.
pub struct KeyMaterialProvisioner;

impl KeyMaterialProvisioner {
    /// Builds one key pair.
    ///
    /// # Errors
    /// [`Error::KeyFormat`] when:
    /// - imported bytes are not exactly 32 bytes
    /// - the bytes are not a valid scalar for the curve
    /// - explicit purposes break the per-curve rules
    pub fn provision(request: KeyRequest<'_>) -> Result<DidKeyPair> {
        let key_type = request.key_type;

        let purposes = match request.purposes {
            Some(list) => list.iter().copied().collect(),
            None => key_type.default_purposes(),
        };
        key_type.check_purposes(&purposes)?;

        let private_key = match request.private_key {
            Some(bytes) if bytes.len() != PRIVATE_KEY_LEN => {
                return Err(Error::KeyFormat(format!(
                    "{key_type:?} private key must be {PRIVATE_KEY_LEN} bytes, got {}",
                    bytes.len()
                )))
            }
            Some(bytes) => bytes.to_vec(),
            None => random_bytes::<PRIVATE_KEY_LEN>()?.to_vec(),
        };

        let public_key = key_type.derive_public_key(&private_key)?;
        let jwk = Jwk::from_uncompressed(key_type, &public_key)?;
        let jwk_thumbprint = jwk.thumbprint()?;

        log::debug!("provisioned {key_type:?} key {jwk_thumbprint}");

        Ok(DidKeyPair {
            private_key,
            public_key,
            key_type,
            purposes,
            jwk,
            jwk_thumbprint,
        })
    }

    /// Builds the controller + authentication key set of a legal entity.
    pub fn provision_set(
        controller_key: Option<&[u8]>,
        authentication_key: Option<&[u8]>,
    ) -> Result<DidKeySet> {
        let mut controller = KeyRequest::new(KeyType::Secp256k1);
        controller.private_key = controller_key;
        let mut authentication = KeyRequest::new(KeyType::Secp256r1);
        authentication.private_key = authentication_key;
        Ok(DidKeySet {
            controller: Self::provision(controller)?,
            authentication: Self::provision(authentication)?,
        })
    }
}
