// src/models/transaction.rs
//! Registry-produced transactions and their signed counterparts.
//!
//! The registry answers every write call with an *unsigned* transaction
//! whose numeric fields may be hex strings, decimal strings or JSON numbers.
//! [`UnsignedTransaction::from_registry`] normalizes them once:
//!
//! | Field | Accepted | Normalized |
//! |---|---|---|
//! | `chainId` | hex / decimal string, number | `u64`, required |
//! | `nonce`, `gasLimit` (or `gas`), `gasPrice`, `value` | hex / decimal string, number | `U256` |
//! | `to` | 20-byte hex address or `null` | `Option<Address>` |
//! | `data` | hex string, `""` / `"0x"` empty | `Bytes` |
//! | `accessList` | `[{address, storageKeys}]` | EIP-2930 list |
//!
//! Other members (`from`, ...) are ignored for signing. The original JSON is
//! kept verbatim because `sendSignedTransaction` expects it echoed back.

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip2930::{AccessList, Eip2930TransactionRequest};
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use ethers::utils::hex;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::utils::serialization::parse_quantity;

/// Transaction returned by a registry write call, ready to be signed.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedTransaction {
    pub to: Option<Address>,
    pub data: Option<Bytes>,
    pub nonce: Option<U256>,
    pub chain_id: u64,
    pub gas_limit: Option<U256>,
    pub gas_price: Option<U256>,
    pub value: Option<U256>,
    pub access_list: Option<AccessList>,
    raw: Value,
}

impl UnsignedTransaction {
    /// Normalizes the registry's JSON into typed fields.
    ///
    /// # Errors
    /// [`Error::InvalidTransaction`] when the value is not an object, when
    /// `chainId` is missing, or when any field fails to parse.
    pub fn from_registry(raw: Value) -> Result<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| Error::InvalidTransaction(format!("expected an object, got {raw}")))?;

        let field = |name: &str| obj.get(name).filter(|v| !v.is_null());
        let quantity = |name: &str| -> Result<Option<U256>> {
            field(name)
                .map(|v| parse_quantity(v).map_err(|e| Error::InvalidTransaction(format!("{name}: {e}"))))
                .transpose()
        };

        let chain_id = quantity("chainId")?
            .ok_or_else(|| Error::InvalidTransaction("chainId is missing".into()))?;
        if chain_id > U256::from(u64::MAX) {
            return Err(Error::InvalidTransaction(format!("chainId {chain_id} does not fit in u64")));
        }

        let to = field("to")
            .map(|v| {
                v.as_str()
                    .ok_or_else(|| Error::InvalidTransaction("to: expected a string".into()))?
                    .parse::<Address>()
                    .map_err(|e| Error::InvalidTransaction(format!("to: {e}")))
            })
            .transpose()?;

        let data = field("data")
            .map(|v| {
                let s = v
                    .as_str()
                    .ok_or_else(|| Error::InvalidTransaction("data: expected a string".into()))?;
                let digits = s.strip_prefix("0x").unwrap_or(s);
                hex::decode(digits)
                    .map(Bytes::from)
                    .map_err(|e| Error::InvalidTransaction(format!("data: {e}")))
            })
            .transpose()?;

        let access_list = field("accessList")
            .map(|v| {
                serde_json::from_value::<AccessList>(v.clone())
                    .map_err(|e| Error::InvalidTransaction(format!("accessList: {e}")))
            })
            .transpose()?;

        let gas_limit = match quantity("gasLimit")? {
            Some(gas) => Some(gas),
            None => quantity("gas")?,
        };

        Ok(Self {
            to,
            data,
            nonce: quantity("nonce")?,
            chain_id: chain_id.as_u64(),
            gas_limit,
            gas_price: quantity("gasPrice")?,
            value: quantity("value")?,
            access_list,
            raw,
        })
    }

    /// The transaction exactly as the registry sent it.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Canonical typed form: EIP-2930 when an access list is present,
    /// otherwise an EIP-155 legacy transaction.
    pub fn to_typed(&self) -> TypedTransaction {
        let mut request = TransactionRequest::new().chain_id(self.chain_id);
        if let Some(to) = self.to {
            request = request.to(to);
        }
        if let Some(data) = &self.data {
            request = request.data(data.clone());
        }
        if let Some(nonce) = self.nonce {
            request = request.nonce(nonce);
        }
        if let Some(gas) = self.gas_limit {
            request = request.gas(gas);
        }
        if let Some(price) = self.gas_price {
            request = request.gas_price(price);
        }
        if let Some(value) = self.value {
            request = request.value(value);
        }
        match &self.access_list {
            Some(list) => TypedTransaction::Eip2930(Eip2930TransactionRequest::new(request, list.clone())),
            None => TypedTransaction::Legacy(request),
        }
    }
}

/// A locally signed registry transaction.
///
/// `sendSignedTransaction` needs all of these together; dropping any one
/// makes the submission invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    pub unsigned: UnsignedTransaction,
    pub r: U256,
    pub s: U256,
    pub v: u64,
    pub raw_signed: Bytes,
}

impl SignedTransaction {
    /// `r` as 0x-prefixed 32-byte hex.
    pub fn r_hex(&self) -> String {
        word_hex(self.r)
    }

    /// `s` as 0x-prefixed 32-byte hex.
    pub fn s_hex(&self) -> String {
        word_hex(self.s)
    }

    /// `v` as a 0x-prefixed hex integer.
    pub fn v_hex(&self) -> String {
        format!("{:#x}", self.v)
    }

    pub fn raw_signed_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw_signed))
    }

    /// The single params object of `sendSignedTransaction`.
    pub fn submission_params(&self) -> Value {
        json!({
            "protocol": "eth",
            "unsignedTransaction": self.unsigned.raw(),
            "r": self.r_hex(),
            "s": self.s_hex(),
            "v": self.v_hex(),
            "signedRawTransaction": self.raw_signed_hex(),
        })
    }
}

fn word_hex(word: U256) -> String {
    let mut buf = [0u8; 32];
    word.to_big_endian(&mut buf);
    format!("0x{}", hex::encode(buf))
}
