// src/blockchain/transaction_signer.rs
//! Local signing of registry-produced transactions.
//!
//! Signatures are RFC 6979 deterministic ECDSA over the EIP-155 (or
//! EIP-2930) signing hash, so signing the same transaction with the same
//! key always yields the same `(r, s, v)`.

use ethers::signers::LocalWallet;
use ethers::types::transaction::eip2718::TypedTransaction;

use crate::error::{Error, Result};
use crate::models::transaction::{SignedTransaction, UnsignedTransaction};
use crate::wallet::key_management::DidKeyPair;

/// Signs unsigned registry transactions with the DID's secp256k1 key.
pub struct TransactionSigner;

impl TransactionSigner {
    /// Signs `unsigned` with `key`.
    ///
    /// # Errors
    /// - [`Error::KeyFormat`] if `key` is not a secp256k1 key
    /// - [`Error::Signing`] if the signer rejects the transaction
    pub fn sign(unsigned: &UnsignedTransaction, key: &DidKeyPair) -> Result<SignedTransaction> {
        let signing_key = key.secp256k1_signing_key()?;
        let wallet = LocalWallet::from(signing_key);

        let mut typed = unsigned.to_typed();
        typed.set_chain_id(unsigned.chain_id);

        let signature = wallet
            .sign_transaction_sync(&typed)
            .map_err(|e| Error::Signing(e.to_string()))?;
        let raw_signed = typed.rlp_signed(&signature);
        // Typed envelopes carry the bare y-parity, not the EIP-155 value.
        let v = match &typed {
            TypedTransaction::Legacy(_) => signature.v,
            _ => y_parity(signature.v, unsigned.chain_id)?,
        };

        log::debug!(
            "signed registry transaction (chain {}, nonce {:?})",
            unsigned.chain_id,
            unsigned.nonce
        );

        Ok(SignedTransaction {
            unsigned: unsigned.clone(),
            r: signature.r,
            s: signature.s,
            v,
            raw_signed,
        })
    }
}

fn y_parity(v: u64, chain_id: u64) -> Result<u64> {
    if v <= 1 {
        return Ok(v);
    }
    chain_id
        .checked_mul(2)
        .and_then(|c| c.checked_add(35))
        .and_then(|offset| v.checked_sub(offset))
        .filter(|parity| *parity <= 1)
        .ok_or_else(|| Error::Signing(format!("unexpected recovery id {v} for chain {chain_id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::key_management::{KeyMaterialProvisioner, KeyRequest, KeyType};
    use ethers::utils::rlp::Rlp;
    use serde_json::json;

    fn controller() -> DidKeyPair {
        KeyMaterialProvisioner::provision(KeyRequest::new(KeyType::Secp256k1).with_private_key(&[0x42; 32]))
            .unwrap()
    }

    fn unsigned(chain_id: serde_json::Value) -> UnsignedTransaction {
        UnsignedTransaction::from_registry(json!({
            "to": "0x0000000000000000000000000000000000001234",
            "data": "0xcafe",
            "nonce": "0x3",
            "chainId": chain_id,
            "gasLimit": "0x2dc6c0",
            "gasPrice": "0x0",
            "value": "0x0"
        }))
        .unwrap()
    }

    #[test]
    fn signing_is_deterministic() {
        let key = controller();
        let tx = unsigned(json!("0x1b0b"));
        let a = TransactionSigner::sign(&tx, &key).unwrap();
        let b = TransactionSigner::sign(&tx, &key).unwrap();
        assert_eq!((a.r, a.s, a.v), (b.r, b.s, b.v));
        assert_eq!(a.raw_signed, b.raw_signed);
    }

    #[test]
    fn hex_and_decimal_chain_ids_sign_identically() {
        let key = controller();
        let hex = TransactionSigner::sign(&unsigned(json!("0x1b0b")), &key).unwrap();
        let dec = TransactionSigner::sign(&unsigned(json!(6923)), &key).unwrap();
        assert_eq!((hex.r, hex.s, hex.v), (dec.r, dec.s, dec.v));
    }

    #[test]
    fn v_is_eip155_encoded() {
        let key = controller();
        let signed = TransactionSigner::sign(&unsigned(json!("0x1b0b")), &key).unwrap();
        let chain_id = 0x1b0b_u64;
        assert!(signed.v == chain_id * 2 + 35 || signed.v == chain_id * 2 + 36);
        assert!(signed.v_hex().starts_with("0x"));
        assert_eq!(signed.r_hex().len(), 66);
        assert_eq!(signed.s_hex().len(), 66);
    }

    #[test]
    fn signed_bytes_recover_to_the_controller_address() {
        let key = controller();
        let signed = TransactionSigner::sign(&unsigned(json!("0x1b0b")), &key).unwrap();
        let rlp = Rlp::new(signed.raw_signed.as_ref());
        let (decoded, signature) = TypedTransaction::decode_signed(&rlp).unwrap();
        let sender = signature.recover(decoded.sighash()).unwrap();
        assert_eq!(sender, key.ethereum_address().unwrap());
    }

    #[test]
    fn access_list_transactions_report_the_encoded_parity() {
        let key = controller();
        let tx = UnsignedTransaction::from_registry(json!({
            "to": "0x0000000000000000000000000000000000001234",
            "data": "0xcafe",
            "nonce": "0x3",
            "chainId": "0x1b0b",
            "gasLimit": "0x2dc6c0",
            "gasPrice": "0x0",
            "value": "0x0",
            "accessList": [{
                "address": "0x0000000000000000000000000000000000001234",
                "storageKeys": ["0x0000000000000000000000000000000000000000000000000000000000000001"]
            }]
        }))
        .unwrap();
        let signed = TransactionSigner::sign(&tx, &key).unwrap();
        assert!(signed.v <= 1);

        let rlp = Rlp::new(signed.raw_signed.as_ref());
        let (decoded, signature) = TypedTransaction::decode_signed(&rlp).unwrap();
        assert!(matches!(decoded, TypedTransaction::Eip2930(_)));
        assert_eq!(signature.v, signed.v);
        assert_eq!((signature.r, signature.s), (signed.r, signed.s));
        assert_eq!(signed.submission_params()["v"], format!("{:#x}", signature.v));
    }

    #[test]
    fn submission_params_echo_the_unsigned_transaction() {
        let key = controller();
        let tx = unsigned(json!("0x1b0b"));
        let signed = TransactionSigner::sign(&tx, &key).unwrap();
        let params = signed.submission_params();
        assert_eq!(params["protocol"], "eth");
        assert_eq!(&params["unsignedTransaction"], tx.raw());
        assert_eq!(params["r"], signed.r_hex());
        assert_eq!(params["s"], signed.s_hex());
        assert_eq!(params["v"], signed.v_hex());
        assert_eq!(params["signedRawTransaction"], signed.raw_signed_hex());
    }

    #[test]
    fn authentication_key_cannot_sign_transactions() {
        let key = KeyMaterialProvisioner::provision(KeyRequest::new(KeyType::Secp256r1)).unwrap();
        let err = TransactionSigner::sign(&unsigned(json!(1)), &key).unwrap_err();
        assert!(matches!(err, Error::KeyFormat(_)));
    }
}
