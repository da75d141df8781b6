// src/blockchain/mod.rs
//! Ledger-facing plumbing: the registry's JSON-RPC write API, its read API,
//! local transaction signing and anchoring detection.
//!
//! The two network seams are traits so the orchestrator can run against
//! in-process fakes as well as the HTTP clients.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub mod anchor;
pub mod read_api;
pub mod rpc_client;
pub mod transaction_signer;

/// JSON-RPC write access to the registry.
#[async_trait]
pub trait RegistryRpc: Send + Sync {
    /// Calls `method` and returns the `result` member.
    ///
    /// An error envelope surfaces as [`crate::Error::Rpc`].
    async fn call(&self, method: &str, params: Vec<Value>, id: u64, access_token: &str) -> Result<Value>;
}

/// Read access to DID documents.
#[async_trait]
pub trait DidDocumentSource: Send + Sync {
    async fn fetch_document(&self, did: &str) -> Result<Value>;
}
