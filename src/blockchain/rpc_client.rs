// src/blockchain/rpc_client.rs
//! JSON-RPC 2.0 transport to the registry's write API.
//!
//! The registry does not execute writes itself: each write method returns an
//! unsigned Ethereum transaction, which the caller signs and hands back via
//! `sendSignedTransaction`. This module only moves envelopes; the typed
//! method wrappers live in [`crate::contracts::did_registry`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::blockchain::RegistryRpc;
use crate::error::{Error, Result};
use crate::utils::http::join_url;

/// JSON-RPC "internal error" code, used for envelopes that break the protocol.
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Serialize, Debug)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a [Value],
    id: u64,
}

/// A response envelope as received.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// Splits the envelope into its result or a typed [`Error::Rpc`].
    ///
    /// The response `id` must equal the request's `id` exactly. Errors the
    /// server could not tie to a request (`"id": null`, e.g. parse errors)
    /// are reported with their own code.
    pub fn into_result(self, method: &str, id: u64) -> Result<Value> {
        let rpc_error = |code, message: String| Error::Rpc {
            method: method.to_string(),
            id,
            code,
            message,
        };
        if let (None, Some(err)) = (&self.id, &self.error) {
            return Err(rpc_error(err.code, err.message.clone()));
        }
        if self.id != Some(Value::from(id)) {
            return Err(rpc_error(
                INTERNAL_ERROR,
                format!("response id {:?} does not match request id {id}", self.id),
            ));
        }
        match (self.error, self.result) {
            (Some(err), _) => Err(rpc_error(err.code, err.message)),
            (None, Some(result)) => Ok(result),
            (None, None) => Err(rpc_error(
                INTERNAL_ERROR,
                "response carries neither result nor error".into(),
            )),
        }
    }
}

/// HTTP JSON-RPC client for `POST {registry}/jsonrpc`.
///
/// Never retries; a transient failure is returned to the caller as is.
#[derive(Clone)]
pub struct LedgerRpcClient {
    http: reqwest::Client,
    endpoint: String,
}

impl LedgerRpcClient {
    /// # Arguments
    /// * `http` - Shared HTTP client
    /// * `registry_base` - Registry API base URL; `/jsonrpc` is appended
    pub fn new(http: reqwest::Client, registry_base: &str) -> Self {
        Self {
            http,
            endpoint: join_url(registry_base, "jsonrpc"),
        }
    }

    /// Sends one request and returns the envelope without interpreting it.
    ///
    /// # Errors
    /// - [`Error::Http`] on transport failure
    /// - [`Error::HttpStatus`] when a non-2xx response carries no JSON-RPC envelope
    pub async fn call_raw(
        &self,
        method: &str,
        params: &[Value],
        id: u64,
        access_token: &str,
    ) -> Result<JsonRpcResponse> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };
        log::debug!("registry rpc -> {method} (id {id})");

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::http(&self.endpoint, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::http(&self.endpoint, e))?;

        match serde_json::from_str::<JsonRpcResponse>(&body) {
            Ok(envelope) if status.is_success() || envelope.error.is_some() => Ok(envelope),
            Err(e) if status.is_success() => Err(e.into()),
            _ => Err(Error::HttpStatus {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
                body,
            }),
        }
    }
}

#[async_trait]
impl RegistryRpc for LedgerRpcClient {
    async fn call(&self, method: &str, params: Vec<Value>, id: u64, access_token: &str) -> Result<Value> {
        let envelope = self.call_raw(method, &params, id, access_token).await?;
        let result = envelope.into_result(method, id);
        if let Err(err) = &result {
            log::warn!("registry rpc {method} (id {id}) failed: {err}");
        }
        result
    }
}
