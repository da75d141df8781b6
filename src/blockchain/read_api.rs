// src/blockchain/read_api.rs
//! Client for the registry's read API (`GET /identifiers/{did}`).

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::blockchain::DidDocumentSource;
use crate::error::{Error, Result};
use crate::utils::http::{join_url, read_json};

/// Resolves DID documents as the ledger currently (or historically) sees them.
#[derive(Clone)]
pub struct ReadApiClient {
    http: reqwest::Client,
    registry_base: String,
}

impl ReadApiClient {
    pub fn new(http: reqwest::Client, registry_base: &str) -> Self {
        Self {
            http,
            registry_base: registry_base.trim_end_matches('/').to_string(),
        }
    }

    fn document_url(&self, did: &str) -> String {
        join_url(&self.registry_base, &format!("identifiers/{did}"))
    }

    /// Fetches the DID document, optionally as it was valid at `valid_at`.
    ///
    /// # Errors
    /// [`Error::HttpStatus`] with the problem-details body on non-2xx
    /// (including 404 for a DID the ledger does not know yet).
    pub async fn fetch(&self, did: &str, valid_at: Option<DateTime<Utc>>) -> Result<Value> {
        let url = self.document_url(did);
        let mut request = self.http.get(&url);
        if let Some(at) = valid_at {
            request = request.query(&[("valid_at", at.to_rfc3339_opts(SecondsFormat::Secs, true))]);
        }
        let response = request.send().await.map_err(|e| Error::http(&url, e))?;
        read_json(&url, response).await
    }
}

#[async_trait]
impl DidDocumentSource for ReadApiClient {
    async fn fetch_document(&self, did: &str) -> Result<Value> {
        self.fetch(did, None).await
    }
}
