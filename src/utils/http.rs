// src/utils/http.rs
//! Shared HTTP transport.
//!
//! One `reqwest::Client` is built per process and cloned into every
//! component (clones share the connection pool). Redirects are disabled:
//! the authorization-code flow inspects `Location` headers itself.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Builds the shared client with a per-request timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| Error::http("client builder", e))
}

/// Decodes a 2xx JSON body, or turns anything else into [`Error::HttpStatus`]
/// carrying the (problem-details) body.
pub(crate) async fn read_json<T: DeserializeOwned>(endpoint: &str, response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::HttpStatus {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        });
    }
    response.json::<T>().await.map_err(|e| Error::http(endpoint, e))
}

/// Joins a base URL and a path without doubling or dropping slashes.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Percent-encodes everything outside the RFC 3986 unreserved set.
pub(crate) fn percent_encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

/// Appends an already-encoded `pair` to the query of `endpoint`, keeping any
/// parameters it already has.
pub(crate) fn append_query(endpoint: &str, pair: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(endpoint)
        .map_err(|e| Error::Config(format!("invalid endpoint {endpoint}: {e}")))?;
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{pair}"),
        _ => pair.to_string(),
    };
    url.set_query(Some(&query));
    Ok(url.to_string())
}
