// src/wallet/credential_storage.rs
//! Credential storage for one registration.
//!
//! Holds the attestation credentials obtained so far, keyed by the
//! credential type they were requested for, so the token exchanger can reuse
//! an unexpired credential instead of running the attestation flow again.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::credential::AttestationCredential;
use crate::models::presentation::InputDescriptor;

/// In-memory store of attestation credentials.
///
/// Owned by exactly one registration; it is never shared between
/// concurrent workflows, so it needs no locking.
#[derive(Debug, Default, Clone)]
pub struct CredentialStorage {
    /// Credentials by credential type
    credentials: HashMap<String, AttestationCredential>,
}

impl CredentialStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a credential, replacing an earlier one of the same type.
    pub fn store_credential(&mut self, credential: AttestationCredential) {
        self.credentials
            .insert(credential.credential_type.clone(), credential);
    }

    /// First unexpired credential whose claims satisfy `descriptor`.
    pub fn find_matching(
        &self,
        descriptor: &InputDescriptor,
        now: DateTime<Utc>,
    ) -> Option<&AttestationCredential> {
        let mut candidates: Vec<&AttestationCredential> = self
            .credentials
            .values()
            .filter(|c| c.is_valid_at(now))
            .collect();
        // HashMap order is unspecified; prefer the latest-expiring credential.
        candidates.sort_by(|a, b| b.expires_at.cmp(&a.expires_at));
        candidates.into_iter().find(|c| {
            c.claims()
                .map(|claims| descriptor.is_satisfied_by(&claims))
                .unwrap_or(false)
        })
    }

    pub fn count_credentials(&self) -> usize {
        self.credentials.len()
    }

    /// Drops every credential that has expired by `now`.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.credentials.len();
        self.credentials.retain(|_, c| c.is_valid_at(now));
        before - self.credentials.len()
    }
}
