// src/utils/crypto.rs
//! Hashing and randomness helpers shared by the key, JWT and PKCE code.
//!
//! SHA-256 and the CSPRNG come from `ring`; short random strings (nonces,
//! `state`, PKCE verifiers) come from `rand`.

use rand::distributions::Alphanumeric;
use rand::Rng;
use ring::digest::{digest, SHA256};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Error, Result};

/// Computes a SHA-256 digest of the input data.
///
/// Used for RFC 7638 JWK thumbprints and PKCE `S256` code challenges.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let hash = digest(&SHA256, data);
    let mut out = [0u8; 32];
    out.copy_from_slice(hash.as_ref());
    out
}

/// Fills a fixed-size buffer from the operating system CSPRNG.
///
/// # Errors
/// Returns [`Error::KeyFormat`] if the system RNG is unavailable, since the
/// only callers are key and identifier generation.
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| Error::KeyFormat("system random number generator failed".into()))?;
    Ok(buf)
}

/// Random alphanumeric string for nonces, `state` values and PKCE verifiers.
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
