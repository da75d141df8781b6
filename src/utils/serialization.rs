// src/utils/serialization.rs
//! Serialization utilities for the onboarding flow.
//!
//! Provides:
//! - base64url (unpadded) encoding used by JWS and JWK
//! - parsing of registry "quantities" that may arrive as `0x` hex strings,
//!   decimal strings or JSON numbers
//! - a minimal JSONPath evaluator for Presentation Exchange field paths

use ethers::types::U256;
use serde_json::Value;

/// Encodes bytes as unpadded base64url.
pub fn base64url(data: impl AsRef<[u8]>) -> String {
    base64::encode_config(data, base64::URL_SAFE_NO_PAD)
}

/// Decodes unpadded (or padded) base64url.
pub fn base64url_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::decode_config(data.trim_end_matches('='), base64::URL_SAFE_NO_PAD)
}

/// Parses a numeric quantity as the registry sends it.
///
/// # Accepted forms
/// - `"0x1a"` / `"0X1A"` hex strings (`"0x"` alone is zero)
/// - `"26"` decimal strings
/// - JSON numbers that fit in a `u64`
pub fn parse_quantity(value: &Value) -> Result<U256, String> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| format!("{n} is not a non-negative integer")),
        Value::String(s) => parse_quantity_str(s),
        other => Err(format!("expected a number or string, got {other}")),
    }
}

fn parse_quantity_str(raw: &str) -> Result<U256, String> {
    let s = raw.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if hex.is_empty() {
            return Ok(U256::zero());
        }
        U256::from_str_radix(hex, 16).map_err(|e| format!("invalid hex quantity `{raw}`: {e}"))
    } else {
        U256::from_dec_str(s).map_err(|e| format!("invalid decimal quantity `{raw}`: {e}"))
    }
}

/// Evaluates a simple JSONPath (`$.a.b`, `$.a[0].b`, `$['a']`) against a value.
///
/// Only the member and index selectors Presentation Definitions use in
/// practice are supported; anything else yields `None`.
pub fn json_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let rest = path.trim().strip_prefix('$')?;
    let mut current = root;
    let mut chars = rest.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let mut key = String::new();
                while let Some(&n) = chars.peek() {
                    if n == '.' || n == '[' {
                        break;
                    }
                    key.push(n);
                    chars.next();
                }
                current = current.get(key.as_str())?;
            }
            '[' => {
                let mut inner = String::new();
                for n in chars.by_ref() {
                    if n == ']' {
                        break;
                    }
                    inner.push(n);
                }
                let inner = inner.trim();
                if let Ok(index) = inner.parse::<usize>() {
                    current = current.get(index)?;
                } else {
                    let key = inner.trim_matches(|q| q == '\'' || q == '"');
                    current = current.get(key)?;
                }
            }
            _ => return None,
        }
    }
    Some(current)
}
