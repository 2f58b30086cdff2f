//! Request fingerprints used as cache and de-duplication keys.
//!
//! A fingerprint is `"{METHOD}:{url}:{hash}"`, where `hash` is a 32-bit
//! polynomial rolling hash of the serialized body rendered in base 36. It is
//! fast and deterministic, not collision resistant: two different bodies may
//! occasionally share a key.
//!
//! JSON bodies are serialized with `serde_json`, which sorts object keys and
//! keeps the decimal point of floats (`1.0`). Keys are only meaningful within
//! one process and are not meant to match keys computed elsewhere.

use crate::ApiRequest;

/// Computes the fingerprint of a request.
///
/// ```
/// use api_optimizer::{ApiRequest, fingerprint};
/// use serde_json::json;
///
/// let a = ApiRequest::post("/api/chat").json(json!({"q": "status", "n": 1}));
/// let b = ApiRequest::post("/api/chat").json(json!({"n": 1, "q": "status"}));
/// assert_eq!(fingerprint(&a), fingerprint(&b));
/// assert!(fingerprint(&a).starts_with("POST:/api/chat:"));
/// ```
pub fn fingerprint(request: &ApiRequest) -> String {
    let body = request.body.as_canonical_string();
    format!("{}:{}:{}", request.method, request.url, hash_string(&body))
}

/// Hashes a string with `h = h * 31 + unit` over its UTF-16 code units,
/// wrapping in a signed 32-bit accumulator, and renders the result in base 36.
pub fn hash_string(input: &str) -> String {
    let hash = input.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    });
    to_base36(hash)
}

fn to_base36(value: i32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let mut magnitude = value.unsigned_abs();
    if magnitude == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::with_capacity(8);
    while magnitude > 0 {
        digits.push(DIGITS[(magnitude % 36) as usize]);
        magnitude /= 36;
    }
    if value < 0 {
        digits.push(b'-');
    }
    digits.reverse();
    // only ASCII digits and '-' were pushed
    String::from_utf8_lossy(&digits).into_owned()
}
