use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Headers that may carry the webhook signature, in lookup order.
pub const SIGNATURE_HEADERS: &[&str] = &["mac", "x-zevent-signature"];

/// Hex HMAC-SHA256 of `body` keyed by `secret`.
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Check a provided signature against the body.
pub fn verify_signature(secret: &str, body: &[u8], provided: &str) -> bool {
    if secret.is_empty() {
        debug!("Webhook secret not configured, rejecting");
        return false;
    }
    let expected = compute_signature(secret, body);
    let provided = provided.trim().to_ascii_lowercase();
    safe_equal(&expected, &provided)
}

/// Pull the signature from whichever supported header is present.
pub fn extract_signature(headers: &HeaderMap) -> Option<&str> {
    SIGNATURE_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .find_map(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
}

/// Timing-safe string comparison.
fn safe_equal(a: &str, b: &str) -> bool {
    if a.is_empty() || a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
