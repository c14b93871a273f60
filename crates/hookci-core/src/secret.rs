//! Repository secrets and request signatures.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Generate a random 32 character secret for a repository.
pub fn generate_secret() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Verify an `X-Hub-Signature-256` style header (`sha256=<hex>`) over `body`.
pub fn verify_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}

/// Compute the `sha256=<hex>` signature header for `body`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    format!("sha256={}", hmac_hex(secret, body))
}

pub(crate) fn hmac_hex(secret: &str, message: &[u8]) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Check a hex-encoded HMAC of `message` keyed with `secret`.
pub(crate) fn verify_mac_hex(secret: &str, message: &[u8], mac_hex: &str) -> bool {
    let Ok(expected) = hex::decode(mac_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&expected).is_ok()
}

/// Check a plain secret sent in a request body against the repository secret.
///
/// Both values are run through HMAC so the final comparison is the
/// constant-time `verify_slice`. An empty repository secret never matches.
pub fn verify_secret(secret: &str, provided: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    verify_mac_hex(secret, provided.as_bytes(), &hmac_hex(secret, secret.as_bytes()))
}
