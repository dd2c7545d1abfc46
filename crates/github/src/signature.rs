//! Webhook signature verification using HMAC-SHA256.
//!
//! GitHub signs each delivery with the app's webhook secret and sends the
//! result in the `X-Hub-Signature-256` header as `sha256=<hex>`. Verification
//! fails closed: a missing or malformed header rejects the delivery.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Parse a `sha256=<hex>` header value into raw signature bytes.
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix("sha256=")?;
    hex::decode(hex_sig).ok()
}

/// Compute the HMAC-SHA256 signature of a payload. Used to build the
/// expected header value in tests.
pub fn compute_signature(secret: &str, payload: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Format a signature the way GitHub sends it.
pub fn format_signature_header(secret: &str, payload: &[u8]) -> String {
    format!("sha256={}", hex::encode(compute_signature(secret, payload)))
}

/// Verify a webhook payload against its signature header. The comparison is
/// constant-time via `Mac::verify_slice`.
pub fn verify_signature(secret: &str, payload: &[u8], header: Option<&str>) -> bool {
    let Some(signature) = header.and_then(parse_signature_header) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}
