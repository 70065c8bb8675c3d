//! HMAC-SHA256 payload signing and verification.
//!
//! Signatures have the form `t=<unix-seconds>,v1=<hex hmac-sha256>` where
//! the MAC covers `{timestamp}.{json(body)}` to prevent replay attacks.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Maximum clock skew accepted during verification, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Sign a payload body with the current timestamp.
pub fn sign_payload(secret: &str, body: &serde_json::Value) -> String {
    sign_payload_at(secret, body, Utc::now().timestamp())
}

/// Sign a payload body at an explicit timestamp.
pub fn sign_payload_at(secret: &str, body: &serde_json::Value, timestamp: i64) -> String {
    let digest = compute_hmac(secret, timestamp, body);
    format!("t={timestamp},v1={digest}")
}

/// Verify a signature against a payload body using constant-time comparison.
///
/// Returns false if the signature is malformed, the MAC does not match, or
/// the embedded timestamp is more than [`SIGNATURE_TOLERANCE_SECS`] away
/// from the current time.
pub fn verify_signature(signature: &str, body: &serde_json::Value, secret: &str) -> bool {
    let Some((timestamp, provided_hex)) = parse_signature(signature) else {
        return false;
    };

    let age = (Utc::now().timestamp() - timestamp).abs();
    if age > SIGNATURE_TOLERANCE_SECS {
        return false;
    }

    let expected = compute_hmac(secret, timestamp, body);
    constant_time_eq(provided_hex.as_bytes(), expected.as_bytes())
}

/// Compute the hex-encoded HMAC-SHA256 over `{timestamp}.{json(body)}`.
fn compute_hmac(secret: &str, timestamp: i64, body: &serde_json::Value) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");

    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body.to_string().as_bytes());

    hex::encode(mac.finalize().into_bytes())
}

/// Parse a `t=<secs>,v1=<hex>` signature into its parts.
fn parse_signature(signature: &str) -> Option<(i64, &str)> {
    let (t_part, v1_part) = signature.split_once(',')?;

    let timestamp = t_part.strip_prefix("t=")?.parse::<i64>().ok()?;
    let hex_digest = v1_part.strip_prefix("v1=")?;
    if hex_digest.is_empty() {
        return None;
    }

    Some((timestamp, hex_digest))
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}
