//! Signature verification for inbound grading callbacks.
//!
//! The grading service signs each delivery with HMAC-SHA256 over
//! `body + "." + timestamp` and sends the digest as `sha256=<hex>`. The
//! verifier is a pure cryptographic check: replay suppression belongs to the
//! job ledger, and the timestamp window is enforced separately by the caller.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verifies a `sha256=<hex>` signature header against the raw request body
/// and caller-supplied timestamp.
///
/// Comparison happens in constant time via `Mac::verify_slice`. Malformed
/// headers or non-hex digests are simply invalid; this never errors.
pub fn verify_signature(secret: &str, body: &[u8], timestamp: &str, signature_header: &str) -> bool {
    let Some(hex_digest) = signature_header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.update(b".");
    mac.update(timestamp.as_bytes());

    mac.verify_slice(&expected).is_ok()
}

/// Produces the signature header the grading service would send for the given
/// body and timestamp. Used by tests and local tooling.
pub fn sign_payload(secret: &str, body: &[u8], timestamp: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

/// Bounds replay exposure: a structurally valid signature is still rejected
/// when its timestamp is further than `max_skew_seconds` from `now_epoch`.
///
/// The timestamp is the sender's unix epoch seconds as a decimal string; a
/// non-numeric value fails closed.
pub fn within_allowed_skew(timestamp: &str, now_epoch: i64, max_skew_seconds: i64) -> bool {
    let Ok(sent) = timestamp.parse::<i64>() else {
        return false;
    };
    (now_epoch - sent).abs() <= max_skew_seconds
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-webhook-secret";

    #[test]
    fn round_trip_signature_verifies() {
        let body = br#"{"eventId":"evt-1","status":"COMPLETED"}"#;
        let header = sign_payload(SECRET, body, "1700000000");
        assert!(verify_signature(SECRET, body, "1700000000", &header));
    }

    #[test]
    fn flipping_any_body_byte_invalidates() {
        let body = b"{\"eventId\":\"evt-1\",\"overallScore\":8.5}".to_vec();
        let header = sign_payload(SECRET, &body, "1700000000");

        for i in 0..body.len() {
            let mut tampered = body.clone();
            tampered[i] ^= 0x01;
            assert!(
                !verify_signature(SECRET, &tampered, "1700000000", &header),
                "byte {} flip should invalidate the signature",
                i
            );
        }
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let header = sign_payload(SECRET, body, "1700000000");
        assert!(!verify_signature("other-secret", body, "1700000000", &header));
    }

    #[test]
    fn timestamp_is_part_of_the_signed_material() {
        let body = b"payload";
        let header = sign_payload(SECRET, body, "1700000000");
        assert!(!verify_signature(SECRET, body, "1700000001", &header));
    }

    #[test]
    fn malformed_headers_are_invalid_not_errors() {
        let body = b"payload";
        assert!(!verify_signature(SECRET, body, "1700000000", ""));
        assert!(!verify_signature(SECRET, body, "1700000000", "sha256="));
        assert!(!verify_signature(SECRET, body, "1700000000", "sha256=zzzz"));
        assert!(!verify_signature(SECRET, body, "1700000000", "md5=abcdef"));
        assert!(!verify_signature(SECRET, body, "1700000000", "abcdef0123"));
    }

    #[test]
    fn skew_window_is_symmetric_and_fails_closed() {
        assert!(within_allowed_skew("1700000000", 1_700_000_100, 300));
        assert!(within_allowed_skew("1700000400", 1_700_000_100, 300));
        assert!(!within_allowed_skew("1699999000", 1_700_000_100, 300));
        assert!(!within_allowed_skew("1700001000", 1_700_000_100, 300));
        assert!(!within_allowed_skew("not-a-number", 1_700_000_100, 300));
        assert!(!within_allowed_skew("", 1_700_000_100, 300));
    }
}
