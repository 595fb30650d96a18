//! Shared-secret validation for the management endpoints.
//!
//! The caller hashes `cleaned_body || secret` with SHA-256 and sends the
//! lowercase hex digest in `X-GATEWAY-KEY`; cleaning strips ASCII spaces
//! and newlines. The gateway repeats the computation and compares in
//! constant time.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::core::middleware::{middleware_fn, MiddlewareFn};

pub const GATEWAY_KEY_HEADER: &str = "X-GATEWAY-KEY";

/// Strip ASCII spaces and newlines so insignificant whitespace does not
/// change the digest.
pub fn cleaned_body(body: &[u8]) -> Vec<u8> {
    body.iter()
        .copied()
        .filter(|b| *b != b' ' && *b != b'\n')
        .collect()
}

/// Lowercase hex `SHA-256(cleaned_body || secret)`.
pub fn compute_gateway_key(cleaned: &[u8], secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cleaned);
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn keys_match(expected: &str, presented: &str) -> bool {
    // ct_eq on equal-length slices; a length mismatch leaks nothing the
    // attacker does not already know.
    expected.len() == presented.len()
        && expected
            .as_bytes()
            .ct_eq(presented.as_bytes())
            .unwrap_u8()
            == 1
}

/// Pre middleware gating a route on the shared secret. Rejects with 401
/// and never calls `next` on any mismatch.
pub fn validate_gateway_secret(secret: String) -> MiddlewareFn {
    middleware_fn(move |ctx, next| {
        let secret = secret.clone();
        Box::pin(async move {
            let body = match ctx.raw_body().await {
                Ok(body) => body,
                Err(_) => {
                    ctx.send_unauthorized();
                    return;
                }
            };

            let expected = compute_gateway_key(&cleaned_body(&body), &secret);
            let presented = ctx.request_header(GATEWAY_KEY_HEADER).unwrap_or_default();

            if !keys_match(&expected, &presented) {
                ctx.send_unauthorized();
                return;
            }

            next(ctx).await;
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleaning_strips_spaces_and_newlines() {
        let body = b"{ \"serviceName\":\n \"s1\" }";
        assert_eq!(cleaned_body(body), b"{\"serviceName\":\"s1\"}");
    }

    #[test]
    fn key_is_lowercase_hex_of_body_and_secret() {
        let key = compute_gateway_key(b"{}", "secret");

        let mut hasher = Sha256::new();
        hasher.update(b"{}secret");
        assert_eq!(key, hex::encode(hasher.finalize()));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn mismatched_keys_are_rejected() {
        let expected = compute_gateway_key(b"{}", "secret");
        let mut flipped = expected.clone().into_bytes();
        flipped[0] ^= 1;
        let flipped = String::from_utf8(flipped).unwrap();

        assert!(keys_match(&expected, &expected.clone()));
        assert!(!keys_match(&expected, &flipped));
        assert!(!keys_match(&expected, ""));
    }
}
