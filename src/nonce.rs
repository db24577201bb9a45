use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::types::{Nonce, StateToken};

/// Generates a cryptographically random `state` parameter.
///
/// Returns a 22-character URL-safe string (16 random bytes → base64url).
#[must_use]
pub fn generate_state() -> StateToken {
    let random_bytes: [u8; 16] = rand::rng().random();
    StateToken(URL_SAFE_NO_PAD.encode(random_bytes))
}

/// Generates a cryptographically random OIDC `nonce`.
///
/// Returns a 43-character URL-safe string (32 random bytes → base64url).
#[must_use]
pub fn generate_nonce() -> Nonce {
    let random_bytes: [u8; 32] = rand::rng().random();
    Nonce(URL_SAFE_NO_PAD.encode(random_bytes))
}

/// Computes the `at_hash` claim value for an access token (RS256/ES256/HS256 family).
///
/// `at_hash = BASE64URL(left half of SHA256(access_token))`
#[must_use]
pub fn access_token_hash(access_token: &str) -> String {
    let hash = Sha256::digest(access_token.as_bytes());
    URL_SAFE_NO_PAD.encode(&hash[..hash.len() / 2])
}
