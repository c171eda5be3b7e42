//! PKCE (Proof Key for Code Exchange) helpers for OAuth 2.0
//!
//! Implements RFC 7636 for public clients that cannot hold a client secret.
//! Building the authorization URL and receiving the redirect is left to the
//! application; the verifier produced here is later passed to
//! `TokenAuthority::authorize_with_code`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Challenge method sent alongside the challenge
pub const CHALLENGE_METHOD: &str = "S256";

/// Generate a cryptographically secure code verifier
///
/// Returns a URL-safe base64-encoded random string of 64 bytes (86
/// characters). Per RFC 7636, verifiers must be 43-128 characters long.
pub fn generate_code_verifier() -> String {
    let mut rng = rand::thread_rng();
    let random_bytes: Vec<u8> = (0..64).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// BASE64URL(SHA256(ASCII(code_verifier)))
pub fn code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Verifier and derived challenge for one authorization attempt
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// Kept secret until the code exchange
    pub verifier: String,
    /// Sent with the authorization request
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let verifier = generate_code_verifier();
        let challenge = code_challenge(&verifier);
        Self { verifier, challenge }
    }

    pub fn challenge_method(&self) -> &'static str {
        CHALLENGE_METHOD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates the verifier length and alphabet constraints.
    #[test]
    fn verifier_is_within_rfc_bounds() {
        let verifier = generate_code_verifier();
        assert!((43..=128).contains(&verifier.len()));
        assert!(verifier.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    /// Validates the RFC 7636 appendix B test vector.
    #[test]
    fn challenge_matches_rfc_vector() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r7wW1gFWFOEjXk";
        assert_eq!(code_challenge(verifier), "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn pairs_are_unique() {
        let first = PkcePair::generate();
        let second = PkcePair::generate();
        assert_ne!(first.verifier, second.verifier);
        assert_eq!(first.challenge, code_challenge(&first.verifier));
        assert_eq!(first.challenge_method(), "S256");
    }
}
