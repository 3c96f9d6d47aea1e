//! Bearer token handling.
//!
//! Tokens are random hex strings handed to the user once; only their SHA-256
//! hash is stored.

use rand::Rng;
use sha2::{Digest, Sha256};

const TOKEN_BYTES: usize = 32;

/// Generates a new random API token.
pub fn generate_token() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::rng().random();
    hex(&bytes)
}

/// Hex-encoded SHA-256 of a token, the form persisted and looked up.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Extracts the bearer token from an Authorization header value.
///
/// Expected format: "Bearer <token>"
/// Returns `None` if the header doesn't match the expected format.
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();

    // RFC 6750 allows a case-insensitive scheme
    if header.len() < 7 || !header.is_char_boundary(7) {
        return None;
    }

    let (prefix, token) = header.split_at(7);
    if prefix.eq_ignore_ascii_case("Bearer ") {
        let token = token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_unique_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_token() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(hash_token("abc"), hash_token("abd"));
    }

    #[test]
    fn test_extract_bearer_token_valid() {
        assert_eq!(extract_bearer_token("Bearer secret123"), Some("secret123"));
        assert_eq!(extract_bearer_token("bearer secret123"), Some("secret123"));
        assert_eq!(extract_bearer_token("BEARER secret123"), Some("secret123"));
        assert_eq!(extract_bearer_token("  Bearer secret123  "), Some("secret123"));
    }

    #[test]
    fn test_extract_bearer_token_invalid() {
        assert_eq!(extract_bearer_token(""), None);
        assert_eq!(extract_bearer_token("Basic secret123"), None);
        assert_eq!(extract_bearer_token("Bearer"), None);
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Bearersecret123"), None);
        assert_eq!(extract_bearer_token("Бearer token"), None);
    }
}
