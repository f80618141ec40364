//! Key generation and base64 encoding.

use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{SigningKey, VerifyingKey};

use crate::CryptoError;

/// Generate a random 256-bit key for the chunk cipher.
pub fn generate_chunk_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Generate a fresh ed25519 signing key.
pub fn generate_signing_key() -> SigningKey {
    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut secret);
    SigningKey::from_bytes(&secret)
}

pub fn key_to_base64(key: &[u8; 32]) -> String {
    BASE64.encode(key)
}

pub fn key_from_base64(encoded: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| CryptoError::Key(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::Key("expected 32 bytes".into()))
}

pub fn verifying_key_to_base64(key: &VerifyingKey) -> String {
    BASE64.encode(key.to_bytes())
}

pub fn verifying_key_from_base64(encoded: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes = key_from_base64(encoded)?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| CryptoError::Key(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_key_base64_roundtrip() {
        let key = generate_chunk_key();
        assert_eq!(key_from_base64(&key_to_base64(&key)).unwrap(), key);
    }

    #[test]
    fn short_key_is_rejected() {
        let err = key_from_base64(&BASE64.encode([1u8; 16])).unwrap_err();
        assert!(matches!(err, CryptoError::Key(_)));
    }

    #[test]
    fn verifying_key_roundtrip() {
        let signing = generate_signing_key();
        let encoded = verifying_key_to_base64(&signing.verifying_key());
        let decoded = verifying_key_from_base64(&encoded).unwrap();
        assert_eq!(decoded, signing.verifying_key());
    }
}
