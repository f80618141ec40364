//! AES-256-GCM chunk cipher. Output is `nonce || ciphertext`, with the
//! chunk sequence number bound as associated data.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, Payload, rand_core::RngCore},
};

use crate::CryptoError;

const NONCE_LEN: usize = 12;

/// Encrypt one chunk payload with AES-256-GCM.
///
/// Output is `nonce || ciphertext`. The sequence number is bound as associated
/// data, so a chunk decrypted under the wrong position fails authentication.
pub fn encrypt_chunk(key: &[u8; 32], sequence_number: u32, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = sequence_number.to_le_bytes();
    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: &aad })
        .map_err(|e| CryptoError::Cipher(format!("encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Reverse of [`encrypt_chunk`].
pub fn decrypt_chunk(key: &[u8; 32], sequence_number: u32, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_LEN {
        return Err(CryptoError::Cipher("ciphertext shorter than nonce".into()));
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);

    let aad = sequence_number.to_le_bytes();
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), Payload { msg: ciphertext, aad: &aad })
        .map_err(|e| CryptoError::Cipher(format!("decryption failed: {}", e)))
}
