//! Strata crypto library: relay command signatures, the certificate cache,
//! salted chunk hashes and the client-side chunk cipher.

pub mod certs;
pub mod cipher;
pub mod hash;
pub mod keys;
pub mod signing;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("signature verification failed: {0}")]
    Signature(String),
    #[error("invalid key: {0}")]
    Key(String),
    #[error("cipher failure: {0}")]
    Cipher(String),
    #[error("unknown certificate: {0}")]
    UnknownCertificate(String),
}
