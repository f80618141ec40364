//! Salted SHA-256 content hashes of chunks.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

/// SHA-256 over `salt ++ data`, rendered as unpadded URL-safe base64.
///
/// Feed data incrementally with [`SaltedHasher::update`]; chunk files are
/// hashed in fixed-size reads.
pub struct SaltedHasher {
    inner: Sha256,
}

impl SaltedHasher {
    pub fn new(salt: &[u8]) -> Self {
        let mut inner = Sha256::new();
        inner.update(salt);
        Self { inner }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> String {
        URL_SAFE_NO_PAD.encode(self.inner.finalize())
    }
}

pub fn salted_hash(salt: &[u8], data: &[u8]) -> String {
    let mut hasher = SaltedHasher::new(salt);
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_matches_one_shot() {
        let mut h = SaltedHasher::new(b"salt");
        h.update(b"hello ");
        h.update(b"world");
        assert_eq!(h.finalize(), salted_hash(b"salt", b"hello world"));
    }

    #[test]
    fn salt_changes_hash() {
        assert_ne!(salted_hash(b"a", b"data"), salted_hash(b"b", b"data"));
        assert!(!salted_hash(b"a", b"data").contains('='));
    }
}
