use std::path::PathBuf;

use anyhow::{Context, Result};
use strata_crypto::keys::key_from_base64;

pub const DEFAULT_UPLOAD_THREADS: usize = 3;
pub const DEFAULT_DOWNLOAD_THREADS: usize = 10;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub control_url: String,
    /// Chunk directories and transfer logs live under here.
    pub working_dir: PathBuf,
    pub encrypt_key: Option<[u8; 32]>,
    pub upload_threads: usize,
    pub download_threads: usize,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        let control_url = std::env::var("STRATA_CONTROL_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".into());
        let working_dir: PathBuf = std::env::var("STRATA_WORKING_DIR")
            .unwrap_or_else(|_| "./strata-client".into())
            .into();
        let encrypt_key = match std::env::var("STRATA_ENCRYPT_KEY") {
            Ok(encoded) if !encoded.is_empty() => {
                Some(key_from_base64(&encoded).context("STRATA_ENCRYPT_KEY must be a base64 32-byte key")?)
            }
            _ => None,
        };

        Ok(Self {
            control_url: control_url.trim_end_matches('/').to_string(),
            working_dir,
            encrypt_key,
            upload_threads: env_or("STRATA_UPLOAD_THREADS", DEFAULT_UPLOAD_THREADS),
            download_threads: env_or("STRATA_DOWNLOAD_THREADS", DEFAULT_DOWNLOAD_THREADS),
        })
    }
}
