use std::fs::File;
use std::path::Path;
use std::time::Duration;

use chrono::SecondsFormat;
use reqwest::blocking::{Body, Client};
use strata_types::headers;
use strata_types::models::TransferInfo;

use crate::error::StorageError;

/// Chunk operations a client performs against storage nodes, each authorized
/// by a [`TransferInfo`] the control node issued.
pub trait StorageNodeApi: Send + Sync {
    /// Push the chunk file at `path` to `info.uri`.
    fn store_chunk(&self, info: &TransferInfo, path: &Path) -> Result<(), StorageError>;
    /// Bytes `[start, end)` of `info.chunk_name`; `end == 0` reads to the end.
    fn retrieve_chunk(&self, info: &TransferInfo, start: u64, end: u64) -> Result<Vec<u8>, StorageError>;
}

pub struct HttpStorageNodeApi {
    client: Client,
}

impl HttpStorageNodeApi {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(600))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    fn relay(&self, req: reqwest::blocking::RequestBuilder, info: &TransferInfo) -> reqwest::blocking::RequestBuilder {
        req.header(headers::SIGNATURE, &info.signature)
            .header(headers::SIGNATURE_TS, info.signature_ts.to_rfc3339_opts(SecondsFormat::Micros, true))
            .header(headers::EXPIRE_TIME, info.expire_time.to_rfc3339_opts(SecondsFormat::Micros, true))
    }
}

impl Default for HttpStorageNodeApi {
    fn default() -> Self {
        Self::new()
    }
}

fn chunk_url(info: &TransferInfo) -> String {
    format!("{}/chunks/{}", info.uri.trim_end_matches('/'), info.chunk_name)
}

fn check(resp: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, StorageError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        return Err(StorageError::Rejected { status: status.as_u16(), body });
    }
    Ok(resp)
}

impl StorageNodeApi for HttpStorageNodeApi {
    fn store_chunk(&self, info: &TransferInfo, path: &Path) -> Result<(), StorageError> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let req = self
            .client
            .put(chunk_url(info))
            .header(headers::TRANSFER_NAME, &info.transfer_name)
            .header(headers::HASH_SALT, &info.chunk_hash_salt)
            .header("Content-Type", "application/octet-stream");
        let resp = self
            .relay(req, info)
            .body(Body::sized(file, size))
            .send()
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        check(resp)?;
        Ok(())
    }

    fn retrieve_chunk(&self, info: &TransferInfo, start: u64, end: u64) -> Result<Vec<u8>, StorageError> {
        let req = self
            .client
            .get(chunk_url(info))
            .query(&[("byte_start", start), ("byte_end", end)]);
        let resp = self
            .relay(req, info)
            .send()
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        let bytes = check(resp)?.bytes().map_err(|e| StorageError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
