use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use strata_chunk::ChunkFile;
use strata_types::api::SendRecoveryData;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::control::{ControlError, ControlNode};
use crate::storage::ChunkStore;

/// More corrupt chunks than this points at the disk, not at the chunks.
pub const CORRUPT_THRESHOLD: usize = 10;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("{corrupt} corrupt chunks found; the storage medium may be failing")]
    StorageMedium { corrupt: usize },
    #[error("replace request failed: {0}")]
    Control(#[from] ControlError),
    #[error("integrity I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub checked: usize,
    /// Names of chunks that failed verification, sorted.
    pub corrupt: Vec<String>,
}

/// Verify the checksum of every chunk in the store. Any failure to read or
/// verify a chunk counts it as corrupt.
pub fn scan_store(store: &ChunkStore) -> IntegrityReport {
    let mut report = IntegrityReport::default();
    for (name, path) in store.list_chunks() {
        report.checked += 1;
        if let Err(e) = ChunkFile::open(&path).and_then(|c| c.verify_checksum()) {
            warn!("Chunk {} failed verification: {}", name, e);
            report.corrupt.push(name);
        }
    }
    report.corrupt.sort();
    report
}

/// One integrity pass. Up to [`CORRUPT_THRESHOLD`] corrupt chunks are reported
/// to the control node for replacement in a single call; local copies stay in
/// place. Above the threshold nothing is reported.
pub async fn check_integrity(
    store: Arc<ChunkStore>,
    control: &dyn ControlNode,
) -> Result<IntegrityReport, IntegrityError> {
    info!("Integrity checks started");
    let report = tokio::task::spawn_blocking(move || scan_store(&store))
        .await
        .map_err(std::io::Error::other)?;

    if report.corrupt.len() > CORRUPT_THRESHOLD {
        error!(
            "{} of {} chunks are corrupt. Check the storage medium; no replacements requested.",
            report.corrupt.len(),
            report.checked
        );
        return Err(IntegrityError::StorageMedium { corrupt: report.corrupt.len() });
    }
    if !report.corrupt.is_empty() {
        info!("Requesting replacement of {} corrupt chunks", report.corrupt.len());
        control.replace_chunks(report.corrupt.clone()).await?;
    }
    info!("Integrity checks completed: {} chunks checked", report.checked);
    Ok(report)
}

/// Background task running [`check_integrity`] on an interval.
pub async fn run_integrity_loop(
    store: Arc<ChunkStore>,
    control: Arc<dyn ControlNode>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = check_integrity(store.clone(), control.as_ref()).await {
            error!("Integrity check failed: {}", e);
        }
    }
}

/// Zstd-compressed `name,hash` line for every chunk whose checksum holds. The
/// hash is the unsalted secure hash of the whole chunk file.
pub fn collect_recovery_info(store: &ChunkStore) -> Result<Vec<u8>, IntegrityError> {
    info!("Collecting chunk names and hashes for recovery");
    let mut encoder = zstd::Encoder::new(Vec::new(), 0)?;
    for (name, path) in store.list_chunks() {
        let verified = ChunkFile::open(&path).and_then(|c| {
            c.verify_checksum()?;
            c.calc_hash(b"")
        });
        let hash = match verified {
            Ok(hash) => hash,
            Err(e) => {
                error!("Skipping chunk {} in recovery listing: {}", name, e);
                continue;
            }
        };
        writeln!(encoder, "{},{}", name, hash)?;
    }
    Ok(encoder.finish()?)
}

pub fn recovery_request(data: &[u8]) -> SendRecoveryData {
    SendRecoveryData { data: BASE64.encode(data) }
}
