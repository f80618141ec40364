//! Chunk file format, append-only transfer logs and byte-range segmentation.
//!
//! A chunk on disk is its payload followed by a 4-byte little-endian CRC32 of
//! that payload. Both clients and storage nodes go through [`ChunkFile`].

pub mod chunk;
pub mod log;
pub mod segment;

pub use chunk::{ChunkFile, MIN_CHUNK_SIZE};
pub use log::{DownloadLog, TransferLog, UploadLog};
pub use segment::{MIN_SEGMENT_SIZE, split_segments};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("checksum mismatch: trailer {expected:08x}, computed {actual:08x}")]
    Checksum { expected: u32, actual: u32 },
    #[error("secure hash mismatch")]
    SecureHash,
    #[error("chunk file too small: {0} bytes")]
    TooSmall(u64),
    #[error("invalid byte range {start}..{end} for chunk of {size} bytes")]
    InvalidRange { start: u64, end: u64, size: u64 },
}

#[derive(Debug, Error)]
pub enum TransferLogError {
    #[error("transfer log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed line {line} in {log}: {reason}")]
    Malformed {
        log: &'static str,
        line: usize,
        reason: String,
    },
}
