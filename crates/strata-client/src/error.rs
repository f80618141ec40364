use std::io;

use strata_chunk::{ChunkError, TransferLogError};
use strata_crypto::CryptoError;
use thiserror::Error;

/// Failures talking to the control node.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control node unreachable: {0}")]
    Transport(String),
    #[error("control node rejected our credentials")]
    Authentication,
    #[error("control node returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Failures pushing to or pulling from a storage node.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage node unreachable: {0}")]
    Transport(String),
    #[error("storage node returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("chunk I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("bad chunk info: {0}")]
    Json(#[from] serde_json::Error),
    #[error("encryption requested but no key is configured")]
    MissingKey,
    #[error("not a chunk file name: {0}")]
    BadChunkName(String),
    #[error("decompression failed for chunk {sequence_number}: {reason}")]
    Decompress { sequence_number: u32, reason: String },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("control node granted sequence {got} for chunk {expected}")]
    SequenceMismatch { expected: u32, got: u32 },
    #[error("chunk {sequence_number} failed {attempts} times, giving up")]
    RetriesExhausted { sequence_number: u32, attempts: u32 },
    #[error("chunks are not numbered 1..n (found {found} at position {position})")]
    BadSequence { position: usize, found: u32 },
    #[error("chunking has not completed for this file")]
    ChunkingIncomplete,
    #[error("file name must be between 1 and {max} bytes")]
    InvalidFileName { max: usize },
    #[error("control node allocated {got} transfers for {requested} chunks")]
    AllocationMismatch { requested: usize, got: usize },
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Prepare(#[from] PrepareError),
    #[error(transparent)]
    Log(#[from] TransferLogError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("bad upload options: {0}")]
    Json(#[from] serde_json::Error),
    #[error("upload thread panicked")]
    Panicked,
}

/// A chunk could not be fetched or failed verification after download.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("no usable sources for chunk {0}")]
    NoSources(u32),
    #[error("segment {start}..{end} of chunk {sequence_number} failed: {source}")]
    Segment {
        sequence_number: u32,
        start: u64,
        end: u64,
        #[source]
        source: StorageError,
    },
    #[error("chunk {0} failed its checksum after download")]
    Checksum(u32),
    #[error("chunk {0} does not match its expected hash")]
    Hash(u32),
    #[error("bad hash salt for chunk {0}")]
    Salt(u32),
    #[error(transparent)]
    Log(#[from] TransferLogError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
