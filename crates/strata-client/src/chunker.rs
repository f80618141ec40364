//! Splitting a file into checksummed chunk files and joining them back.
//!
//! Each piece of the input is optionally zstd-compressed, then optionally
//! encrypted, then written with a CRC32 trailer as `chunk_000000001`,
//! `chunk_000000002`, ... Sequence numbers start at 1.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use strata_chunk::{ChunkError, ChunkFile};
use strata_crypto::cipher::{decrypt_chunk, encrypt_chunk};
use tracing::debug;

use crate::error::PrepareError;

pub const CHUNK_SIZE: usize = 4 * 1024 * 1024; // 4 MB
pub const CHUNK_PREFIX: &str = "chunk_";

const ZSTD_LEVEL: i32 = 3;

/// A chunk file produced by [`split_file`], as the uploader sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientChunk {
    pub sequence_number: u32,
    pub path: PathBuf,
    /// File size including the checksum trailer.
    pub size: u64,
    /// Ask the control node for the previous storage node on the next
    /// allocation. Set when resuming an interrupted upload.
    pub reuse_transfer: bool,
}

impl ClientChunk {
    pub fn file_name(&self) -> String {
        chunk_file_name(self.sequence_number)
    }

    pub fn calc_hash(&self, salt: &[u8]) -> Result<String, ChunkError> {
        ChunkFile::open(&self.path)?.calc_hash(salt)
    }
}

pub fn chunk_file_name(sequence_number: u32) -> String {
    format!("{}{:09}", CHUNK_PREFIX, sequence_number)
}

fn parse_chunk_file_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(CHUNK_PREFIX)?;
    if digits.len() != 9 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().filter(|&n| n > 0)
}

/// Fill `buf` from `reader`, stopping early only at EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Split `input` into chunk files under `out_dir`.
///
/// An empty input still produces one chunk so every file has a first
/// sequence number to allocate.
pub fn split_file(
    input: &Path,
    out_dir: &Path,
    chunk_size: usize,
    compress: bool,
    encrypt_key: Option<&[u8; 32]>,
) -> Result<Vec<ClientChunk>, PrepareError> {
    let mut file = File::open(input)?;
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut chunks = Vec::new();
    let mut sequence_number: u32 = 1;

    loop {
        let n = read_full(&mut file, &mut buf)?;
        if n == 0 && !chunks.is_empty() {
            break;
        }

        let mut data = if compress {
            zstd::encode_all(&buf[..n], ZSTD_LEVEL)?
        } else {
            buf[..n].to_vec()
        };
        if let Some(key) = encrypt_key {
            data = encrypt_chunk(key, sequence_number, &data)?;
        }

        let path = out_dir.join(chunk_file_name(sequence_number));
        let written = ChunkFile::write_with_checksum(&path, &data)?;
        debug!("Wrote {} ({} bytes)", path.display(), written.size());
        chunks.push(ClientChunk {
            sequence_number,
            path,
            size: written.size(),
            reuse_transfer: false,
        });

        if n < buf.len() {
            break;
        }
        sequence_number += 1;
    }
    Ok(chunks)
}

/// Every `chunk_*` file in `dir`, sorted by sequence number.
pub fn read_chunk_dir(dir: &Path) -> Result<Vec<ClientChunk>, PrepareError> {
    let mut chunks = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(CHUNK_PREFIX) {
            continue;
        }
        let sequence_number = parse_chunk_file_name(&name).ok_or(PrepareError::BadChunkName(name))?;
        chunks.push(ClientChunk {
            sequence_number,
            path: entry.path(),
            size: entry.metadata()?.len(),
            reuse_transfer: false,
        });
    }
    chunks.sort_by_key(|c| c.sequence_number);
    Ok(chunks)
}

/// Reverse [`split_file`]: verify each chunk, strip the trailer, decrypt,
/// decompress and append to `output`.
pub fn combine_chunks(
    chunks: &[ClientChunk],
    output: &Path,
    compressed: bool,
    encrypted: bool,
    encrypt_key: Option<&[u8; 32]>,
) -> Result<(), PrepareError> {
    let key = match (encrypted, encrypt_key) {
        (true, None) => return Err(PrepareError::MissingKey),
        (true, Some(key)) => Some(key),
        (false, _) => None,
    };

    let mut out = BufWriter::new(File::create(output)?);
    for chunk in chunks {
        let file = ChunkFile::open(&chunk.path)?;
        file.verify_checksum()?;
        let mut data = file.payload()?;
        if let Some(key) = key {
            data = decrypt_chunk(key, chunk.sequence_number, &data)?;
        }
        if compressed {
            data = zstd::decode_all(&data[..]).map_err(|e| PrepareError::Decompress {
                sequence_number: chunk.sequence_number,
                reason: e.to_string(),
            })?;
        }
        out.write_all(&data)?;
    }
    out.flush()?;
    out.get_ref().sync_all()?;
    Ok(())
}
