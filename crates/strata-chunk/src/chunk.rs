use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use strata_crypto::hash::SaltedHasher;

use crate::ChunkError;

/// Smallest size a chunk is accounted as, regardless of its file size.
pub const MIN_CHUNK_SIZE: u64 = 1024 * 1024;

const TRAILER_LEN: u64 = 4;
const READ_BUF: usize = 1024 * 1024;

/// A chunk file on disk: payload followed by a little-endian CRC32 trailer.
#[derive(Debug, Clone)]
pub struct ChunkFile {
    path: PathBuf,
    size: u64,
}

impl ChunkFile {
    /// Stat an existing chunk file. Files shorter than the trailer are rejected.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChunkError> {
        let path = path.as_ref().to_path_buf();
        let size = fs::metadata(&path)?.len();
        if size < TRAILER_LEN {
            return Err(ChunkError::TooSmall(size));
        }
        Ok(Self { path, size })
    }

    /// Write `payload` plus its checksum trailer to `path` and fsync it.
    pub fn write_with_checksum(path: impl AsRef<Path>, payload: &[u8]) -> Result<Self, ChunkError> {
        let path = path.as_ref();
        let mut file = File::create(path)?;
        file.write_all(payload)?;
        file.write_all(&crc32fast::hash(payload).to_le_bytes())?;
        file.sync_all()?;
        Ok(Self {
            path: path.to_path_buf(),
            size: payload.len() as u64 + TRAILER_LEN,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size including the trailer.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Size used for accounting: never below [`MIN_CHUNK_SIZE`].
    pub fn chunk_size(&self) -> u64 {
        self.size.max(MIN_CHUNK_SIZE)
    }

    /// Recompute the CRC32 of the payload and compare it with the trailer.
    pub fn verify_checksum(&self) -> Result<(), ChunkError> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut hasher = crc32fast::Hasher::new();
        let mut remaining = self.size - TRAILER_LEN;
        let mut buf = vec![0u8; READ_BUF];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            reader.read_exact(&mut buf[..want])?;
            hasher.update(&buf[..want]);
            remaining -= want as u64;
        }
        let mut trailer = [0u8; 4];
        reader.read_exact(&mut trailer)?;

        let expected = u32::from_le_bytes(trailer);
        let actual = hasher.finalize();
        if expected != actual {
            return Err(ChunkError::Checksum { expected, actual });
        }
        Ok(())
    }

    /// Salted SHA-256 of the whole file, trailer included.
    pub fn calc_hash(&self, salt: &[u8]) -> Result<String, ChunkError> {
        let mut file = File::open(&self.path)?;
        let mut hasher = SaltedHasher::new(salt);
        let mut buf = vec![0u8; READ_BUF];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    pub fn verify_hash(&self, salt: &[u8], expected: &str) -> Result<(), ChunkError> {
        if self.calc_hash(salt)? != expected {
            return Err(ChunkError::SecureHash);
        }
        Ok(())
    }

    /// Bytes in `[start, end)`. `end == 0` reads to the end of the file.
    pub fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>, ChunkError> {
        let (start, end) = self.resolve_range(start, end)?;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Validate a requested range against the file size, resolving `end == 0`.
    pub fn resolve_range(&self, start: u64, end: u64) -> Result<(u64, u64), ChunkError> {
        let end = if end == 0 { self.size } else { end };
        if start > end || end > self.size {
            return Err(ChunkError::InvalidRange { start, end, size: self.size });
        }
        Ok((start, end))
    }

    /// Everything before the trailer.
    pub fn payload(&self) -> Result<Vec<u8>, ChunkError> {
        self.read_range(0, self.size - TRAILER_LEN)
    }
}
