//! Turning a local file into a directory of chunks ready for upload.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::chunker::{self, CHUNK_SIZE};
use crate::error::PrepareError;

pub const CHUNK_INFO_NAME: &str = "file_chunk_info.json";
pub const UPLOADS_DIR: &str = "uploads";

/// How a file was chunked. Written once before splitting with
/// `chunking_complete = false` and again after the last chunk is on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunkInfo {
    pub file_path: PathBuf,
    pub encrypted: bool,
    pub compressed: bool,
    pub chunking_complete: bool,
}

impl FileChunkInfo {
    pub fn load(chunk_dir: &Path) -> Result<Self, PrepareError> {
        let bytes = fs::read(chunk_dir.join(CHUNK_INFO_NAME))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, chunk_dir: &Path) -> Result<(), PrepareError> {
        write_json_synced(&chunk_dir.join(CHUNK_INFO_NAME), self)
    }
}

/// Serialize `value` to `path` and fsync before returning.
pub(crate) fn write_json_synced<T: Serialize>(path: &Path, value: &T) -> Result<(), PrepareError> {
    let mut file = File::create(path)?;
    file.write_all(&serde_json::to_vec_pretty(value)?)?;
    file.sync_all()?;
    Ok(())
}

/// Hex SHA-256 of a whole file, read in chunk-sized blocks.
pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Options for [`prepare_file`].
#[derive(Debug, Clone)]
pub struct PrepareOptions<'a> {
    pub encrypt: bool,
    pub compress: bool,
    pub encrypt_key: Option<&'a [u8; 32]>,
    pub chunk_size: usize,
}

impl Default for PrepareOptions<'_> {
    fn default() -> Self {
        Self {
            encrypt: false,
            compress: false,
            encrypt_key: None,
            chunk_size: CHUNK_SIZE,
        }
    }
}

/// Split `file_path` into chunks under `<working_dir>/uploads/<sha256>`.
///
/// Calling this again for the same content returns the existing directory
/// once chunking has completed. A directory left behind by an interrupted
/// run is wiped and rebuilt.
pub fn prepare_file(working_dir: &Path, file_path: &Path, opts: &PrepareOptions<'_>) -> Result<PathBuf, PrepareError> {
    let key = match (opts.encrypt, opts.encrypt_key) {
        (true, None) => return Err(PrepareError::MissingKey),
        (true, Some(key)) => Some(key),
        (false, _) => None,
    };

    let chunk_dir = working_dir.join(UPLOADS_DIR).join(file_sha256(file_path)?);
    if chunk_dir.exists() {
        match FileChunkInfo::load(&chunk_dir) {
            Ok(info) if info.chunking_complete => {
                info!("{} is already split in {}", file_path.display(), chunk_dir.display());
                return Ok(chunk_dir);
            }
            Ok(_) => info!("Restarting interrupted split of {}", file_path.display()),
            Err(e) => warn!("Discarding {} with unreadable chunk info: {}", chunk_dir.display(), e),
        }
        fs::remove_dir_all(&chunk_dir)?;
    }
    fs::create_dir_all(&chunk_dir)?;

    let mut info = FileChunkInfo {
        file_path: file_path.to_path_buf(),
        encrypted: opts.encrypt,
        compressed: opts.compress,
        chunking_complete: false,
    };
    info.save(&chunk_dir)?;

    let chunks = chunker::split_file(file_path, &chunk_dir, opts.chunk_size, opts.compress, key)?;

    info.chunking_complete = true;
    info.save(&chunk_dir)?;
    info!("Split {} into {} chunks", file_path.display(), chunks.len());
    Ok(chunk_dir)
}
