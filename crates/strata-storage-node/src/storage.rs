use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Largest chunk a node accepts.
pub const CHUNK_SIZE_MAX: u64 = 2 * 1024 * 1024 * 1024;
/// Free space a store must keep before accepting another chunk.
pub const MIN_FREE_MB: u64 = 10;

const TMP_PREFIX: &str = "tmp_transfer_";
const CHUNK_NAME_LEN: usize = 15;

/// `C-` followed by 13 base32 characters.
pub fn is_chunk_name(name: &str) -> bool {
    name.len() == CHUNK_NAME_LEN
        && name.starts_with("C-")
        && name[2..].bytes().all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
}

/// Transfer names end up in temp file names, so only allow a safe alphabet.
pub fn is_transfer_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Manages chunk files on disk.
///
/// Chunks are sharded two levels deep by the tail of their name:
/// `{storage_dir}/{last char}/{last two chars}/{name}`. In-flight uploads land
/// in `{storage_dir}/tmp_transfer_{transfer_name}` until verified.
pub struct ChunkStore {
    dir: PathBuf,
}

impl ChunkStore {
    pub async fn new(dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Chunk storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn chunk_path(&self, chunk_name: &str) -> PathBuf {
        let n = chunk_name.len();
        let last = &chunk_name[n.saturating_sub(1)..];
        let last_two = &chunk_name[n.saturating_sub(2)..];
        self.dir.join(last).join(last_two).join(chunk_name)
    }

    pub fn tmp_path(&self, transfer_name: &str) -> PathBuf {
        self.dir.join(format!("{}{}", TMP_PREFIX, transfer_name))
    }

    pub async fn exists(&self, chunk_name: &str) -> bool {
        fs::try_exists(self.chunk_path(chunk_name)).await.unwrap_or(false)
    }

    /// Free space on the storage volume in MiB.
    pub fn available_mb(&self) -> io::Result<u64> {
        Ok(fs2::available_space(&self.dir)? / (1024 * 1024))
    }

    /// Remove a chunk. Returns `false` if there was nothing to remove.
    pub async fn delete_chunk(&self, chunk_name: &str) -> io::Result<bool> {
        match fs::remove_file(self.chunk_path(chunk_name)).await {
            Ok(()) => {
                info!("Deleted chunk {}", chunk_name);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Every chunk file under the store. Temp files are skipped; anything else
    /// that is not a chunk name is logged and skipped.
    pub fn list_chunks(&self) -> Vec<(String, PathBuf)> {
        let mut chunks = Vec::new();
        for entry in WalkDir::new(&self.dir).into_iter().filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("Skipping unreadable entry: {}", err);
                None
            }
        }) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                warn!("Skipping non UTF-8 filename {:?}", entry.file_name());
                continue;
            };
            if name.starts_with(TMP_PREFIX) {
                continue;
            }
            if !is_chunk_name(name) {
                warn!("Invalid filename in chunk store: {}", name);
                continue;
            }
            chunks.push((name.to_string(), entry.path().to_path_buf()));
        }
        chunks.sort();
        chunks
    }
}
