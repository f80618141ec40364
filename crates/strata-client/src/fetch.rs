//! Parallel byte-range download of a single chunk.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use strata_chunk::{ChunkError, ChunkFile, split_segments};
use strata_types::models::TransferInfo;
use tracing::{debug, warn};

use crate::error::{DownloadError, StorageError};
use crate::storage::StorageNodeApi;

pub struct SegmentedFetcher {
    storage: Arc<dyn StorageNodeApi>,
    concurrency: usize,
}

impl SegmentedFetcher {
    pub fn new(storage: Arc<dyn StorageNodeApi>, concurrency: usize) -> Self {
        Self { storage, concurrency: concurrency.max(1) }
    }

    /// Download `size` bytes of one chunk into `output` and verify it.
    ///
    /// Segments are spread round-robin over `sources`; a failed segment is
    /// retried once on the next source. Nothing is left at `output` unless
    /// both the checksum and the salted hash match.
    pub fn fetch_chunk(
        &self,
        sources: &[TransferInfo],
        expected_hash: &str,
        size: u64,
        output: &Path,
    ) -> Result<(), DownloadError> {
        let first = sources.first().ok_or(DownloadError::NoSources(0))?;
        let sequence_number = first.sequence_number;
        let salt = BASE64
            .decode(&first.chunk_hash_salt)
            .map_err(|_| DownloadError::Salt(sequence_number))?;

        let segments = split_segments(size, self.concurrency);
        debug!("Fetching chunk {} in {} segments", sequence_number, segments.len());

        let parts: Vec<Result<Vec<u8>, DownloadError>> = thread::scope(|scope| {
            let handles: Vec<_> = segments
                .iter()
                .enumerate()
                .map(|(i, &(start, end))| scope.spawn(move || self.fetch_segment(sources, i, start, end)))
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(DownloadError::Io(io::Error::other("segment thread panicked"))))
                })
                .collect()
        });

        let result = write_parts(output, parts).and_then(|()| verify(output, sequence_number, &salt, expected_hash));
        if result.is_err() {
            let _ = fs::remove_file(output);
        }
        result
    }

    fn fetch_segment(&self, sources: &[TransferInfo], index: usize, start: u64, end: u64) -> Result<Vec<u8>, DownloadError> {
        let primary = &sources[index % sources.len()];
        match self.retrieve(primary, start, end) {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                let fallback = &sources[(index + 1) % sources.len()];
                warn!(
                    "Segment {}..{} from {} failed ({}), retrying on {}",
                    start, end, primary.uri, e, fallback.uri
                );
                self.retrieve(fallback, start, end).map_err(|source| DownloadError::Segment {
                    sequence_number: primary.sequence_number,
                    start,
                    end,
                    source,
                })
            }
        }
    }

    fn retrieve(&self, source: &TransferInfo, start: u64, end: u64) -> Result<Vec<u8>, StorageError> {
        let bytes = self.storage.retrieve_chunk(source, start, end)?;
        if end > start && bytes.len() as u64 != end - start {
            return Err(StorageError::Transport(format!(
                "expected {} bytes, got {}",
                end - start,
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}

fn write_parts(output: &Path, parts: Vec<Result<Vec<u8>, DownloadError>>) -> Result<(), DownloadError> {
    let mut file = File::create(output)?;
    for part in parts {
        file.write_all(&part?)?;
    }
    file.sync_all()?;
    Ok(())
}

fn verify(path: &Path, sequence_number: u32, salt: &[u8], expected_hash: &str) -> Result<(), DownloadError> {
    let chunk_err = |e: ChunkError| match e {
        ChunkError::Io(e) => DownloadError::Io(e),
        ChunkError::SecureHash => DownloadError::Hash(sequence_number),
        _ => DownloadError::Checksum(sequence_number),
    };
    let chunk = ChunkFile::open(path).map_err(chunk_err)?;
    chunk.verify_checksum().map_err(chunk_err)?;
    chunk.verify_hash(salt, expected_hash).map_err(chunk_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Mutex;
    use strata_crypto::hash::salted_hash;

    /// Serves one chunk's bytes; sources listed in `broken` always fail.
    struct FakeNodes {
        bytes: Vec<u8>,
        broken: Vec<String>,
        requests: Mutex<Vec<(String, u64, u64)>>,
    }

    impl StorageNodeApi for FakeNodes {
        fn store_chunk(&self, _info: &TransferInfo, _path: &Path) -> Result<(), StorageError> {
            unreachable!()
        }

        fn retrieve_chunk(&self, info: &TransferInfo, start: u64, end: u64) -> Result<Vec<u8>, StorageError> {
            self.requests.lock().unwrap().push((info.uri.clone(), start, end));
            if self.broken.contains(&info.uri) {
                return Err(StorageError::Transport("down".into()));
            }
            let end = if end == 0 { self.bytes.len() as u64 } else { end };
            Ok(self.bytes[start as usize..end as usize].to_vec())
        }
    }

    fn source(uri: &str) -> TransferInfo {
        TransferInfo {
            transfer_name: "T-1".into(),
            chunk_name: "C-ABCDEFGHIJ234".into(),
            chunk_hash_salt: BASE64.encode(b"salt"),
            sequence_number: 3,
            uri: uri.into(),
            signature: "c2ln".into(),
            signature_ts: Utc::now(),
            expire_time: Utc::now() + Duration::minutes(10),
            byte_start: 0,
            byte_end: 0,
        }
    }

    fn chunk_bytes(len: usize) -> Vec<u8> {
        let payload: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c");
        ChunkFile::write_with_checksum(&path, &payload).unwrap();
        fs::read(&path).unwrap()
    }

    #[test]
    fn segments_are_reassembled_and_verified() {
        let bytes = chunk_bytes(600 * 1024);
        let hash = salted_hash(b"salt", &bytes);
        let nodes = Arc::new(FakeNodes { bytes: bytes.clone(), broken: vec![], requests: Mutex::new(vec![]) });
        let fetcher = SegmentedFetcher::new(nodes.clone(), 4);
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("chunk_000000003");

        fetcher
            .fetch_chunk(&[source("https://a"), source("https://b")], &hash, bytes.len() as u64, &out)
            .unwrap();
        assert_eq!(fs::read(&out).unwrap(), bytes);
        let requests = nodes.requests.lock().unwrap();
        assert_eq!(requests.len(), 4);
        assert!(requests.iter().any(|r| r.0 == "https://b"));
    }

    #[test]
    fn failed_segment_retries_on_another_source() {
        let bytes = chunk_bytes(300 * 1024);
        let hash = salted_hash(b"salt", &bytes);
        let nodes = Arc::new(FakeNodes {
            bytes: bytes.clone(),
            broken: vec!["https://a".into()],
            requests: Mutex::new(vec![]),
        });
        let fetcher = SegmentedFetcher::new(nodes, 2);
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("chunk");

        fetcher
            .fetch_chunk(&[source("https://a"), source("https://b")], &hash, bytes.len() as u64, &out)
            .unwrap();
        assert_eq!(fs::read(&out).unwrap(), bytes);
    }

    #[test]
    fn hash_mismatch_is_a_download_error() {
        let bytes = chunk_bytes(1000);
        let nodes = Arc::new(FakeNodes { bytes: bytes.clone(), broken: vec![], requests: Mutex::new(vec![]) });
        let fetcher = SegmentedFetcher::new(nodes, 2);
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("chunk");

        let err = fetcher
            .fetch_chunk(&[source("https://a")], "not-the-hash", bytes.len() as u64, &out)
            .unwrap_err();
        assert!(matches!(err, DownloadError::Hash(3)));
        assert!(!out.exists());
    }

    #[test]
    fn corrupt_bytes_fail_the_checksum() {
        let mut bytes = chunk_bytes(1000);
        bytes[10] ^= 0xff;
        let hash = salted_hash(b"salt", &bytes);
        let nodes = Arc::new(FakeNodes { bytes: bytes.clone(), broken: vec![], requests: Mutex::new(vec![]) });
        let fetcher = SegmentedFetcher::new(nodes, 1);
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("chunk");

        let err = fetcher
            .fetch_chunk(&[source("https://a")], &hash, bytes.len() as u64, &out)
            .unwrap_err();
        assert!(matches!(err, DownloadError::Checksum(3)));
    }

    #[test]
    fn no_sources_is_an_error() {
        let nodes = Arc::new(FakeNodes { bytes: vec![], broken: vec![], requests: Mutex::new(vec![]) });
        let fetcher = SegmentedFetcher::new(nodes, 1);
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            fetcher.fetch_chunk(&[], "h", 10, &dir.path().join("c")),
            Err(DownloadError::NoSources(_))
        ));
    }
}
