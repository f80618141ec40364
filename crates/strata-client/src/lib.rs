//! Strata client library.
//!
//! Prepares files as directories of checksummed chunks, uploads them through
//! the control node's allocations with a resumable threaded uploader, and
//! fetches chunks back in parallel byte ranges.

pub mod chunker;
pub mod config;
pub mod control;
pub mod error;
pub mod fetch;
pub mod prepare;
pub mod storage;
pub mod uploader;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use strata_chunk::log::{DownloadChunkInfo, DownloadSource};
use strata_chunk::{DownloadLog, MIN_CHUNK_SIZE, UploadLog};
use strata_types::api::CreateFileRequest;
use strata_types::models::{FLAG_COMPRESSED, FLAG_ENCRYPTED, TransferInfo};
use tracing::info;

use crate::chunker::{ClientChunk, chunk_file_name};
use crate::config::ClientConfig;
use crate::control::{ControlNodeApi, HttpControlNodeApi};
use crate::error::{ControlError, DownloadError, PrepareError, UploadError};
use crate::fetch::SegmentedFetcher;
use crate::prepare::{FileChunkInfo, PrepareOptions, write_json_synced};
use crate::storage::{HttpStorageNodeApi, StorageNodeApi};
use crate::uploader::{ThreadedUploader, UploadConfig, UploadReport};

pub const UPLOAD_OPTIONS_NAME: &str = "upload_options.json";
pub const DEFAULT_VOLUME: &str = "default";
pub const MAX_FILE_NAME_LEN: usize = 1024;

/// What an upload was started with, so it can be resumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadOptions {
    pub volume_name: String,
    pub thread_count: usize,
    pub file_name: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl UploadOptions {
    pub fn load(chunk_dir: &Path) -> Result<Self, UploadError> {
        let bytes = fs::read(chunk_dir.join(UPLOAD_OPTIONS_NAME))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

pub struct Client {
    control: Arc<dyn ControlNodeApi>,
    storage: Arc<dyn StorageNodeApi>,
    working_dir: PathBuf,
    encrypt_key: Option<[u8; 32]>,
    upload_threads: usize,
    download_threads: usize,
    upload_config: UploadConfig,
}

impl Client {
    pub fn new(config: &ClientConfig) -> Self {
        let mut client = Self::with_apis(
            Arc::new(HttpControlNodeApi::new(config.control_url.clone())),
            Arc::new(HttpStorageNodeApi::new()),
            config.working_dir.clone(),
        );
        client.encrypt_key = config.encrypt_key;
        client.upload_threads = config.upload_threads;
        client.download_threads = config.download_threads;
        client
    }

    pub fn with_apis(
        control: Arc<dyn ControlNodeApi>,
        storage: Arc<dyn StorageNodeApi>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            control,
            storage,
            working_dir: working_dir.into(),
            encrypt_key: None,
            upload_threads: config::DEFAULT_UPLOAD_THREADS,
            download_threads: config::DEFAULT_DOWNLOAD_THREADS,
            upload_config: UploadConfig::default(),
        }
    }

    pub fn with_encrypt_key(mut self, key: [u8; 32]) -> Self {
        self.encrypt_key = Some(key);
        self
    }

    /// Retry and mirroring knobs for uploads. The thread count is taken from
    /// each upload call instead.
    pub fn with_upload_config(mut self, config: UploadConfig) -> Self {
        self.upload_config = config;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    // ── Upload ──

    pub fn prepare_file(&self, path: &Path, encrypt: bool, compress: bool) -> Result<PathBuf, PrepareError> {
        self.prepare_with(path, &PrepareOptions {
            encrypt,
            compress,
            encrypt_key: self.encrypt_key.as_ref(),
            ..Default::default()
        })
    }

    pub fn prepare_with(&self, path: &Path, opts: &PrepareOptions<'_>) -> Result<PathBuf, PrepareError> {
        fs::create_dir_all(&self.working_dir)?;
        prepare::prepare_file(&self.working_dir, path, opts)
    }

    /// Prepare and upload in one step.
    pub fn upload_file(
        &self,
        path: &Path,
        volume_name: Option<&str>,
        encrypt: bool,
        compress: bool,
    ) -> Result<UploadReport, UploadError> {
        let chunk_dir = self.prepare_file(path, encrypt, compress)?;
        self.upload_file_chunks(&chunk_dir, volume_name, None, None, serde_json::Map::new())
    }

    /// Register the file with the control node and upload every chunk in
    /// `chunk_dir`. The directory is removed once the upload completes.
    pub fn upload_file_chunks(
        &self,
        chunk_dir: &Path,
        volume_name: Option<&str>,
        thread_count: Option<usize>,
        file_name: Option<&str>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<UploadReport, UploadError> {
        let info = match FileChunkInfo::load(chunk_dir) {
            Ok(info) if info.chunking_complete => info,
            _ => return Err(UploadError::ChunkingIncomplete),
        };
        let file_name = match file_name {
            Some(name) => name.to_string(),
            None => info.file_path.to_string_lossy().into_owned(),
        };
        if file_name.is_empty() || file_name.len() > MAX_FILE_NAME_LEN {
            return Err(UploadError::InvalidFileName { max: MAX_FILE_NAME_LEN });
        }

        let chunks = chunker::read_chunk_dir(chunk_dir)?;
        let size = chunks.iter().map(|c| c.size).sum::<u64>().max(MIN_CHUNK_SIZE);
        let mut flags = 0;
        if info.encrypted {
            flags |= FLAG_ENCRYPTED;
        }
        if info.compressed {
            flags |= FLAG_COMPRESSED;
        }

        let options = UploadOptions {
            volume_name: volume_name.unwrap_or(DEFAULT_VOLUME).to_string(),
            thread_count: thread_count.unwrap_or(self.upload_threads),
            file_name,
            metadata,
        };
        let ack = self.control.create_file(&CreateFileRequest {
            volume_name: options.volume_name.clone(),
            file_name: options.file_name.clone(),
            size,
            flags,
            metadata: options.metadata.clone(),
        })?;
        if ack.status != "OK" {
            return Err(ControlError::Rejected { status: 200, body: ack.status }.into());
        }
        write_json_synced(&chunk_dir.join(UPLOAD_OPTIONS_NAME), &options)?;
        info!("Created {}/{} ({} bytes)", options.volume_name, options.file_name, size);

        self.run_upload(chunk_dir, &options, chunks, Vec::new())
    }

    /// Continue an upload interrupted after `upload_file_chunks` registered
    /// the file. Completed chunks are skipped; chunks that were assigned but
    /// never completed ask the control node for their previous node.
    pub fn resume_upload(&self, chunk_dir: &Path) -> Result<UploadReport, UploadError> {
        let options = UploadOptions::load(chunk_dir)?;
        let state = UploadLog::replay(chunk_dir)?;
        let incomplete = state.incomplete();

        let mut completed = Vec::new();
        let mut chunks = chunker::read_chunk_dir(chunk_dir)?;
        for chunk in &mut chunks {
            let name = chunk.file_name();
            if state.is_completed(&name) {
                completed.push(chunk.sequence_number);
            } else if incomplete.contains(&name) {
                chunk.reuse_transfer = true;
            }
        }
        info!(
            "Resuming {}/{}: {} completed, {} interrupted",
            options.volume_name,
            options.file_name,
            completed.len(),
            incomplete.len()
        );
        self.run_upload(chunk_dir, &options, chunks, completed)
    }

    fn run_upload(
        &self,
        chunk_dir: &Path,
        options: &UploadOptions,
        chunks: Vec<ClientChunk>,
        completed: Vec<u32>,
    ) -> Result<UploadReport, UploadError> {
        let config = UploadConfig {
            thread_count: options.thread_count,
            ..self.upload_config.clone()
        };
        let report = ThreadedUploader::new(
            self.control.clone(),
            self.storage.clone(),
            options.volume_name.clone(),
            options.file_name.clone(),
            chunks,
            chunk_dir.to_path_buf(),
            config,
        )?
        .skip_completed(completed)
        .start()
        .join()?;

        fs::remove_dir_all(chunk_dir)?;
        info!("Uploaded {}/{}: {:?}", options.volume_name, options.file_name, report.mirror);
        Ok(report)
    }

    // ── Download ──

    /// Fetch one chunk into `download_dir` and record it in its download log.
    /// A chunk already logged as completed is not fetched again.
    pub fn fetch_chunk(
        &self,
        download_dir: &Path,
        sources: &[TransferInfo],
        chunk_hash: &str,
        chunk_size: u64,
    ) -> Result<PathBuf, DownloadError> {
        let first = sources.first().ok_or(DownloadError::NoSources(0))?;
        let sequence_number = first.sequence_number;
        let output = download_dir.join(chunk_file_name(sequence_number));

        fs::create_dir_all(download_dir)?;
        let state = DownloadLog::read(download_dir, Utc::now())?;
        if state.completed.contains(&sequence_number) && output.exists() {
            return Ok(output);
        }

        let mut log = DownloadLog::open(download_dir)?;
        let chunk = DownloadChunkInfo {
            sequence_number,
            chunk_name: first.chunk_name.clone(),
            chunk_hash: chunk_hash.to_string(),
            chunk_size,
            sources: Vec::new(),
        };
        for info in sources {
            log.append_download_info(&chunk, &DownloadSource {
                uri: info.uri.clone(),
                expire_time: info.expire_time,
                signature: info.signature.clone(),
                signature_ts: info.signature_ts,
            })?;
        }
        log.fsync()?;

        SegmentedFetcher::new(self.storage.clone(), self.download_threads)
            .fetch_chunk(sources, chunk_hash, chunk_size, &output)?;

        log.append_complete(sequence_number)?;
        log.fsync()?;
        Ok(output)
    }

    /// Join the chunks in `download_dir` into `output`.
    pub fn assemble_download(
        &self,
        download_dir: &Path,
        output: &Path,
        compressed: bool,
        encrypted: bool,
    ) -> Result<(), PrepareError> {
        let chunks = chunker::read_chunk_dir(download_dir)?;
        chunker::combine_chunks(&chunks, output, compressed, encrypted, self.encrypt_key.as_ref())
    }
}
