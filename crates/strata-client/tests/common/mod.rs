#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use strata_chunk::ChunkFile;
use strata_client::control::ControlNodeApi;
use strata_client::error::{ControlError, StorageError};
use strata_client::prepare::PrepareOptions;
use strata_client::storage::StorageNodeApi;
use strata_client::uploader::UploadConfig;
use strata_types::api::{
    Ack, CheckMirrorStatus, CreateFileRequest, FileStorageResponse, GetUnmirroredChunks, MirrorStatusResponse,
    ReportFailedTransfer, RequestChunkStorage, RequestFileStorage, TransferInfoResponse, UnmirroredChunks,
};
use strata_types::models::{MirrorStatus, TransferInfo};

pub fn fast_config() -> UploadConfig {
    UploadConfig {
        thread_count: 3,
        batch_size: 10,
        max_attempts: 5,
        allocation_retry_wait: Duration::from_millis(1),
        mirror_poll_interval: Duration::from_millis(5),
        mirror_wait: Duration::from_millis(30),
    }
}

pub fn small_chunks() -> PrepareOptions<'static> {
    PrepareOptions { chunk_size: 16, ..Default::default() }
}

/// Control node double. Allocations are always valid unless a test flips
/// one of the knobs.
pub struct MockControl {
    /// Sequence numbers whose first allocation is already expired.
    pub expire_first: HashSet<u32>,
    /// Report every granted sequence number off by one.
    pub wrong_sequence: bool,
    /// Answers for successive `check_mirror_status` calls; the last repeats.
    pub mirror_answers: Mutex<VecDeque<MirrorStatus>>,
    pub unmirrored: Vec<u32>,

    pub created: Mutex<Vec<CreateFileRequest>>,
    pub file_requests: Mutex<Vec<RequestFileStorage>>,
    pub chunk_requests: Mutex<Vec<RequestChunkStorage>>,
    pub failed_reports: Mutex<Vec<String>>,
    transfers: Mutex<HashMap<String, u32>>,
    allocated: Mutex<HashSet<u32>>,
    next_fresh: Mutex<u32>,
}

impl MockControl {
    pub fn new() -> Self {
        Self {
            expire_first: HashSet::new(),
            wrong_sequence: false,
            mirror_answers: Mutex::new(VecDeque::from([MirrorStatus { min_count: 1, missing_chunks: vec![] }])),
            unmirrored: Vec::new(),
            created: Mutex::new(Vec::new()),
            file_requests: Mutex::new(Vec::new()),
            chunk_requests: Mutex::new(Vec::new()),
            failed_reports: Mutex::new(Vec::new()),
            transfers: Mutex::new(HashMap::new()),
            allocated: Mutex::new(HashSet::new()),
            next_fresh: Mutex::new(1),
        }
    }

    /// Fresh allocations continue from `sequence_number`, as they would for a
    /// file whose earlier chunks were allocated by a previous run.
    pub fn fresh_from(self, sequence_number: u32) -> Self {
        *self.next_fresh.lock().unwrap() = sequence_number;
        self
    }

    pub fn with_mirror_answers(self, answers: Vec<MirrorStatus>) -> Self {
        *self.mirror_answers.lock().unwrap() = answers.into();
        self
    }

    fn grant(&self, sequence_number: u32) -> TransferInfo {
        let first = self.allocated.lock().unwrap().insert(sequence_number);
        let expire_time = if first && self.expire_first.contains(&sequence_number) {
            Utc::now() - chrono::Duration::minutes(1)
        } else {
            Utc::now() + chrono::Duration::minutes(10)
        };
        let mut transfers = self.transfers.lock().unwrap();
        let transfer_name = format!("T-{}", transfers.len() + 1);
        transfers.insert(transfer_name.clone(), sequence_number);
        TransferInfo {
            transfer_name,
            chunk_name: format!("C-AAAAAAAAAA{:03}", sequence_number),
            chunk_hash_salt: BASE64.encode(b"salt"),
            sequence_number: if self.wrong_sequence { sequence_number + 1 } else { sequence_number },
            uri: format!("https://node-{}:8085", sequence_number % 3),
            signature: "c2ln".into(),
            signature_ts: Utc::now(),
            expire_time,
            byte_start: 0,
            byte_end: 0,
        }
    }

    /// Size of each `request_file_storage` batch, in request order.
    pub fn fresh_batches(&self) -> Vec<usize> {
        self.file_requests.lock().unwrap().iter().map(|r| r.chunks.len()).collect()
    }
}

impl ControlNodeApi for MockControl {
    fn create_file(&self, req: &CreateFileRequest) -> Result<Ack, ControlError> {
        self.created.lock().unwrap().push(req.clone());
        Ok(Ack::ok())
    }

    fn request_file_storage(&self, req: &RequestFileStorage) -> Result<FileStorageResponse, ControlError> {
        self.file_requests.lock().unwrap().push(req.clone());
        let first = {
            let mut next = self.next_fresh.lock().unwrap();
            let first = *next;
            *next += req.chunks.len() as u32;
            first
        };
        let transfer_info = (0..req.chunks.len() as u32).map(|i| self.grant(first + i)).collect();
        Ok(FileStorageResponse { transfer_info })
    }

    fn report_failed_transfer(&self, req: &ReportFailedTransfer) -> Result<TransferInfoResponse, ControlError> {
        self.failed_reports.lock().unwrap().push(req.transfer_name.clone());
        let seq = *self
            .transfers
            .lock()
            .unwrap()
            .get(&req.transfer_name)
            .ok_or(ControlError::Rejected { status: 404, body: "unknown transfer".into() })?;
        Ok(TransferInfoResponse { transfer_info: self.grant(seq) })
    }

    fn request_chunk_storage(&self, req: &RequestChunkStorage) -> Result<TransferInfoResponse, ControlError> {
        self.chunk_requests.lock().unwrap().push(req.clone());
        Ok(TransferInfoResponse { transfer_info: self.grant(req.sequence_number) })
    }

    fn check_mirror_status(&self, _req: &CheckMirrorStatus) -> Result<MirrorStatusResponse, ControlError> {
        let mut answers = self.mirror_answers.lock().unwrap();
        let answer = if answers.len() > 1 { answers.pop_front() } else { answers.front().cloned() };
        Ok(answer.unwrap_or(MirrorStatus { min_count: 1, missing_chunks: vec![] }))
    }

    fn get_unmirrored_chunks(&self, _req: &GetUnmirroredChunks) -> Result<UnmirroredChunks, ControlError> {
        Ok(UnmirroredChunks { sequence_numbers: self.unmirrored.clone() })
    }
}

/// Storage node double that checks each pushed chunk and records it.
pub struct MockStorage {
    /// Sequence numbers that fail this many more times before succeeding.
    pub failures: Mutex<HashMap<u32, u32>>,
    /// (sequence number, transfer name) of every successful store.
    pub stored: Mutex<Vec<(u32, String)>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self { failures: Mutex::new(HashMap::new()), stored: Mutex::new(Vec::new()) }
    }

    pub fn failing(self, sequence_number: u32, times: u32) -> Self {
        self.failures.lock().unwrap().insert(sequence_number, times);
        self
    }

    pub fn stored_sequences(&self) -> Vec<u32> {
        let mut seqs: Vec<u32> = self.stored.lock().unwrap().iter().map(|(s, _)| *s).collect();
        seqs.sort();
        seqs
    }
}

impl StorageNodeApi for MockStorage {
    fn store_chunk(&self, info: &TransferInfo, path: &Path) -> Result<(), StorageError> {
        if info.is_expired(Utc::now()) {
            return Err(StorageError::Rejected { status: 410, body: "request expired".into() });
        }
        if let Some(left) = self.failures.lock().unwrap().get_mut(&info.sequence_number) {
            if *left > 0 {
                *left -= 1;
                return Err(StorageError::Transport("connection reset".into()));
            }
        }
        ChunkFile::open(path)
            .and_then(|c| c.verify_checksum())
            .map_err(|e| StorageError::Rejected { status: 422, body: e.to_string() })?;
        self.stored.lock().unwrap().push((info.sequence_number, info.transfer_name.clone()));
        Ok(())
    }

    fn retrieve_chunk(&self, _info: &TransferInfo, _start: u64, _end: u64) -> Result<Vec<u8>, StorageError> {
        Err(StorageError::Transport("not served".into()))
    }
}
