//! Concurrent, resumable upload of a prepared chunk directory.
//!
//! ```text
//! [control node] --allocations--> [dispatcher] --jobs--> [worker x N] --PUT--> [storage nodes]
//!                                      ^                      |
//!                                      +------- results ------+
//! ```
//!
//! The dispatcher owns three queues: failed transfers (re-issued by the
//! control node), re-uploads (fresh allocation for a known chunk) and fresh
//! chunks (requested in batches). Every allocation is logged `assigned` and
//! fsync'ed before a worker sees it; every success is logged `completed`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, unbounded};
use rand::RngCore;
use strata_chunk::UploadLog;
use strata_types::api::{
    CheckMirrorStatus, ChunkDescriptor, GetUnmirroredChunks, ReportFailedTransfer, RequestChunkStorage,
    RequestFileStorage,
};
use strata_types::models::TransferInfo;
use tracing::{debug, error, info, warn};

use crate::chunker::ClientChunk;
use crate::control::ControlNodeApi;
use crate::error::{ControlError, PrepareError, StorageError, UploadError};
use crate::storage::StorageNodeApi;

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub thread_count: usize,
    /// Fresh chunks requested per `request_file_storage` call.
    pub batch_size: usize,
    /// Failed stores allowed per chunk before the run aborts.
    pub max_attempts: u32,
    /// Pause after the control node could not be reached for an allocation.
    pub allocation_retry_wait: Duration,
    pub mirror_poll_interval: Duration,
    pub mirror_wait: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            thread_count: 3,
            batch_size: 10,
            max_attempts: 25,
            allocation_retry_wait: Duration::from_secs(5),
            mirror_poll_interval: Duration::from_secs(5),
            mirror_wait: Duration::from_secs(60),
        }
    }
}

/// Replication state of the file once every chunk is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorState {
    /// Every chunk has at least `min_count` mirrors.
    Mirrored { min_count: u32 },
    /// Every chunk is stored, but these had no mirror when we stopped waiting.
    StoredUnderReplicated { unmirrored: Vec<u32> },
    /// The control node could not be asked.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Chunks stored during this run.
    pub uploaded: usize,
    pub mirror: MirrorState,
}

struct Job {
    sequence_number: u32,
    path: PathBuf,
    info: TransferInfo,
}

struct JobResult {
    job: Job,
    outcome: Result<(), StorageError>,
}

#[derive(Default)]
struct Queues {
    failed: VecDeque<(u32, String)>,
    re_upload: VecDeque<u32>,
    fresh: VecDeque<u32>,
    reuse: HashSet<u32>,
    attempts: HashMap<u32, u32>,
}

impl Queues {
    fn has_work(&self) -> bool {
        !self.failed.is_empty() || !self.re_upload.is_empty() || !self.fresh.is_empty()
    }
}

pub struct ThreadedUploader {
    control: Arc<dyn ControlNodeApi>,
    storage: Arc<dyn StorageNodeApi>,
    volume_name: String,
    file_name: String,
    chunks: Vec<ClientChunk>,
    chunk_dir: PathBuf,
    completed: HashSet<u32>,
    config: UploadConfig,
}

pub struct UploadHandle {
    handle: JoinHandle<Result<UploadReport, UploadError>>,
}

impl UploadHandle {
    pub fn join(self) -> Result<UploadReport, UploadError> {
        self.handle.join().map_err(|_| UploadError::Panicked)?
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl ThreadedUploader {
    /// `chunks` must be numbered 1..=n with no gaps, in any order.
    pub fn new(
        control: Arc<dyn ControlNodeApi>,
        storage: Arc<dyn StorageNodeApi>,
        volume_name: impl Into<String>,
        file_name: impl Into<String>,
        mut chunks: Vec<ClientChunk>,
        chunk_dir: PathBuf,
        config: UploadConfig,
    ) -> Result<Self, UploadError> {
        chunks.sort_by_key(|c| c.sequence_number);
        for (position, chunk) in chunks.iter().enumerate() {
            if chunk.sequence_number as usize != position + 1 {
                return Err(UploadError::BadSequence { position, found: chunk.sequence_number });
            }
        }
        Ok(Self {
            control,
            storage,
            volume_name: volume_name.into(),
            file_name: file_name.into(),
            chunks,
            chunk_dir,
            completed: HashSet::new(),
            config,
        })
    }

    /// Chunks already stored by an earlier run. They are not uploaded again
    /// unless the control node reports them missing.
    pub fn skip_completed(mut self, sequence_numbers: impl IntoIterator<Item = u32>) -> Self {
        self.completed.extend(sequence_numbers);
        self
    }

    pub fn start(self) -> UploadHandle {
        UploadHandle { handle: thread::spawn(move || self.run()) }
    }

    /// Upload on the calling thread.
    pub fn run(self) -> Result<UploadReport, UploadError> {
        let (job_tx, job_rx) = unbounded::<Job>();
        let (result_tx, result_rx) = unbounded::<JobResult>();

        let workers: Vec<JoinHandle<()>> = (0..self.config.thread_count.max(1))
            .map(|_| {
                let storage = self.storage.clone();
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                thread::spawn(move || upload_worker(storage, jobs, results))
            })
            .collect();
        drop(job_rx);
        drop(result_tx);

        let outcome = self.dispatch(&job_tx, &result_rx);

        drop(job_tx);
        let mut panicked = false;
        for worker in workers {
            panicked |= worker.join().is_err();
        }
        if panicked && outcome.is_ok() {
            return Err(UploadError::Panicked);
        }
        outcome
    }

    fn chunk(&self, sequence_number: u32) -> Option<&ClientChunk> {
        let index = (sequence_number as usize).checked_sub(1)?;
        self.chunks.get(index)
    }

    fn dispatch(&self, jobs: &Sender<Job>, results: &Receiver<JobResult>) -> Result<UploadReport, UploadError> {
        let mut log = UploadLog::open(&self.chunk_dir)?;
        let mut queues = Queues::default();
        for chunk in &self.chunks {
            if self.completed.contains(&chunk.sequence_number) {
                continue;
            }
            if chunk.reuse_transfer {
                queues.re_upload.push_back(chunk.sequence_number);
                queues.reuse.insert(chunk.sequence_number);
            } else {
                queues.fresh.push_back(chunk.sequence_number);
            }
        }
        info!(
            "Uploading {}/{}: {} chunks ({} already stored)",
            self.volume_name,
            self.file_name,
            self.chunks.len(),
            self.completed.len()
        );

        let mut uploaded = 0;
        let mut in_flight = 0usize;
        let mut allocation_failures = 0u32;
        loop {
            while queues.has_work() || in_flight > 0 {
                if queues.has_work() && in_flight < self.config.thread_count.max(1) {
                    match self.request_storage(&mut queues) {
                        Ok(grants) => {
                            allocation_failures = 0;
                            in_flight += self.dispatch_grants(grants, &mut log, jobs)?;
                        }
                        Err(UploadError::Control(ControlError::Transport(e)))
                            if allocation_failures + 1 < self.config.max_attempts =>
                        {
                            allocation_failures += 1;
                            warn!("Storage allocation failed ({}), retrying: {}", allocation_failures, e);
                            if in_flight == 0 {
                                thread::sleep(self.config.allocation_retry_wait);
                            }
                        }
                        Err(e) => return Err(e),
                    }
                    if in_flight == 0 {
                        continue;
                    }
                }

                let Ok(JobResult { job, outcome }) = results.recv() else {
                    return Err(UploadError::Panicked);
                };
                in_flight -= 1;
                match outcome {
                    Ok(()) => {
                        let name = crate::chunker::chunk_file_name(job.sequence_number);
                        log.append_complete(&name)?;
                        log.fsync()?;
                        uploaded += 1;
                        debug!("Stored {} on {}", name, job.info.uri);
                    }
                    Err(e) => {
                        warn!("Chunk {} to {} failed: {}", job.sequence_number, job.info.uri, e);
                        self.count_attempt(&mut queues, job.sequence_number)?;
                        if job.info.is_expired(Utc::now()) {
                            queues.re_upload.push_back(job.sequence_number);
                        } else {
                            queues.failed.push_back((job.sequence_number, job.info.transfer_name));
                        }
                    }
                }
            }

            match self.check_mirrors(&mut queues)? {
                Some(mirror) => return Ok(UploadReport { uploaded, mirror }),
                None => info!("Control node reports missing chunks, uploading them again"),
            }
        }
    }

    fn count_attempt(&self, queues: &mut Queues, sequence_number: u32) -> Result<(), UploadError> {
        let attempts = queues.attempts.entry(sequence_number).or_insert(0);
        *attempts += 1;
        if *attempts >= self.config.max_attempts {
            error!("Chunk {} failed {} times", sequence_number, attempts);
            return Err(UploadError::RetriesExhausted { sequence_number, attempts: *attempts });
        }
        Ok(())
    }

    /// Verify, log and queue granted allocations. Returns how many were queued.
    fn dispatch_grants(
        &self,
        grants: Vec<(u32, TransferInfo)>,
        log: &mut UploadLog,
        jobs: &Sender<Job>,
    ) -> Result<usize, UploadError> {
        let mut staged = Vec::with_capacity(grants.len());
        for (sequence_number, info) in grants {
            if info.sequence_number != sequence_number {
                error!(
                    "Sequence mismatch: control node {}, local {}",
                    info.sequence_number, sequence_number
                );
                return Err(UploadError::SequenceMismatch { expected: sequence_number, got: info.sequence_number });
            }
            let Some(chunk) = self.chunk(sequence_number) else {
                return Err(UploadError::SequenceMismatch { expected: sequence_number, got: info.sequence_number });
            };
            log.append_assignment(&chunk.file_name())?;
            staged.push(Job { sequence_number, path: chunk.path.clone(), info });
        }
        log.fsync()?;

        let count = staged.len();
        for job in staged {
            debug!("Sending {} to {}", job.sequence_number, job.info.uri);
            jobs.send(job).map_err(|_| UploadError::Panicked)?;
        }
        Ok(count)
    }

    /// Ask for allocations: failed transfers first, then re-uploads, then a
    /// batch of fresh chunks. On error the chunks involved are put back.
    fn request_storage(&self, queues: &mut Queues) -> Result<Vec<(u32, TransferInfo)>, UploadError> {
        let mut grants = Vec::new();

        if !queues.failed.is_empty() {
            while let Some((sequence_number, transfer_name)) = queues.failed.pop_front() {
                debug!("Recovering from failed transfer {}", transfer_name);
                let req = ReportFailedTransfer { transfer_name: transfer_name.clone() };
                match self.control.report_failed_transfer(&req) {
                    Ok(resp) => grants.push((sequence_number, resp.transfer_info)),
                    Err(e) => {
                        queues.failed.push_front((sequence_number, transfer_name));
                        return partial(grants, e);
                    }
                }
            }
            return Ok(grants);
        }

        if !queues.re_upload.is_empty() {
            while let Some(sequence_number) = queues.re_upload.pop_front() {
                let reuse_transfer = queues.reuse.contains(&sequence_number);
                debug!("Re-uploading chunk {} (reuse transfer: {})", sequence_number, reuse_transfer);
                let req = RequestChunkStorage {
                    volume_name: self.volume_name.clone(),
                    file_name: self.file_name.clone(),
                    sequence_number,
                    reuse_transfer,
                };
                match self.control.request_chunk_storage(&req) {
                    Ok(resp) => {
                        // Only the first re-allocation may reuse the old node.
                        queues.reuse.remove(&sequence_number);
                        grants.push((sequence_number, resp.transfer_info));
                    }
                    Err(e) => {
                        queues.re_upload.push_front(sequence_number);
                        return partial(grants, e);
                    }
                }
            }
            return Ok(grants);
        }

        let take = queues.fresh.len().min(self.config.batch_size.max(1));
        let batch: Vec<u32> = queues.fresh.drain(..take).collect();
        let mut descriptors = Vec::with_capacity(batch.len());
        for (position, &sequence_number) in batch.iter().enumerate() {
            let chunk = self
                .chunk(sequence_number)
                .ok_or(UploadError::BadSequence { position, found: sequence_number })?;
            match describe_chunk(chunk) {
                Ok(d) => descriptors.push(d),
                Err(e) => {
                    requeue_front(&mut queues.fresh, &batch);
                    return Err(e.into());
                }
            }
        }
        let req = RequestFileStorage {
            volume_name: self.volume_name.clone(),
            file_name: self.file_name.clone(),
            chunks: descriptors,
        };
        let resp = match self.control.request_file_storage(&req) {
            Ok(resp) => resp,
            Err(e) => {
                requeue_front(&mut queues.fresh, &batch);
                return Err(e.into());
            }
        };
        if resp.transfer_info.len() != batch.len() {
            return Err(UploadError::AllocationMismatch {
                requested: batch.len(),
                got: resp.transfer_info.len(),
            });
        }
        info!("Got storage for {} chunks", batch.len());
        Ok(batch.into_iter().zip(resp.transfer_info).collect())
    }

    /// `None` when chunks were requeued and another upload round is needed.
    fn check_mirrors(&self, queues: &mut Queues) -> Result<Option<MirrorState>, UploadError> {
        let req = CheckMirrorStatus {
            volume_name: self.volume_name.clone(),
            file_name: self.file_name.clone(),
        };
        let deadline = Instant::now() + self.config.mirror_wait;
        let mut waited = false;

        loop {
            let status = match self.control.check_mirror_status(&req) {
                Ok(status) => status,
                Err(e) => {
                    warn!("Could not check mirror status: {}", e);
                    return Ok(Some(MirrorState::Unknown));
                }
            };
            if !status.missing_chunks.is_empty() {
                error!("Missing chunks detected: {:?}", status.missing_chunks);
                for sequence_number in status.missing_chunks {
                    if self.chunk(sequence_number).is_none() {
                        warn!("Ignoring unknown missing chunk {}", sequence_number);
                        continue;
                    }
                    self.count_attempt(queues, sequence_number)?;
                    queues.re_upload.push_back(sequence_number);
                }
                if queues.has_work() {
                    return Ok(None);
                }
            }
            if status.min_count >= 1 {
                return Ok(Some(MirrorState::Mirrored { min_count: status.min_count }));
            }
            if waited && Instant::now() >= deadline {
                break;
            }
            if !waited {
                info!("Waiting up to {:?} for data to be mirrored", self.config.mirror_wait);
                waited = true;
            }
            thread::sleep(self.config.mirror_poll_interval);
        }

        let req = GetUnmirroredChunks {
            volume_name: self.volume_name.clone(),
            file_name: self.file_name.clone(),
            min_count: 1,
        };
        let unmirrored = match self.control.get_unmirrored_chunks(&req) {
            Ok(resp) => resp.sequence_numbers,
            Err(e) => {
                warn!("Could not list unmirrored chunks: {}", e);
                Vec::new()
            }
        };
        info!(
            "Stopped waiting for mirroring; {} chunks are stored but not yet mirrored",
            unmirrored.len()
        );
        Ok(Some(MirrorState::StoredUnderReplicated { unmirrored }))
    }
}

/// Keep what was granted before a failure; surface the failure only if
/// nothing was.
fn partial(grants: Vec<(u32, TransferInfo)>, e: ControlError) -> Result<Vec<(u32, TransferInfo)>, UploadError> {
    if grants.is_empty() {
        return Err(e.into());
    }
    warn!("Allocation interrupted after {} grants: {}", grants.len(), e);
    Ok(grants)
}

fn requeue_front(queue: &mut VecDeque<u32>, batch: &[u32]) {
    for &sequence_number in batch.iter().rev() {
        queue.push_front(sequence_number);
    }
}

/// Size plus a hash under a random 4-byte salt.
fn describe_chunk(chunk: &ClientChunk) -> Result<ChunkDescriptor, PrepareError> {
    let mut salt = [0u8; 4];
    rand::rng().fill_bytes(&mut salt);
    Ok(ChunkDescriptor {
        size: chunk.size,
        chunk_hash: chunk.calc_hash(&salt)?,
        flags: 0,
    })
}

fn upload_worker(storage: Arc<dyn StorageNodeApi>, jobs: Receiver<Job>, results: Sender<JobResult>) {
    for job in jobs.iter() {
        let outcome = storage.store_chunk(&job.info, &job.path);
        if results.send(JobResult { job, outcome }).is_err() {
            break;
        }
    }
}
