use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::SecondsFormat;
use strata_types::api::SendChunkRequest;
use strata_types::headers;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::NodeContext;

pub const DEFAULT_SLEEP_PERIOD: Duration = Duration::from_secs(1);
pub const DEFAULT_CONCURRENT_MAX: usize = 3;

/// One replication of a local chunk to another storage node.
#[derive(Debug, Clone)]
pub struct SendingJob {
    pub chunk_name: String,
    pub chunk_path: PathBuf,
    pub request: SendChunkRequest,
}

/// Pushes chunks to peer storage nodes.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn put_chunk(&self, job: &SendingJob) -> Result<()>;
}

/// PUTs the chunk to `{dest_uri}/chunks/{name}`, forwarding the relay
/// signature so the peer can authorize the store.
pub struct HttpPeerClient {
    client: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for HttpPeerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn put_chunk(&self, job: &SendingJob) -> Result<()> {
        let file = tokio::fs::File::open(&job.chunk_path).await?;
        let size = file.metadata().await?.len();
        let req = &job.request;
        let url = format!("{}/chunks/{}", req.dest_uri.trim_end_matches('/'), job.chunk_name);

        let resp = self
            .client
            .put(url)
            .header(headers::SIGNATURE, &req.signature)
            .header(headers::SIGNATURE_TS, req.signature_ts.to_rfc3339_opts(SecondsFormat::Micros, true))
            .header(headers::EXPIRE_TIME, req.expire_time.to_rfc3339_opts(SecondsFormat::Micros, true))
            .header(headers::TRANSFER_NAME, &req.transfer_name)
            .header(headers::HASH_SALT, &req.chunk_hash_salt)
            .header("Content-Type", "application/octet-stream")
            .header("Content-Length", size.to_string())
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("peer returned {}: {}", status, body);
        }
        Ok(())
    }
}

struct QueuedJob {
    priority: u32,
    seq: u64,
    job: SendingJob,
}

impl QueuedJob {
    fn key(&self) -> (u32, u64) {
        (self.priority, self.seq)
    }
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key().cmp(&other.key())
    }
}

/// Pending jobs ordered by `(priority, enqueue order)`, lowest first.
#[derive(Default)]
pub struct JobQueue {
    heap: Mutex<BinaryHeap<Reverse<QueuedJob>>>,
    next_seq: AtomicU64,
}

impl JobQueue {
    pub fn push(&self, job: SendingJob) {
        let queued = QueuedJob {
            priority: job.request.priority,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            job,
        };
        self.heap.lock().unwrap_or_else(PoisonError::into_inner).push(Reverse(queued));
    }

    pub fn pop(&self) -> Option<SendingJob> {
        self.heap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .map(|Reverse(q)| q.job)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Background replication: a single tick loop that keeps up to
/// `concurrent_max` sending jobs in flight.
pub struct SendingQueue {
    queue: Arc<JobQueue>,
    peer: Arc<dyn PeerClient>,
    ctx: Arc<NodeContext>,
    concurrent_max: usize,
    sleep_period: Duration,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SendingQueue {
    pub fn new(peer: Arc<dyn PeerClient>, ctx: Arc<NodeContext>, concurrent_max: usize, sleep_period: Duration) -> Self {
        Self {
            queue: Arc::new(JobQueue::default()),
            peer,
            ctx,
            concurrent_max: concurrent_max.max(1),
            sleep_period,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn enqueue(&self, job: SendingJob) {
        debug!(
            "Queued send of {} to {} (priority {})",
            job.chunk_name, job.request.dest_uri, job.request.priority
        );
        self.queue.push(job);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn start(&self) {
        let task = run_sending_loop(
            self.queue.clone(),
            self.peer.clone(),
            self.ctx.clone(),
            self.concurrent_max,
            self.sleep_period,
            self.cancel.clone(),
        );
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(tokio::spawn(task));
    }

    /// Stop dispatching and wait for in-flight jobs to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Sending queue task ended abnormally: {}", e);
            }
        }
    }
}

async fn run_sending_loop(
    queue: Arc<JobQueue>,
    peer: Arc<dyn PeerClient>,
    ctx: Arc<NodeContext>,
    concurrent_max: usize,
    sleep_period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(sleep_period);
    let mut running: Vec<JoinHandle<()>> = Vec::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        running.retain(|h| !h.is_finished());

        while running.len() < concurrent_max {
            let Some(job) = queue.pop() else { break };
            if job.request.expire_time < ctx.control_now() {
                warn!("Dropping expired send of {} to {}", job.chunk_name, job.request.dest_uri);
                continue;
            }
            let peer = peer.clone();
            running.push(tokio::spawn(async move {
                match peer.put_chunk(&job).await {
                    Ok(()) => info!("Sent chunk {} to {}", job.chunk_name, job.request.dest_uri),
                    Err(e) => warn!("Sending chunk {} to {} failed: {}", job.chunk_name, job.request.dest_uri, e),
                }
            }));
        }
    }

    for handle in running {
        let _ = handle.await;
    }
    info!("Sending queue stopped");
}
