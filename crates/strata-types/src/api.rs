use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CertificateArchive, MirrorStatus, NodeStatus, TransferInfo};

/// Protocol version reported by storage nodes when they register.
pub const PROTOCOL_VERSION: &str = "1.0";

// -- Generic replies --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub status: String,
}

impl Ack {
    pub fn ok() -> Self {
        Self { status: "OK".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

// -- Client -> control node --

/// Size, salted hash and flags of one chunk offered for storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub size: u64,
    pub chunk_hash: String,
    pub flags: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFileRequest {
    pub volume_name: String,
    pub file_name: String,
    pub size: u64,
    pub flags: u32,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFileStorage {
    pub volume_name: String,
    pub file_name: String,
    pub chunks: Vec<ChunkDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStorageResponse {
    pub transfer_info: Vec<TransferInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFailedTransfer {
    pub transfer_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestChunkStorage {
    pub volume_name: String,
    pub file_name: String,
    pub sequence_number: u32,
    /// Ask for the same storage node as the previous allocation.
    #[serde(default)]
    pub reuse_transfer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferInfoResponse {
    pub transfer_info: TransferInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckMirrorStatus {
    pub volume_name: String,
    pub file_name: String,
}

pub type MirrorStatusResponse = MirrorStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUnmirroredChunks {
    pub volume_name: String,
    pub file_name: String,
    pub min_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmirroredChunks {
    pub sequence_numbers: Vec<u32>,
}

// -- Storage node -> control node --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmTransfer {
    pub transfer_name: String,
    pub chunk_name: String,
    pub chunk_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterStorageNode {
    pub port: u16,
    pub protocol_version: String,
    pub software: String,
    pub storage_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub status: NodeStatus,
    /// Control node's clock at the time of the reply.
    #[serde(default)]
    pub control_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceChunks {
    pub chunk_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRecoveryData {
    /// Base64 of the zstd-compressed `name,hash` listing.
    pub data: String,
}

pub type CertificatesResponse = CertificateArchive;

// -- Control node -> storage node --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckHashRequest {
    pub salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckHashResponse {
    pub chunk_hash: String,
}

/// Instruction to replicate a locally stored chunk to another node. The
/// signature fields are forwarded unchanged as relay headers on the PUT.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendChunkRequest {
    pub chunk_hash_salt: String,
    pub dest_uri: String,
    pub transfer_name: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
    pub signature: String,
    pub signature_ts: DateTime<Utc>,
    pub expire_time: DateTime<Utc>,
}

pub const DEFAULT_SEND_PRIORITY: u32 = 2;

fn default_priority() -> u32 {
    DEFAULT_SEND_PRIORITY
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResponse {
    pub software: String,
    pub protocol_version: String,
    pub serial_number: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrieveQuery {
    #[serde(default)]
    pub byte_start: u64,
    #[serde(default)]
    pub byte_end: u64,
}
