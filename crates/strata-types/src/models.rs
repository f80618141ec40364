use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File flag: chunks were encrypted before upload.
pub const FLAG_ENCRYPTED: u32 = 1;
/// File flag: chunks were compressed before upload.
pub const FLAG_COMPRESSED: u32 = 2;

/// A signed, time-boxed capability issued by the control node for one chunk
/// operation between two named parties.
///
/// The sender and receiver serial numbers are not carried here. The receiving
/// node inserts them during verification from the caller's certificate and
/// its own certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInfo {
    pub transfer_name: String,
    pub chunk_name: String,
    /// Base64 salt for the secure chunk hash.
    pub chunk_hash_salt: String,
    /// 1-based position of the chunk in its file.
    pub sequence_number: u32,
    /// Storage node that should receive (or serve) the chunk.
    pub uri: String,
    pub signature: String,
    pub signature_ts: DateTime<Utc>,
    pub expire_time: DateTime<Utc>,
    #[serde(default)]
    pub byte_start: u64,
    #[serde(default)]
    pub byte_end: u64,
}

impl TransferInfo {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_time < now
    }
}

/// Registration status the control node assigns to a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Inactive,
    Unavailable,
    Available,
    Unreachable,
    RecoveryRequired,
    RecoveryInProgress,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Inactive => "inactive",
            Self::Unavailable => "unavailable",
            Self::Available => "available",
            Self::Unreachable => "unreachable",
            Self::RecoveryRequired => "recovery required",
            Self::RecoveryInProgress => "recovery in progress",
        };
        f.write_str(s)
    }
}

/// Replication state of a file, derived by the control node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorStatus {
    /// Minimum replica count across all chunks; 0 means stored but not mirrored.
    pub min_count: u32,
    /// Sequence numbers of chunks the control node has no copy of.
    #[serde(default)]
    pub missing_chunks: Vec<u32>,
}

/// A public certificate as shipped in the control node's archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub serial_number: u64,
    pub common_name: String,
    /// Base64 ed25519 public key.
    pub public_key: String,
}

/// Certificates every node caches: the software signer, the relay command
/// signer and the revocation list signed by the software signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateArchive {
    pub software_signer: CertificateRecord,
    pub relay_command_signer: CertificateRecord,
    #[serde(default)]
    pub revoked_serials: Vec<u64>,
    pub crl_signature: String,
}
