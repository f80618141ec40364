#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, SecondsFormat, Utc};
use ed25519_dalek::SigningKey;
use serde_json::Value;
use strata_crypto::certs::{CONTROL_NODE_CN, CertificateCache, sign_crl};
use strata_crypto::keys::{generate_signing_key, verifying_key_to_base64};
use strata_crypto::signing::{relay_values, sign_values};
use strata_storage_node::context::NodeContext;
use strata_storage_node::control::{ControlError, ControlNode};
use strata_storage_node::routes::AppState;
use strata_storage_node::sending_queue::{PeerClient, SendingJob, SendingQueue};
use strata_storage_node::storage::ChunkStore;
use strata_types::api::{
    Ack, CertificatesResponse, ConfirmTransfer, RegisterStorageNode, Registration, SendRecoveryData,
};
use strata_types::headers;
use strata_types::models::{CertificateArchive, CertificateRecord, NodeStatus};

pub const NODE_SERIAL: u64 = 900;
pub const CLIENT_SERIAL: u64 = 77;

/// Control node double that records every call.
pub struct MockControl {
    pub archive: CertificateArchive,
    pub relay_key: SigningKey,
    pub fail_confirm: bool,
    pub registration_status: NodeStatus,
    pub reject_registration: bool,
    pub confirms: Mutex<Vec<ConfirmTransfer>>,
    pub replaced: Mutex<Vec<Vec<String>>>,
    pub registrations: Mutex<Vec<RegisterStorageNode>>,
    pub unregistered: Mutex<usize>,
    pub recovery: Mutex<Vec<SendRecoveryData>>,
}

impl MockControl {
    pub fn new() -> Self {
        let software = generate_signing_key();
        let relay_key = generate_signing_key();
        let record = |serial, cn: &str, key: &SigningKey| CertificateRecord {
            serial_number: serial,
            common_name: cn.into(),
            public_key: verifying_key_to_base64(&key.verifying_key()),
        };
        let archive = CertificateArchive {
            software_signer: record(1, "Software Signer", &software),
            relay_command_signer: record(2, "Relay Command Signer", &relay_key),
            revoked_serials: vec![13],
            crl_signature: sign_crl(&software, &[13]),
        };
        Self {
            archive,
            relay_key,
            fail_confirm: false,
            registration_status: NodeStatus::Available,
            reject_registration: false,
            confirms: Mutex::new(Vec::new()),
            replaced: Mutex::new(Vec::new()),
            registrations: Mutex::new(Vec::new()),
            unregistered: Mutex::new(0),
            recovery: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ControlNode for MockControl {
    async fn confirm_transfer(&self, req: ConfirmTransfer) -> Result<Ack, ControlError> {
        self.confirms.lock().unwrap().push(req);
        if self.fail_confirm {
            return Err(ControlError::Rejected { status: 500, body: "no".into() });
        }
        Ok(Ack::ok())
    }

    async fn register_storage_node(&self, req: RegisterStorageNode) -> Result<Registration, ControlError> {
        self.registrations.lock().unwrap().push(req);
        if self.reject_registration {
            return Err(ControlError::Authentication);
        }
        Ok(Registration { status: self.registration_status, control_time: Some(Utc::now()) })
    }

    async fn unregister_storage_node(&self) -> Result<Ack, ControlError> {
        *self.unregistered.lock().unwrap() += 1;
        Ok(Ack::ok())
    }

    async fn replace_chunks(&self, chunk_names: Vec<String>) -> Result<Ack, ControlError> {
        self.replaced.lock().unwrap().push(chunk_names);
        Ok(Ack::ok())
    }

    async fn get_certificates(&self) -> Result<CertificatesResponse, ControlError> {
        Ok(self.archive.clone())
    }

    async fn send_recovery_data(&self, req: SendRecoveryData) -> Result<Ack, ControlError> {
        self.recovery.lock().unwrap().push(req);
        Ok(Ack::ok())
    }
}

pub struct NullPeer;

#[async_trait]
impl PeerClient for NullPeer {
    async fn put_chunk(&self, _job: &SendingJob) -> anyhow::Result<()> {
        Ok(())
    }
}

pub async fn app_state(control: Arc<MockControl>, dir: &std::path::Path) -> AppState {
    let ctx = Arc::new(NodeContext::new(NODE_SERIAL));
    ctx.set_certificates(CertificateCache::from_archive(&control.archive).unwrap());
    let store = Arc::new(ChunkStore::new(dir.to_path_buf()).await.unwrap());
    let sending = Arc::new(SendingQueue::new(Arc::new(NullPeer), ctx.clone(), 3, Duration::from_millis(50)));
    AppState { ctx, store, control, sending }
}

pub fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Relay headers for a command signed by the control node's relay key.
pub fn relay_headers(
    relay_key: &SigningKey,
    caller_serial: u64,
    expire_time: DateTime<Utc>,
    args: &[Value],
    exclude: &[usize],
) -> Vec<(&'static str, String)> {
    let signature_ts = Utc::now();
    let values = relay_values(&signature_ts, caller_serial, NODE_SERIAL, &expire_time, args, exclude);
    vec![
        (headers::SIGNATURE, sign_values(relay_key, &values)),
        (headers::SIGNATURE_TS, ts(&signature_ts)),
        (headers::EXPIRE_TIME, ts(&expire_time)),
        (headers::CLIENT_CERT_SERIAL, caller_serial.to_string()),
        (headers::CLIENT_CERT_CN, format!("client-{}", caller_serial)),
    ]
}

pub fn control_headers() -> Vec<(&'static str, String)> {
    vec![
        (headers::CLIENT_CERT_SERIAL, "3".to_string()),
        (headers::CLIENT_CERT_CN, CONTROL_NODE_CN.to_string()),
    ]
}

pub fn salt_b64(salt: &[u8]) -> String {
    BASE64.encode(salt)
}

/// Payload with a valid CRC32 trailer.
pub fn chunk_bytes(payload: &[u8]) -> Vec<u8> {
    let mut bytes = payload.to_vec();
    bytes.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    bytes
}
