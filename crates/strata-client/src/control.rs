use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Serialize, de::DeserializeOwned};
use strata_types::api::{
    Ack, CheckMirrorStatus, CreateFileRequest, FileStorageResponse, GetUnmirroredChunks, MirrorStatusResponse,
    ReportFailedTransfer, RequestChunkStorage, RequestFileStorage, TransferInfoResponse, UnmirroredChunks,
};

use crate::error::ControlError;

/// The control-node RPCs a client makes. Blocking: the uploader drives it
/// from plain threads.
pub trait ControlNodeApi: Send + Sync {
    fn create_file(&self, req: &CreateFileRequest) -> Result<Ack, ControlError>;
    fn request_file_storage(&self, req: &RequestFileStorage) -> Result<FileStorageResponse, ControlError>;
    fn report_failed_transfer(&self, req: &ReportFailedTransfer) -> Result<TransferInfoResponse, ControlError>;
    fn request_chunk_storage(&self, req: &RequestChunkStorage) -> Result<TransferInfoResponse, ControlError>;
    fn check_mirror_status(&self, req: &CheckMirrorStatus) -> Result<MirrorStatusResponse, ControlError>;
    fn get_unmirrored_chunks(&self, req: &GetUnmirroredChunks) -> Result<UnmirroredChunks, ControlError>;
}

/// JSON-over-HTTP control node client: every call is `POST {base}/rpc/{method}`.
pub struct HttpControlNodeApi {
    base_url: String,
    client: Client,
}

impl HttpControlNodeApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn call<Req, Resp>(&self, method: &str, body: &Req) -> Result<Resp, ControlError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let resp = self
            .client
            .post(format!("{}/rpc/{}", self.base_url, method))
            .json(body)
            .send()
            .map_err(|e| ControlError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ControlError::Authentication);
        }
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(ControlError::Rejected { status: status.as_u16(), body });
        }
        resp.json().map_err(|e| ControlError::Transport(e.to_string()))
    }
}

impl ControlNodeApi for HttpControlNodeApi {
    fn create_file(&self, req: &CreateFileRequest) -> Result<Ack, ControlError> {
        self.call("createFile", req)
    }

    fn request_file_storage(&self, req: &RequestFileStorage) -> Result<FileStorageResponse, ControlError> {
        self.call("requestFileStorage", req)
    }

    fn report_failed_transfer(&self, req: &ReportFailedTransfer) -> Result<TransferInfoResponse, ControlError> {
        self.call("reportFailedTransfer", req)
    }

    fn request_chunk_storage(&self, req: &RequestChunkStorage) -> Result<TransferInfoResponse, ControlError> {
        self.call("requestChunkStorage", req)
    }

    fn check_mirror_status(&self, req: &CheckMirrorStatus) -> Result<MirrorStatusResponse, ControlError> {
        self.call("checkMirrorStatus", req)
    }

    fn get_unmirrored_chunks(&self, req: &GetUnmirroredChunks) -> Result<UnmirroredChunks, ControlError> {
        self.call("getUnmirroredChunks", req)
    }
}
