use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Serialize, de::DeserializeOwned};
use strata_types::api::{
    Ack, CertificatesResponse, ConfirmTransfer, RegisterStorageNode, Registration, ReplaceChunks,
    SendRecoveryData,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control node unreachable: {0}")]
    Transport(String),
    #[error("control node rejected our credentials")]
    Authentication,
    #[error("control node returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// The control-node RPCs a storage node makes.
#[async_trait]
pub trait ControlNode: Send + Sync {
    async fn confirm_transfer(&self, req: ConfirmTransfer) -> Result<Ack, ControlError>;
    async fn register_storage_node(&self, req: RegisterStorageNode) -> Result<Registration, ControlError>;
    async fn unregister_storage_node(&self) -> Result<Ack, ControlError>;
    async fn replace_chunks(&self, chunk_names: Vec<String>) -> Result<Ack, ControlError>;
    async fn get_certificates(&self) -> Result<CertificatesResponse, ControlError>;
    async fn send_recovery_data(&self, req: SendRecoveryData) -> Result<Ack, ControlError>;
}

/// JSON-over-HTTP control node client: every call is `POST {base}/rpc/{method}`.
pub struct HttpControlNode {
    base_url: String,
    client: reqwest::Client,
}

impl HttpControlNode {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn call<Req, Resp>(&self, method: &str, body: &Req) -> Result<Resp, ControlError>
    where
        Req: Serialize + ?Sized + Sync,
        Resp: DeserializeOwned,
    {
        let resp = self
            .client
            .post(format!("{}/rpc/{}", self.base_url, method))
            .json(body)
            .send()
            .await
            .map_err(|e| ControlError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ControlError::Authentication);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ControlError::Rejected { status: status.as_u16(), body });
        }
        resp.json().await.map_err(|e| ControlError::Transport(e.to_string()))
    }
}

#[async_trait]
impl ControlNode for HttpControlNode {
    async fn confirm_transfer(&self, req: ConfirmTransfer) -> Result<Ack, ControlError> {
        self.call("confirmTransfer", &req).await
    }

    async fn register_storage_node(&self, req: RegisterStorageNode) -> Result<Registration, ControlError> {
        self.call("registerStorageNode", &req).await
    }

    async fn unregister_storage_node(&self) -> Result<Ack, ControlError> {
        self.call("unregisterStorageNode", &serde_json::json!({})).await
    }

    async fn replace_chunks(&self, chunk_names: Vec<String>) -> Result<Ack, ControlError> {
        self.call("replaceChunks", &ReplaceChunks { chunk_names }).await
    }

    async fn get_certificates(&self) -> Result<CertificatesResponse, ControlError> {
        self.call("getCertificates", &serde_json::json!({})).await
    }

    async fn send_recovery_data(&self, req: SendRecoveryData) -> Result<Ack, ControlError> {
        self.call("sendRecoveryData", &req).await
    }
}
