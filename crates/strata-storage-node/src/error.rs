use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use strata_chunk::ChunkError;
use strata_types::api::ErrorBody;
use thiserror::Error;
use tracing::warn;

use crate::control::ControlError;

/// Errors a storage-node operation reports to its caller.
///
/// `Authentication` deliberately carries nothing: the reason a relay command
/// was rejected is logged on the node and never returned.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("authentication failed")]
    Authentication,
    #[error("request expired")]
    RequestExpired,
    #[error("insufficient storage")]
    OutOfStorage,
    #[error("chunk not found: {0}")]
    ChunkNotFound(String),
    #[error("chunk checksum mismatch")]
    Checksum,
    #[error("chunk error: {0}")]
    Chunk(String),
    #[error("invalid chunk name")]
    InvalidChunkName,
    #[error("control node error: {0}")]
    Control(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::RequestExpired => StatusCode::GONE,
            Self::OutOfStorage => StatusCode::INSUFFICIENT_STORAGE,
            Self::ChunkNotFound(_) => StatusCode::NOT_FOUND,
            Self::Checksum => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Chunk(_) | Self::InvalidChunkName => StatusCode::BAD_REQUEST,
            Self::Control(_) => StatusCode::BAD_GATEWAY,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ChunkError> for NodeError {
    fn from(e: ChunkError) -> Self {
        match e {
            ChunkError::Io(io) => Self::Io(io),
            ChunkError::Checksum { .. } => Self::Checksum,
            other => Self::Chunk(other.to_string()),
        }
    }
}

impl From<ControlError> for NodeError {
    fn from(e: ControlError) -> Self {
        Self::Control(e.to_string())
    }
}

impl From<tokio::task::JoinError> for NodeError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Io(std::io::Error::other(e))
    }
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error = match &self {
            Self::Io(e) => {
                warn!("Internal I/O error: {}", e);
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}
