use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, post, put},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{Value, json};
use strata_chunk::ChunkFile;
use strata_types::api::{
    Ack, CheckHashRequest, CheckHashResponse, ConfirmTransfer, HelloResponse, PROTOCOL_VERSION, RetrieveQuery,
    SendChunkRequest,
};
use strata_types::headers;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::SOFTWARE;
use crate::authz::{self, CallerIdentity, RelayCommand, header_str};
use crate::context::NodeContext;
use crate::control::ControlNode;
use crate::error::NodeError;
use crate::sending_queue::{SendingJob, SendingQueue};
use crate::storage::{CHUNK_SIZE_MAX, ChunkStore, MIN_FREE_MB, is_chunk_name, is_transfer_name};

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<NodeContext>,
    pub store: Arc<ChunkStore>,
    pub control: Arc<dyn ControlNode>,
    pub sending: Arc<SendingQueue>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/chunks/{chunk_name}",
            put(store_chunk).get(retrieve_chunk).delete(delete_chunk),
        )
        .route("/chunks/{chunk_name}/check-hash", post(check_hash))
        .route("/chunks/{chunk_name}/send", post(send_chunk))
        .route("/hello", get(hello))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn check_chunk_name(chunk_name: &str) -> Result<(), NodeError> {
    if is_chunk_name(chunk_name) {
        Ok(())
    } else {
        Err(NodeError::InvalidChunkName)
    }
}

// ── Handlers ────────────────────────────────────────────────────────────

/// PUT /chunks/{chunk_name}: store a chunk under a relayed store command.
///
/// The body is written to a temp file, its checksum verified and its salted
/// hash computed, then it is moved into place and confirmed with the control
/// node. A verified copy already stored under the same name is kept as is.
/// On failure only a chunk moved into place by this request is removed.
pub async fn store_chunk(
    State(state): State<AppState>,
    Path(chunk_name): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<Ack>, NodeError> {
    check_chunk_name(&chunk_name)?;
    let caller = CallerIdentity::from_headers(&headers);
    let relay = RelayCommand::from_headers(&headers)?;
    let transfer_name = header_str(&headers, headers::TRANSFER_NAME).unwrap_or_default().to_string();
    let hash_salt = header_str(&headers, headers::HASH_SALT).unwrap_or_default().to_string();

    authz::authorize(
        &state.ctx,
        &authz::STORE_CHUNK,
        caller.as_ref(),
        Some(&relay),
        &[json!(transfer_name), json!(chunk_name), json!(hash_salt), Value::Null],
    )?;

    if !is_transfer_name(&transfer_name) {
        return Err(NodeError::Chunk("invalid transfer name".into()));
    }
    let salt = BASE64
        .decode(&hash_salt)
        .map_err(|_| NodeError::Chunk("invalid hash salt".into()))?;
    if state.store.available_mb()? < MIN_FREE_MB {
        warn!("Refusing chunk {}: less than {} MB free", chunk_name, MIN_FREE_MB);
        return Err(NodeError::OutOfStorage);
    }

    let tmp_path = state.store.tmp_path(&transfer_name);

    let mut moved = false;
    let result = receive_chunk(&state, body, &tmp_path, &chunk_name, &transfer_name, salt, &mut moved).await;
    if result.is_err() && moved {
        remove_quietly(&state.store.chunk_path(&chunk_name)).await;
    }
    remove_quietly(&tmp_path).await;
    result
}

async fn receive_chunk(
    state: &AppState,
    body: Body,
    tmp_path: &FsPath,
    chunk_name: &str,
    transfer_name: &str,
    salt: Vec<u8>,
    moved: &mut bool,
) -> Result<Json<Ack>, NodeError> {
    let mut file = tokio::fs::File::create(tmp_path).await?;
    let mut stream = http_body_util::BodyStream::new(body);
    let mut received: u64 = 0;

    while let Some(frame_result) = stream.next().await {
        let frame = frame_result.map_err(|e| NodeError::Chunk(format!("body read failed: {}", e)))?;
        if let Ok(data) = frame.into_data() {
            received += data.len() as u64;
            if received > CHUNK_SIZE_MAX {
                return Err(NodeError::Chunk("chunk exceeds maximum size".into()));
            }
            file.write_all(&data).await?;
        }
    }
    file.sync_all().await?;
    drop(file);

    // Checksum, hash and rename are blocking file work.
    let (tmp, dest) = (tmp_path.to_path_buf(), state.store.chunk_path(chunk_name));
    let (chunk_hash, renamed) = tokio::task::spawn_blocking(move || -> Result<(String, bool), NodeError> {
        let chunk = ChunkFile::open(&tmp)?;
        chunk.verify_checksum()?;
        let hash = chunk.calc_hash(&salt)?;
        if ChunkFile::open(&dest).and_then(|stored| stored.verify_checksum()).is_ok() {
            return Ok((hash, false));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&tmp, &dest)?;
        Ok((hash, true))
    })
    .await??;
    *moved = renamed;

    state
        .control
        .confirm_transfer(ConfirmTransfer {
            transfer_name: transfer_name.to_string(),
            chunk_name: chunk_name.to_string(),
            chunk_hash,
        })
        .await?;

    info!("Stored chunk {} ({} bytes) for transfer {}", chunk_name, received, transfer_name);
    Ok(Json(Ack::ok()))
}

async fn remove_quietly(path: &FsPath) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

/// GET /chunks/{chunk_name}: stream `[byte_start, byte_end)` of a verified
/// chunk. `byte_end = 0` means the whole chunk.
pub async fn retrieve_chunk(
    State(state): State<AppState>,
    Path(chunk_name): Path<String>,
    Query(range): Query<RetrieveQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, NodeError> {
    check_chunk_name(&chunk_name)?;
    let caller = CallerIdentity::from_headers(&headers);
    let relay = RelayCommand::from_headers(&headers)?;

    authz::authorize(
        &state.ctx,
        &authz::RETRIEVE_CHUNK,
        caller.as_ref(),
        Some(&relay),
        &[json!(chunk_name), json!(range.byte_start), json!(range.byte_end)],
    )?;

    let path = state.store.chunk_path(&chunk_name);
    if !state.store.exists(&chunk_name).await {
        return Err(NodeError::ChunkNotFound(chunk_name));
    }

    let (start, end) = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || -> Result<(u64, u64), NodeError> {
            let chunk = ChunkFile::open(&path)?;
            chunk.verify_checksum()?;
            Ok(chunk.resolve_range(range.byte_start, range.byte_end)?)
        })
        .await??
    };

    let content_length = end - start;
    debug!("Serving {} bytes {}..{}", chunk_name, start, end);
    let body = Body::from_stream(range_stream(path, start, content_length));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, content_length.to_string()),
        ],
        body,
    ))
}

fn range_stream(
    path: PathBuf,
    start: u64,
    length: u64,
) -> impl futures_util::Stream<Item = Result<Bytes, std::io::Error>> {
    async_stream::stream! {
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) => {
                yield Err(e);
                return;
            }
        };
        if start > 0 {
            if let Err(e) = file.seek(std::io::SeekFrom::Start(start)).await {
                yield Err(e);
                return;
            }
        }

        let mut remaining = length;
        let mut buf = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let to_read = (remaining as usize).min(buf.len());
            match file.read(&mut buf[..to_read]).await {
                Ok(0) => break,
                Ok(n) => {
                    remaining -= n as u64;
                    yield Ok(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    }
}

/// DELETE /chunks/{chunk_name}: control node only.
pub async fn delete_chunk(
    State(state): State<AppState>,
    Path(chunk_name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Ack>, NodeError> {
    check_chunk_name(&chunk_name)?;
    let caller = CallerIdentity::from_headers(&headers);
    authz::authorize(&state.ctx, &authz::DELETE_CHUNK, caller.as_ref(), None, &[json!(chunk_name)])?;

    if !state.store.delete_chunk(&chunk_name).await? {
        return Err(NodeError::ChunkNotFound(chunk_name));
    }
    Ok(Json(Ack::ok()))
}

/// POST /chunks/{chunk_name}/check-hash: salted hash of a stored chunk.
pub async fn check_hash(
    State(state): State<AppState>,
    Path(chunk_name): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CheckHashRequest>,
) -> Result<Json<CheckHashResponse>, NodeError> {
    check_chunk_name(&chunk_name)?;
    let caller = CallerIdentity::from_headers(&headers);
    authz::authorize(
        &state.ctx,
        &authz::CHECK_HASH,
        caller.as_ref(),
        None,
        &[json!(chunk_name), json!(req.salt)],
    )?;

    if !state.store.exists(&chunk_name).await {
        return Err(NodeError::ChunkNotFound(chunk_name));
    }
    let salt = BASE64
        .decode(&req.salt)
        .map_err(|_| NodeError::Chunk("invalid salt".into()))?;
    let path = state.store.chunk_path(&chunk_name);
    let chunk_hash = tokio::task::spawn_blocking(move || -> Result<String, NodeError> {
        Ok(ChunkFile::open(&path)?.calc_hash(&salt)?)
    })
    .await??;

    Ok(Json(CheckHashResponse { chunk_hash }))
}

/// POST /chunks/{chunk_name}/send: queue replication of a verified chunk
/// to another node. Returns before the transfer starts.
pub async fn send_chunk(
    State(state): State<AppState>,
    Path(chunk_name): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SendChunkRequest>,
) -> Result<Json<Ack>, NodeError> {
    check_chunk_name(&chunk_name)?;
    let caller = CallerIdentity::from_headers(&headers);
    authz::authorize(
        &state.ctx,
        &authz::SEND_CHUNK,
        caller.as_ref(),
        None,
        &[
            json!(chunk_name),
            json!(req.chunk_hash_salt),
            json!(req.dest_uri),
            json!(req.transfer_name),
            json!(req.priority),
        ],
    )?;

    if !state.store.exists(&chunk_name).await {
        return Err(NodeError::ChunkNotFound(chunk_name));
    }
    let chunk_path = state.store.chunk_path(&chunk_name);
    {
        let path = chunk_path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), NodeError> { Ok(ChunkFile::open(&path)?.verify_checksum()?) })
            .await??;
    }
    state.sending.enqueue(SendingJob { chunk_name, chunk_path, request: req });
    Ok(Json(Ack::ok()))
}

/// GET /hello: unauthenticated identification.
pub async fn hello(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<HelloResponse>, NodeError> {
    let caller = CallerIdentity::from_headers(&headers);
    authz::authorize(&state.ctx, &authz::HELLO, caller.as_ref(), None, &[])?;
    Ok(Json(HelloResponse {
        software: SOFTWARE.to_string(),
        protocol_version: PROTOCOL_VERSION.to_string(),
        serial_number: state.ctx.serial_number(),
    }))
}

/// GET /health: liveness check (no auth).
pub async fn health() -> &'static str {
    "ok"
}
