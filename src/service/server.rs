//! HTTP routes of the reference metadata service.

use super::state::{MemoryState, StateError};
use crate::client::{ApiResponse, Listing, TsoResponse};
use crate::config::ServiceConfig;
use crate::error::{Result, StoreError};
use crate::model::{Block, EntryRecord, Replica};
use crate::oracle::HybridClock;
use crate::types::{BlockId, EntryId, EntryTag};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use metrics::counter;
use parking_lot::RwLock;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Shared state behind every route.
#[derive(Debug)]
pub struct ServiceState {
    memory: RwLock<MemoryState>,
    clock: HybridClock,
}

impl ServiceState {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            memory: RwLock::new(MemoryState::new()),
            clock: HybridClock::with_floor(config.tso_start),
        }
    }
}

impl Default for ServiceState {
    fn default() -> Self {
        Self::new(&ServiceConfig::default())
    }
}

/// Error answered with the envelope.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(what: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{} not found", what.into()))
    }
}

impl From<StateError> for ApiError {
    fn from(e: StateError) -> Self {
        let status = match e {
            StateError::NotFound(_) => StatusCode::NOT_FOUND,
            StateError::Conflict(_) => StatusCode::CONFLICT,
            StateError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        debug!(status = self.status.as_u16(), error = %self.message, "Request failed");
        let envelope = ApiResponse::failure(i32::from(self.status.as_u16()), self.message);
        (self.status, Json(envelope)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn accepted() -> (StatusCode, Json<ApiResponse>) {
    (StatusCode::ACCEPTED, Json(ApiResponse::success()))
}

fn record_op(op: &'static str) {
    counter!("statestore_service_ops_total", "op" => op).increment(1);
}

/// Build the router. Routes live under `prefix`; `/health` stays at the root.
pub fn router(state: Arc<ServiceState>, prefix: &str) -> Router {
    let api = Router::new()
        .route("/tso", get(handle_tso))
        .route(
            "/file/:id",
            get(handle_get_file)
                .put(handle_put_file)
                .post(handle_update_file)
                .delete(handle_delete_file),
        )
        .route(
            "/file/:id/:sub",
            get(handle_get_block)
                .put(handle_add_block)
                .post(handle_update_block),
        )
        .route("/file-truncate/:id/:size", put(handle_truncate))
        .route(
            "/directory/:id",
            get(handle_get_directory)
                .put(handle_put_directory)
                .post(handle_update_directory)
                .delete(handle_delete_directory),
        )
        .route(
            "/directory/:id/:name",
            get(handle_get_child).delete(handle_delete_child),
        )
        .route("/directory/:id/:old/:new", put(handle_rename))
        .route("/directory-children/:id", get(handle_children))
        .route(
            "/block/storage/:id/:data_node_id/:storage_id",
            put(handle_add_replica),
        );

    let root = Router::new().route("/health", get(health_check));
    let app = if prefix.is_empty() {
        root.merge(api)
    } else {
        root.nest(prefix, api)
    };
    app.with_state(state)
}

/// Serve `app` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| StoreError::Transport(e.to_string()))
}

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn run_service<F>(config: ServiceConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = Arc::new(ServiceState::new(&config));
    let app = router(state, &config.api_prefix);

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, prefix = %config.api_prefix, "Metadata service listening");

    serve(listener, app, shutdown).await?;
    info!("Metadata service stopped");
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct TsoQuery {
    count: Option<usize>,
}

async fn handle_tso(
    State(state): State<Arc<ServiceState>>,
    Query(query): Query<TsoQuery>,
) -> ApiResult<Json<TsoResponse>> {
    record_op("tso");
    let count = query.count.unwrap_or(1);
    if count == 0 {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "count must be at least 1"));
    }
    let timestamp = state
        .clock
        .allocate(count)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(TsoResponse { timestamp, count }))
}

fn get_tagged(state: &ServiceState, id: EntryId, tag: EntryTag) -> ApiResult<Json<EntryRecord>> {
    state
        .memory
        .read()
        .get_tagged(id, tag)
        .map(|entry| Json(EntryRecord::from(&entry)))
        .ok_or_else(|| ApiError::not_found(format!("{} {}", tag, id)))
}

async fn handle_get_file(
    State(state): State<Arc<ServiceState>>,
    Path(id): Path<EntryId>,
) -> ApiResult<Json<EntryRecord>> {
    record_op("get_file");
    get_tagged(&state, id, EntryTag::File)
}

async fn handle_get_directory(
    State(state): State<Arc<ServiceState>>,
    Path(id): Path<EntryId>,
) -> ApiResult<Json<EntryRecord>> {
    record_op("get_directory");
    get_tagged(&state, id, EntryTag::Directory)
}

async fn handle_put_file(
    State(state): State<Arc<ServiceState>>,
    Path(id): Path<EntryId>,
    Json(record): Json<EntryRecord>,
) -> ApiResult<impl IntoResponse> {
    record_op("create_file");
    state.memory.write().upsert(id, EntryTag::File, record)?;
    Ok(accepted())
}

async fn handle_put_directory(
    State(state): State<Arc<ServiceState>>,
    Path(id): Path<EntryId>,
    Json(record): Json<EntryRecord>,
) -> ApiResult<impl IntoResponse> {
    record_op("mkdir");
    state.memory.write().upsert(id, EntryTag::Directory, record)?;
    Ok(accepted())
}

async fn handle_update_file(
    State(state): State<Arc<ServiceState>>,
    Path(id): Path<EntryId>,
    Json(record): Json<EntryRecord>,
) -> ApiResult<impl IntoResponse> {
    record_op("update_file");
    state.memory.write().update_meta(id, EntryTag::File, record)?;
    Ok(accepted())
}

async fn handle_update_directory(
    State(state): State<Arc<ServiceState>>,
    Path(id): Path<EntryId>,
    Json(record): Json<EntryRecord>,
) -> ApiResult<impl IntoResponse> {
    record_op("update_directory");
    state
        .memory
        .write()
        .update_meta(id, EntryTag::Directory, record)?;
    Ok(accepted())
}

fn remove_tagged(state: &ServiceState, id: EntryId, tag: EntryTag) -> ApiResult<(StatusCode, Json<ApiResponse>)> {
    if state.memory.write().remove(id, tag) {
        Ok(accepted())
    } else {
        Err(ApiError::not_found(format!("{} {}", tag, id)))
    }
}

async fn handle_delete_file(
    State(state): State<Arc<ServiceState>>,
    Path(id): Path<EntryId>,
) -> ApiResult<impl IntoResponse> {
    record_op("remove_file");
    remove_tagged(&state, id, EntryTag::File)
}

async fn handle_delete_directory(
    State(state): State<Arc<ServiceState>>,
    Path(id): Path<EntryId>,
) -> ApiResult<impl IntoResponse> {
    record_op("remove_directory");
    remove_tagged(&state, id, EntryTag::Directory)
}

async fn handle_get_block(
    State(state): State<Arc<ServiceState>>,
    Path((id, index)): Path<(EntryId, u64)>,
) -> ApiResult<Json<Block>> {
    record_op("get_block");
    state
        .memory
        .read()
        .block_at(id, index)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("block {} of file {}", index, id)))
}

#[derive(Debug, Deserialize)]
struct AddBlockQuery {
    generation_time: u64,
}

async fn handle_add_block(
    State(state): State<Arc<ServiceState>>,
    Path((id, block_id)): Path<(EntryId, BlockId)>,
    Query(query): Query<AddBlockQuery>,
) -> ApiResult<Json<Block>> {
    record_op("add_block");
    let block = state
        .memory
        .write()
        .add_block(id, block_id, query.generation_time)?;
    Ok(Json(block))
}

async fn handle_update_block(
    State(state): State<Arc<ServiceState>>,
    Path((id, block_id)): Path<(EntryId, BlockId)>,
    Json(block): Json<Block>,
) -> ApiResult<Json<Block>> {
    record_op("update_block");
    let block = state.memory.write().update_block(id, block_id, block)?;
    Ok(Json(block))
}

async fn handle_truncate(
    State(state): State<Arc<ServiceState>>,
    Path((id, size)): Path<(EntryId, u64)>,
) -> ApiResult<impl IntoResponse> {
    record_op("truncate_blocks");
    state.memory.write().truncate(id, size)?;
    Ok(accepted())
}

async fn handle_get_child(
    State(state): State<Arc<ServiceState>>,
    Path((id, name)): Path<(EntryId, String)>,
) -> ApiResult<Json<EntryRecord>> {
    record_op("get_child");
    state
        .memory
        .read()
        .child(id, name.as_bytes())
        .map(|entry| Json(EntryRecord::from(&entry)))
        .ok_or_else(|| ApiError::not_found(format!("child {} of directory {}", name, id)))
}

async fn handle_delete_child(
    State(state): State<Arc<ServiceState>>,
    Path((id, name)): Path<(EntryId, String)>,
) -> ApiResult<impl IntoResponse> {
    record_op("remove_child");
    if state.memory.write().remove_child(id, name.as_bytes()) {
        Ok(accepted())
    } else {
        Err(ApiError::not_found(format!("child {} of directory {}", name, id)))
    }
}

async fn handle_rename(
    State(state): State<Arc<ServiceState>>,
    Path((id, old_parent, new_parent)): Path<(EntryId, EntryId, EntryId)>,
    record: Option<Json<EntryRecord>>,
) -> ApiResult<impl IntoResponse> {
    record_op("rename");
    state
        .memory
        .write()
        .rename(id, old_parent, new_parent, record.map(|Json(r)| r))?;
    Ok(accepted())
}

async fn handle_children(
    State(state): State<Arc<ServiceState>>,
    Path(id): Path<EntryId>,
) -> Json<Listing> {
    record_op("get_children");
    let response = state
        .memory
        .read()
        .children(id)
        .iter()
        .map(EntryRecord::from)
        .collect();
    Json(Listing { response })
}

async fn handle_add_replica(
    State(state): State<Arc<ServiceState>>,
    Path((id, data_node_id, storage_id)): Path<(BlockId, String, String)>,
) -> ApiResult<impl IntoResponse> {
    record_op("add_replica");
    let added = state
        .memory
        .write()
        .add_replica(id, Replica::new(data_node_id, storage_id))?;
    if !added {
        debug!(block = id, "Replica already recorded");
    }
    Ok(accepted())
}
