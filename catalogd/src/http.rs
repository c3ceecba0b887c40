//! §6 HTTP surface: the `/api/fuse/*` contract a FUSE-style client polls to
//! browse the VFS. Every response either carries its payload or a JSON
//! `{error, details?}` body with a 400/404/500 status.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use serde::{Deserialize, Serialize};

use catalog_core::pipeline::Pipeline;
use catalog_core::vfs::{ReadResult, Vfs};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub vfs: Arc<Vfs>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/fuse/health", get(health))
        .route("/api/fuse/stats", get(stats))
        .route("/api/fuse/readdir", post(readdir))
        .route("/api/fuse/getattr", post(getattr))
        .route("/api/fuse/exists", post(exists))
        .route("/api/fuse/read", post(read))
        .route("/api/fuse/metadata", post(metadata))
        .route("/api/fuse/tree", get(tree))
        .route("/api/fuse/files", get(files))
        .route("/api/fuse/directories", get(directories))
        .route("/api/fuse/refresh", post(refresh))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

fn bad_request(details: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { error: "bad_request".into(), details: Some(details.into()) }))
        .into_response()
}

fn not_found(path: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(ErrorBody { error: "not_found".into(), details: Some(path.to_string()) }))
        .into_response()
}

#[derive(Deserialize)]
struct PathBody {
    path: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", timestamp: chrono::Utc::now() })
}

#[derive(Serialize)]
struct StatsResponse {
    file_count: u64,
    directory_count: u64,
    total_bytes: u64,
    sidecar_count: u64,
    validate: catalog_core::metrics::StageSnapshot,
    light: catalog_core::metrics::StageSnapshot,
    background: catalog_core::metrics::StageSnapshot,
    discovered: usize,
    in_light: usize,
    in_background: usize,
    done_total: u64,
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let vfs_stats = state.vfs.stats();
    let pipeline_stats = state.pipeline.stats();
    Json(StatsResponse {
        file_count: vfs_stats.file_count,
        directory_count: vfs_stats.directory_count,
        total_bytes: vfs_stats.total_bytes,
        sidecar_count: vfs_stats.sidecar_count,
        validate: pipeline_stats.metrics.validate,
        light: pipeline_stats.metrics.light,
        background: pipeline_stats.metrics.background,
        discovered: pipeline_stats.state.discovered.len(),
        in_light: pipeline_stats.state.light.len(),
        in_background: pipeline_stats.state.background.len(),
        done_total: pipeline_stats.state.total_done,
    })
}

#[derive(Serialize)]
struct ReaddirResponse {
    entries: Vec<String>,
}

async fn readdir(State(state): State<AppState>, Json(body): Json<PathBody>) -> Response {
    match state.vfs.readdir(&body.path) {
        Some(mut entries) => {
            entries.sort();
            Json(ReaddirResponse { entries }).into_response()
        }
        None => not_found(&body.path),
    }
}

#[derive(Serialize)]
struct AttrsResponse {
    is_dir: bool,
    size: u64,
    mode: u32,
    nlink: u32,
    uid: u32,
    gid: u32,
    atime: chrono::DateTime<chrono::Utc>,
    mtime: chrono::DateTime<chrono::Utc>,
    ctime: chrono::DateTime<chrono::Utc>,
}

async fn getattr(State(state): State<AppState>, Json(body): Json<PathBody>) -> Response {
    match state.vfs.getattr(&body.path) {
        Some(attrs) => Json(AttrsResponse {
            is_dir: attrs.is_dir,
            size: attrs.size,
            mode: attrs.mode,
            nlink: attrs.nlink,
            uid: attrs.uid,
            gid: attrs.gid,
            atime: attrs.atime,
            mtime: attrs.mtime,
            ctime: attrs.ctime,
        })
        .into_response(),
        None => not_found(&body.path),
    }
}

#[derive(Serialize)]
struct ExistsResponse {
    exists: bool,
}

async fn exists(State(state): State<AppState>, Json(body): Json<PathBody>) -> Json<ExistsResponse> {
    Json(ExistsResponse { exists: state.vfs.exists(&body.path) })
}

#[derive(Serialize)]
struct ReadResponse {
    source_path: Option<String>,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_encoding: Option<&'static str>,
}

async fn read(State(state): State<AppState>, Json(body): Json<PathBody>) -> Response {
    let Some(attrs) = state.vfs.getattr(&body.path) else { return not_found(&body.path) };
    if attrs.is_dir {
        return bad_request(format!("{} is a directory", body.path));
    }
    match state.vfs.read(&body.path) {
        Some(ReadResult::Source(source_path)) => Json(ReadResponse {
            source_path: Some(source_path.to_string_lossy().to_string()),
            size: attrs.size,
            content: None,
            content_encoding: None,
        })
        .into_response(),
        Some(ReadResult::Bytes(bytes)) => Json(ReadResponse {
            source_path: None,
            size: bytes.len() as u64,
            content: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            content_encoding: Some("base64"),
        })
        .into_response(),
        None => not_found(&body.path),
    }
}

async fn metadata(State(state): State<AppState>, Json(body): Json<PathBody>) -> Response {
    match state.vfs.metadata(&body.path) {
        Some(meta) => Json(meta).into_response(),
        None => not_found(&body.path),
    }
}

#[derive(Serialize)]
struct TreeResponse {
    entries: Vec<String>,
    stats: StatsDto,
}

#[derive(Serialize)]
struct StatsDto {
    file_count: u64,
    directory_count: u64,
    total_bytes: u64,
    sidecar_count: u64,
}

async fn tree(State(state): State<AppState>) -> Json<TreeResponse> {
    let mut entries = state.vfs.readdir("").unwrap_or_default();
    entries.sort();
    let stats = state.vfs.stats();
    Json(TreeResponse {
        entries,
        stats: StatsDto {
            file_count: stats.file_count,
            directory_count: stats.directory_count,
            total_bytes: stats.total_bytes,
            sidecar_count: stats.sidecar_count,
        },
    })
}

#[derive(Serialize)]
struct PathListResponse {
    paths: Vec<String>,
}

async fn files(State(state): State<AppState>) -> Json<PathListResponse> {
    let mut paths = state.vfs.all_files();
    paths.sort();
    Json(PathListResponse { paths })
}

async fn directories(State(state): State<AppState>) -> Json<PathListResponse> {
    let mut paths = state.vfs.all_directories();
    paths.sort();
    Json(PathListResponse { paths })
}

#[derive(Serialize)]
struct StatusOk {
    status: &'static str,
}

/// §6 exposes `refresh` as a control surface; the actual re-scan is driven
/// by the event stream, so this just confirms the pipeline is reachable.
async fn refresh(State(state): State<AppState>) -> Json<StatusOk> {
    let _ = state.pipeline.stats();
    Json(StatusOk { status: "ok" })
}
