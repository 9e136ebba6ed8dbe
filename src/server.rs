//! JSON HTTP server.
//!
//! Exposes the search and dataset-administration surface over HTTP. The
//! server is the background-job path: registering a dataset here schedules
//! an asynchronous ingestion and returns a job id the client polls on
//! `GET /jobs/{id}`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/search` | Run an equality search |
//! | `GET`  | `/databases` | List registered datasets |
//! | `POST` | `/databases` | Register a dataset and schedule ingestion |
//! | `DELETE` | `/databases/{name}` | Remove a dataset and its stored file |
//! | `GET`  | `/databases/{name}/preview` | First rows of the stored file |
//! | `GET`  | `/jobs/{id}` | Ingestion progress blob |
//! | `GET`  | `/history` | Recent query history |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `format_error`
//! (400), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::cipher::CellCipher;
use crate::config::Config;
use crate::format::FormatError;
use crate::models::{DatabaseReport, ManagedDatabase, PreviewTable};
use crate::{datasets, format, history, jobs, search};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
    cipher: Arc<CellCipher>,
}

/// Starts the HTTP server. Binds to `[server].bind` and runs until the
/// process is terminated. The schema must already exist (`ldx init`).
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = crate::db::connect(config).await?;
    let cipher = Arc::new(CellCipher::new(config.encryption.key_bytes()?));

    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
        cipher,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/search", post(handle_search))
        .route("/databases", get(handle_list_databases).post(handle_register))
        .route("/databases/{name}", delete(handle_remove))
        .route("/databases/{name}/preview", get(handle_preview))
        .route("/jobs/{id}", get(handle_job_status))
        .route("/history", get(handle_history))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("leakdex server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Maps pipeline errors onto the HTTP error contract. Format problems are
/// client errors; missing datasets are 404s; the rest is internal.
fn classify_error(err: anyhow::Error) -> AppError {
    if err.downcast_ref::<FormatError>().is_some() {
        return AppError {
            status: StatusCode::BAD_REQUEST,
            code: "format_error".to_string(),
            message: err.to_string(),
        };
    }
    let msg = err.to_string();
    if msg.contains("no dataset") {
        not_found(msg)
    } else if msg.contains("must not be empty")
        || msg.contains("already registered")
        || msg.contains("already in progress")
        || msg.contains("does not exist")
    {
        bad_request(msg)
    } else {
        internal(msg)
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<DatabaseReport>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let user = request.user.as_deref().unwrap_or("anonymous");
    let results = search::run_search(&state.pool, &state.cipher, &request.query, user)
        .await
        .map_err(classify_error)?;
    Ok(Json(SearchResponse { results }))
}

// ============ GET /databases ============

#[derive(Serialize)]
struct DatabaseListResponse {
    databases: Vec<ManagedDatabase>,
}

async fn handle_list_databases(
    State(state): State<AppState>,
) -> Result<Json<DatabaseListResponse>, AppError> {
    let databases = datasets::list(&state.pool).await.map_err(classify_error)?;
    Ok(Json(DatabaseListResponse { databases }))
}

// ============ POST /databases ============

#[derive(Deserialize)]
struct RegisterRequest {
    name: String,
    /// Path to the uploaded file on the server's storage backend.
    path: String,
    #[serde(default)]
    history: Option<String>,
    #[serde(default)]
    activate: bool,
}

#[derive(Serialize)]
struct RegisterResponse {
    id: i64,
    name: String,
    job_id: String,
}

async fn handle_register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    let dataset = datasets::register(
        &state.pool,
        &state.config,
        &request.name,
        std::path::Path::new(&request.path),
        request.history.as_deref(),
        request.activate,
    )
    .await
    .map_err(classify_error)?;

    // The registering write is committed; ingestion is scheduled explicitly
    // afterwards, never as a side effect of the insert.
    let job_id = jobs::start(&state.pool, &state.config, dataset.id)
        .await
        .map_err(classify_error)?;

    Ok(Json(RegisterResponse {
        id: dataset.id,
        name: dataset.name,
        job_id,
    }))
}

// ============ DELETE /databases/{name} ============

async fn handle_remove(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    datasets::remove(&state.pool, &name)
        .await
        .map_err(classify_error)?;
    Ok(Json(serde_json::json!({ "removed": name })))
}

// ============ GET /databases/{name}/preview ============

#[derive(Deserialize)]
struct PreviewParams {
    rows: Option<u32>,
}

#[derive(Serialize)]
struct PreviewResponse {
    tables: Vec<PreviewTable>,
}

async fn handle_preview(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<PreviewParams>,
) -> Result<Json<PreviewResponse>, AppError> {
    let dataset = datasets::get_by_name(&state.pool, &name)
        .await
        .map_err(classify_error)?
        .ok_or_else(|| not_found(format!("no dataset named '{}'", name)))?;

    let rows = params.rows.unwrap_or(state.config.ingest.preview_rows);
    let handler = format::handler_for(std::path::Path::new(&dataset.file_path))
        .map_err(|e| classify_error(e.into()))?;
    let tables = handler.read_preview(rows).await.map_err(classify_error)?;
    Ok(Json(PreviewResponse { tables }))
}

// ============ GET /jobs/{id} ============

async fn handle_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobStatus>, AppError> {
    let status = jobs::status(&state.pool, &id).await.map_err(classify_error)?;
    Ok(Json(status))
}

// ============ GET /history ============

#[derive(Deserialize)]
struct HistoryParams {
    user: Option<String>,
    limit: Option<i64>,
}

#[derive(Serialize)]
struct HistoryResponse {
    entries: Vec<history::HistoryEntry>,
}

async fn handle_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let entries = history::list(&state.pool, params.user.as_deref(), limit)
        .await
        .map_err(classify_error)?;
    Ok(Json(HistoryResponse { entries }))
}
