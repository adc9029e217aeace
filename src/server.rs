//! HTTP API for processing and retrieval.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/documents/{id}/process` | Run the pipeline for a stored document |
//! | `POST` | `/search` | Similarity search, optionally by owner or document ids |
//! | `POST` | `/tutors/{id}/search` | Similarity search over a tutor's linked documents |
//! | `PUT`  | `/tutors/{id}/documents/{document_id}` | Link a document to a tutor |
//! | `DELETE` | `/tutors/{id}/documents/{document_id}` | Unlink a document from a tutor |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid search options: limit must be at least 1" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `timeout` (408),
//! `unprocessable` (422), `provider_error` (502), `internal` (500).
//!
//! Processing and search run under `[server] request_timeout_secs`. A
//! processing run that overruns it leaves the document in `error`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use tutor_rag_core::error::{PipelineError, SearchError, StoreError};
use tutor_rag_core::models::SimilarityResult;
use tutor_rag_core::search::{format_context, SearchOptions};

use crate::context::AppContext;
use crate::processor::ProcessingReport;

#[derive(Clone)]
struct AppState {
    ctx: Arc<AppContext>,
    timeout: Duration,
}

/// Build the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(ctx: AppContext) -> Router {
    let state = AppState {
        timeout: Duration::from_secs(ctx.config.server.request_timeout_secs),
        ctx: Arc::new(ctx),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/documents/{id}/process", post(handle_process))
        .route("/search", post(handle_search))
        .route("/tutors/{id}/search", post(handle_tutor_search))
        .route(
            "/tutors/{id}/documents/{document_id}",
            put(handle_link).delete(handle_unlink),
        )
        .layer(cors)
        .with_state(state)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(ctx: AppContext) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let app = router(ctx);

    tracing::info!(bind = %bind_addr, "server listening");
    println!("tutor-rag server listening on http://{}", bind_addr);

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
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let message = err.to_string();
        match &err {
            PipelineError::Load(StoreError::NotFound(_)) => {
                AppError::new(StatusCode::NOT_FOUND, "not_found", message)
            }
            PipelineError::Parse(_) | PipelineError::Chunk(_) => {
                AppError::new(StatusCode::UNPROCESSABLE_ENTITY, "unprocessable", message)
            }
            PipelineError::Fetch(_) | PipelineError::Embed(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "provider_error", message)
            }
            PipelineError::Load(_) | PipelineError::Persist(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
            PipelineError::Timeout { .. } => {
                AppError::new(StatusCode::REQUEST_TIMEOUT, "timeout", message)
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::NotFound(_) => AppError::new(StatusCode::NOT_FOUND, "not_found", message),
            _ => AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message),
        }
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        let message = err.to_string();
        match err {
            SearchError::InvalidOptions(_) => {
                AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
            }
            SearchError::Embed(_) => AppError::new(StatusCode::BAD_GATEWAY, "provider_error", message),
            SearchError::Store(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

/// Run `fut` under the request timeout.
async fn with_timeout<T, E>(limit: Duration, fut: impl Future<Output = Result<T, E>>) -> Result<T, AppError>
where
    AppError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => Err(AppError::new(
            StatusCode::REQUEST_TIMEOUT,
            "timeout",
            format!("request timed out after {}s", limit.as_secs()),
        )),
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

// ============ POST /documents/{id}/process ============

async fn handle_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProcessingReport>, AppError> {
    // The deadline lives inside the processor so an overrun still marks
    // the document failed.
    let processor = state.ctx.processor().with_deadline(state.timeout);
    let report = processor.process_document(&id).await?;
    Ok(Json(report))
}

// ============ POST /search, POST /tutors/{id}/search ============

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub document_ids: Option<Vec<String>>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchRequest {
    fn options(&self, defaults: SearchOptions) -> SearchOptions {
        SearchOptions {
            limit: self.limit.unwrap_or(defaults.limit),
            threshold: self.threshold.unwrap_or(defaults.threshold),
            document_ids: self.document_ids.clone(),
            owner_id: self.owner_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SimilarityResult>,
    /// Results rendered as numbered sources for a chat prompt.
    pub context: String,
}

impl SearchResponse {
    fn new(results: Vec<SimilarityResult>) -> Self {
        Self {
            context: format_context(&results),
            results,
        }
    }
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let options = req.options(state.ctx.config.retrieval.search_options());
    let search = state.ctx.search();
    let results = with_timeout(state.timeout, search.search(&req.query, &options)).await?;
    Ok(Json(SearchResponse::new(results)))
}

async fn handle_tutor_search(
    State(state): State<AppState>,
    Path(tutor_id): Path<String>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let options = req.options(state.ctx.config.retrieval.search_options());
    let search = state.ctx.search();
    let results = with_timeout(
        state.timeout,
        search.search_scoped(&req.query, &tutor_id, &options),
    )
    .await?;
    Ok(Json(SearchResponse::new(results)))
}

// ============ PUT/DELETE /tutors/{id}/documents/{document_id} ============

#[derive(Debug, Serialize)]
pub struct LinkResponse {
    pub tutor_id: String,
    pub document_id: String,
    pub linked: bool,
}

async fn handle_link(
    State(state): State<AppState>,
    Path((tutor_id, document_id)): Path<(String, String)>,
) -> Result<Json<LinkResponse>, AppError> {
    state
        .ctx
        .store
        .link_document(&tutor_id, &document_id)
        .await?;
    Ok(Json(LinkResponse {
        tutor_id,
        document_id,
        linked: true,
    }))
}

async fn handle_unlink(
    State(state): State<AppState>,
    Path((tutor_id, document_id)): Path<(String, String)>,
) -> Result<Json<LinkResponse>, AppError> {
    let removed = state
        .ctx
        .store
        .unlink_document(&tutor_id, &document_id)
        .await?;
    if !removed {
        return Err(AppError::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("document {} is not linked to {}", document_id, tutor_id),
        ));
    }
    Ok(Json(LinkResponse {
        tutor_id,
        document_id,
        linked: false,
    }))
}
