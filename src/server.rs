//! HTTP API.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `GET`    | `/` | Banner |
//! | `GET`    | `/health` | Liveness probe (status, service, version) |
//! | `POST`   | `/process-pdf` | Multipart upload (field `file`, `.pdf` or `.txt`) |
//! | `POST`   | `/query` | `{question, filename?, k?}` → answer and source chunks |
//! | `GET`    | `/documents` | Registry of known documents |
//! | `DELETE` | `/documents/{filename}` | Remove a document and its index |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "rate_limited", "message": "embedding failed for document 'a.pdf': ..." } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `unauthorized` | 401 |
//! | `not_found` | 404 |
//! | `reprocessing_in_progress` | 409 |
//! | `payload_too_large` | 413 |
//! | `extraction_failed` | 422 |
//! | `rate_limited` | 429 |
//! | `service_unavailable` | 503 |
//! | `internal` | 500 |

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{DocumentError, Error, ServiceError};
use crate::models::{DocumentSummary, RetrievedChunk};
use crate::pipeline::Pipeline;

const SERVICE_NAME: &str = "docqa";

/// Characters of chunk text included in query responses.
const EXCERPT_CHARS: usize = 200;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

/// Build the router. Exposed so tests can drive it in-process.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let max_upload = pipeline.config().server.max_upload_bytes;
    let state = AppState { pipeline };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/process-pdf", post(handle_process))
        .route("/query", post(handle_query))
        .route("/documents", get(handle_list))
        .route("/documents/{filename}", delete(handle_delete))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve until Ctrl-C on `[server].bind`.
pub async fn run_server(pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let bind_addr = pipeline.config().server.bind.clone();
    let app = router(pipeline);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn classify(err: &Error) -> (StatusCode, &'static str) {
    match err {
        Error::Extraction(_) => (StatusCode::UNPROCESSABLE_ENTITY, "extraction_failed"),
        Error::Chunking(_) | Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        Error::IndexNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        Error::ReprocessingInProgress(_) => (StatusCode::CONFLICT, "reprocessing_in_progress"),
        Error::Embedding(e) | Error::Generation(e) => match e {
            ServiceError::RateLimit(_) => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            ServiceError::Auth(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ServiceError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ServiceError::TransientNetwork(_) | ServiceError::InvalidResponse(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
            }
        },
        Error::IndexBuild(_)
        | Error::IndexCorrupt { .. }
        | Error::DimensionMismatch { .. }
        | Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        let (status, code) = classify(&err.source);
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError::new(status, code, err.to_string())
    }
}

// ============ GET / and GET /health ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "docqa API is running" }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /process-pdf ============

#[derive(Serialize)]
struct ProcessResponse {
    message: String,
    filename: String,
    status: &'static str,
    chunks: usize,
    processed_at: DateTime<Utc>,
}

/// Accepts the first multipart field named `file`.
async fn handle_process(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ProcessResponse>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(upload_basename)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| bad_request("upload has no filename"))?;
        let bytes = field.bytes().await.map_err(multipart_error)?;
        upload = Some((filename, bytes));
        break;
    }
    let (filename, bytes) = upload.ok_or_else(|| bad_request("missing multipart field 'file'"))?;

    let outcome = state.pipeline.process(&filename, bytes.to_vec()).await?;
    Ok(Json(ProcessResponse {
        message: format!("'{}' processed successfully", outcome.filename),
        filename: outcome.filename,
        status: outcome.status.label(),
        chunks: outcome.chunks,
        processed_at: outcome.processed_at,
    }))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    let status = err.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "payload_too_large"
    } else {
        "bad_request"
    };
    AppError::new(status, code, err.body_text())
}

/// Browsers may send a full client-side path; keep the last component.
fn upload_basename(name: &str) -> String {
    name.rsplit(['/', '\\']).next().unwrap_or(name).trim().to_string()
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Serialize)]
struct SourceChunk {
    chunk_index: usize,
    score: f32,
    start: usize,
    end: usize,
    content: String,
}

impl From<RetrievedChunk> for SourceChunk {
    fn from(chunk: RetrievedChunk) -> Self {
        Self {
            chunk_index: chunk.chunk_index,
            score: chunk.score,
            start: chunk.start,
            end: chunk.end,
            content: excerpt(&chunk.text),
        }
    }
}

#[derive(Serialize)]
struct QueryResponse {
    question: String,
    answer: String,
    source_chunks: Vec<SourceChunk>,
    filename: String,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    if req.k == Some(0) {
        return Err(bad_request("k must be >= 1"));
    }

    let result = state
        .pipeline
        .query(&req.question, req.filename.as_deref(), req.k)
        .await?;

    Ok(Json(QueryResponse {
        question: result.question,
        answer: result.answer,
        source_chunks: result.ranked.into_iter().map(SourceChunk::from).collect(),
        filename: result.filename,
    }))
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

// ============ /documents ============

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<DocumentSummary>,
}

async fn handle_list(State(state): State<AppState>) -> Json<DocumentListResponse> {
    Json(DocumentListResponse {
        documents: state.pipeline.list().await,
    })
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.pipeline.delete(&filename).await? {
        Ok(Json(serde_json::json!({ "deleted": filename })))
    } else {
        Err(AppError::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no document named '{}'", filename),
        ))
    }
}
