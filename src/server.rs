//! HTTP surface for the job lifecycle.
//!
//! Thin by intent: handlers validate the request, touch the store or the
//! queue, and serialise a response. All conversion work happens in the
//! worker pool after `upload` has already answered `202 Accepted`.
//!
//! Route contracts (shapes and status codes are load-bearing — browser
//! clients of the previous implementations depend on them):
//!
//! | Route | Behaviour |
//! |-------|-----------|
//! | `POST /api/process/upload` | multipart field `file` → `202` `{id, status}`; `400` without a file |
//! | `GET /api/process/{id}/status` | `{id, status, createdAt, updatedAt, error}`; `404` unknown |
//! | `GET /api/process/{id}/result` | processes + documents once `DONE`; `404` otherwise |
//! | `GET /api/process` | summary list, newest first |
//! | `POST /api/generate` | `{prompt}` → `{text, xml}`; `400`/`500`/`502` per failure class |

use crate::config::ConversionConfig;
use crate::error::ProcmapError;
use crate::job::{Job, JobStatus, JobSummary};
use crate::output::{BpmnDocument, ProcessDefinition};
use crate::pipeline::llm::{generate_with_retry, TextGenerator};
use crate::pipeline::parse;
use crate::prompts::BPMN_MODELLER_PROMPT;
use crate::queue::JobQueue;
use crate::store::JobStore;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Upload size cap. Office documents worth converting are rarely above a
/// few MB; the cap only guards against runaway bodies.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub queue: JobQueue,
    pub generator: Arc<dyn TextGenerator>,
    pub config: Arc<ConversionConfig>,
    /// Directory uploads are stored under, one subdirectory per job id.
    pub data_dir: PathBuf,
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/process/upload", post(upload))
        .route("/api/process/{id}/status", get(status))
        .route("/api/process/{id}/result", get(result))
        .route("/api/process", get(list))
        .route("/api/generate", post(generate))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

// ── Error mapping ────────────────────────────────────────────────────────────

/// JSON error response with an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<ProcmapError> for ApiError {
    fn from(err: ProcmapError) -> Self {
        let status = match &err {
            ProcmapError::NotFound { .. } => StatusCode::NOT_FOUND,
            ProcmapError::UnsupportedFileType { .. } => StatusCode::BAD_REQUEST,
            ProcmapError::UpstreamAuthMissing { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            e if e.is_upstream() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            // Display impls carry no credentials, so the message is safe
            // to surface.
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    id: String,
    status: JobStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    id: String,
    status: JobStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultResponse {
    id: String,
    processes: Vec<ProcessDefinition>,
    documents: Vec<BpmnDocument>,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    prompt: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    text: String,
    xml: Option<String>,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// Accept a document, register a `PENDING` job, enqueue it, answer `202`.
async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field.file_name().unwrap_or("uploaded_file").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("failed to read upload: {e}")))?;
        if bytes.is_empty() {
            return Err(ApiError::bad_request("uploaded file is empty"));
        }

        let id = Uuid::new_v4().to_string();
        let dir = state.data_dir.join(&id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ProcmapError::WriteFailed {
                path: dir.clone(),
                source: e,
            })?;

        let stored_path = dir.join(crate::job::sanitize_filename(&original_name));
        tokio::fs::write(&stored_path, &bytes)
            .await
            .map_err(|e| ProcmapError::WriteFailed {
                path: stored_path.clone(),
                source: e,
            })?;

        let job = Job::with_id(id.clone(), &original_name, stored_path);
        state.store.create(job)?;
        state.queue.enqueue(&id)?;

        info!("Accepted upload '{}' as job {}", original_name, id);
        return Ok((
            StatusCode::ACCEPTED,
            Json(UploadResponse {
                id,
                status: JobStatus::Pending,
            }),
        )
            .into_response());
    }

    Err(ApiError::bad_request(
        "no file uploaded (field name must be `file`)",
    ))
}

async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let job = state
        .store
        .get(&id)
        .ok_or_else(|| ApiError::not_found("not found"))?;

    Ok(Json(StatusResponse {
        id: job.id,
        status: job.status,
        created_at: job.created_at,
        updated_at: job.updated_at,
        error: job.error_message,
    }))
}

async fn result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResultResponse>, ApiError> {
    let job = state
        .store
        .get(&id)
        .ok_or_else(|| ApiError::not_found("not found"))?;

    if job.status != JobStatus::Done {
        return Err(ApiError::not_found("result not ready"));
    }

    Ok(Json(ResultResponse {
        id: job.id,
        processes: job.processes,
        documents: job.documents,
    }))
}

async fn list(State(state): State<AppState>) -> Json<Vec<JobSummary>> {
    Json(state.store.list())
}

/// Direct LLM proxy: prompt in, `{text, xml}` out, same extraction rule
/// as the background pipeline.
async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let prompt = request
        .prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing prompt in request body"))?;

    let text = generate_with_retry(
        state.generator.as_ref(),
        BPMN_MODELLER_PROMPT,
        &prompt,
        &state.config,
    )
    .await
    .map_err(ApiError::from)?;

    let reply = if state.config.validate_xml {
        parse::extract_reply(&text)
    } else {
        parse::extract_reply_unchecked(&text)
    };

    Ok(Json(GenerateResponse {
        text: reply.raw.unwrap_or_default(),
        xml: reply.xml,
    }))
}

// ── Tests ────────────────────────────────────────────────────────────────────
