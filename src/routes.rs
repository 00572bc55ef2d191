//! HTTP routes for submitting and verifying evidence, plus read-only chain views.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

use crate::error::EvidenceError;
use crate::fingerprint::CaptureMetadata;
use crate::model::Block;
use crate::service::{AuditReport, EvidenceService};
use crate::storage::BlockStore;

/// Shared application state passed to Axum handlers.
pub struct AppState<S> {
    pub service: Arc<EvidenceService<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        AppState {
            service: Arc::clone(&self.service),
        }
    }
}

/// Build the router. `max_upload_bytes` caps multipart request bodies.
pub fn router<S: BlockStore + 'static>(
    service: Arc<EvidenceService<S>>,
    max_upload_bytes: usize,
) -> Router {
    Router::new()
        .route("/api/evidence/upload", post(upload_evidence::<S>))
        .route("/api/evidence/verify", post(verify_evidence::<S>))
        .route("/api/blocks", get(list_blocks::<S>))
        .route("/api/blocks/:index", get(get_block::<S>))
        .route("/api/validate", get(validate_chain::<S>))
        .route("/health", get(health))
        .route("/version", get(version))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(AppState { service })
}

/// `{ "error": ... }` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<EvidenceError> for ApiError {
    fn from(e: EvidenceError) -> Self {
        match &e {
            EvidenceError::InvalidInput(_) => ApiError::bad_request(e.to_string()),
            EvidenceError::SealTimeout { .. } => {
                warn!(error = %e, "submission not sealed");
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            EvidenceError::Chain(_) | EvidenceError::Storage(_) => {
                error!(error = %e, "request failed");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("request failed: {e}"))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Read the `image`, `latitude`, `longitude` and `timestamp` form fields.
async fn read_evidence_form(
    mut multipart: Multipart,
) -> Result<(Vec<u8>, CaptureMetadata), ApiError> {
    let mut image = None;
    let mut latitude = None;
    let mut longitude = None;
    let mut timestamp = None;

    let bad_form =
        |e: axum::extract::multipart::MultipartError| ApiError::new(e.status(), e.body_text());

    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("image") => image = Some(field.bytes().await.map_err(bad_form)?.to_vec()),
            Some("latitude") => latitude = Some(field.text().await.map_err(bad_form)?),
            Some("longitude") => longitude = Some(field.text().await.map_err(bad_form)?),
            Some("timestamp") => timestamp = Some(field.text().await.map_err(bad_form)?),
            _ => {}
        }
    }

    let image = image.ok_or_else(|| ApiError::bad_request("Missing image"))?;
    let meta = CaptureMetadata::from_fields(
        latitude.as_deref(),
        longitude.as_deref(),
        timestamp.as_deref(),
    )?;
    Ok((image, meta))
}

async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, EvidenceError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(res) => res.map_err(ApiError::from),
        Err(e) => {
            error!(error = %e, "blocking task failed");
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal task failed"))
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub block_index: u64,
    pub hash: String,
}

/// POST /api/evidence/upload
pub async fn upload_evidence<S: BlockStore + 'static>(
    State(state): State<AppState<S>>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let (image, meta) = read_evidence_form(multipart).await?;
    // Sealing is CPU-bound; keep it off the async workers.
    let service = Arc::clone(&state.service);
    let submission = run_blocking(move || service.submit(&image, &meta)).await?;

    Ok(Json(UploadResponse {
        success: true,
        block_index: submission.index,
        hash: submission.fingerprint,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u64>,
    /// Creation time of the matching block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// POST /api/evidence/verify
pub async fn verify_evidence<S: BlockStore + 'static>(
    State(state): State<AppState<S>>,
    multipart: Multipart,
) -> Result<Json<VerifyResponse>, ApiError> {
    let (image, meta) = read_evidence_form(multipart).await?;
    let service = Arc::clone(&state.service);
    let verification = run_blocking(move || service.verify(&image, &meta)).await?;

    Ok(Json(VerifyResponse {
        verified: verification.verified,
        block_index: verification.block_index,
        timestamp: verification.block_timestamp,
    }))
}

/// GET /api/blocks
pub async fn list_blocks<S: BlockStore + 'static>(
    State(state): State<AppState<S>>,
) -> Json<Vec<Block>> {
    Json(state.service.blocks())
}

/// GET /api/blocks/:index
pub async fn get_block<S: BlockStore + 'static>(
    State(state): State<AppState<S>>,
    Path(index): Path<u64>,
) -> Result<Json<Block>, ApiError> {
    state
        .service
        .block(index)
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "not found"))
}

/// GET /api/validate: full audit, returns { ok, length, errors[] }
pub async fn validate_chain<S: BlockStore + 'static>(
    State(state): State<AppState<S>>,
) -> Json<AuditReport> {
    Json(state.service.audit_report())
}

/// GET /health
#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
}
pub async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

/// GET /version
#[derive(Serialize)]
pub struct Version {
    pub version: &'static str,
    pub git_sha: Option<&'static str>,
}
pub async fn version() -> Json<Version> {
    Json(Version {
        version: env!("CARGO_PKG_VERSION"),
        git_sha: option_env!("GIT_SHA"),
    })
}
