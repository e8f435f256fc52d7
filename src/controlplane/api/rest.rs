//! REST API Handlers
//!
//! Thin JSON adapter over the volume manager. Errors are returned as
//! `{"error": <kind>, "message": ...}` with an HTTP status derived from the
//! error kind.

use crate::controlplane::VolumeManager;
use crate::domain::ports::{
    CapacityRange, CreateVolumeRequest, PublishVolumeRequest, VolumeCapability,
};
use crate::error::{Error, ErrorKind, Status};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Body of `POST /v1/volumes/{id}/validate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCapabilitiesRequest {
    pub capabilities: Vec<VolumeCapability>,
}

/// Body of `POST /v1/volumes/{id}/publish`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub target_path: String,
    pub capability: VolumeCapability,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub volume_context: BTreeMap<String, String>,
}

/// Body of `POST /v1/volumes/{id}/unpublish`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnpublishRequest {
    pub target_path: String,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: ErrorKind,
    pub message: String,
}

/// HTTP status for an error kind
pub fn http_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::OutOfRange => StatusCode::RANGE_NOT_SATISFIABLE,
        ErrorKind::Aborted => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Unimplemented => StatusCode::NOT_IMPLEMENTED,
    }
}

/// Error wrapper rendered as an [`ApiErrorResponse`]
pub struct RestError(pub Error);

impl From<Error> for RestError {
    fn from(err: Error) -> Self {
        RestError(err)
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let status = Status::from(&self.0);
        let code = http_status(status.kind);
        if code.is_server_error() {
            error!("Request failed: {}", status.message);
        } else {
            debug!("Request rejected: {}", status.message);
        }
        (
            code,
            Json(ApiErrorResponse {
                error: status.kind,
                message: status.message,
            }),
        )
            .into_response()
    }
}

type RestResult<T> = std::result::Result<T, RestError>;

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    manager: Arc<VolumeManager>,
}

impl RestRouter {
    pub fn new(manager: Arc<VolumeManager>) -> Self {
        Self { manager }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            manager: self.manager,
        };

        Router::new()
            // Controller endpoints
            .route("/v1/volumes", post(create_volume))
            .route("/v1/volumes/:id", delete(delete_volume))
            .route("/v1/volumes/:id/expand", post(expand_volume))
            .route("/v1/volumes/:id/validate", post(validate_volume))
            // Node endpoints
            .route("/v1/volumes/:id/publish", post(publish_volume))
            .route("/v1/volumes/:id/unpublish", post(unpublish_volume))
            // Health endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    manager: Arc<VolumeManager>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn create_volume(
    State(state): State<AppState>,
    Json(request): Json<CreateVolumeRequest>,
) -> RestResult<impl IntoResponse> {
    let volume = state.manager.create_volume(request).await?;
    Ok((StatusCode::CREATED, Json(volume)))
}

async fn delete_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> RestResult<StatusCode> {
    state.manager.delete_volume(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn expand_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(range): Json<CapacityRange>,
) -> RestResult<impl IntoResponse> {
    let response = state.manager.controller_expand_volume(&id, range).await?;
    Ok(Json(response))
}

async fn validate_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ValidateCapabilitiesRequest>,
) -> RestResult<impl IntoResponse> {
    let result = state
        .manager
        .validate_volume_capabilities(&id, request.capabilities)
        .await?;
    Ok(Json(result))
}

async fn publish_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PublishRequest>,
) -> RestResult<StatusCode> {
    state
        .manager
        .node_publish_volume(PublishVolumeRequest {
            volume_id: id,
            target_path: request.target_path,
            capability: request.capability,
            readonly: request.readonly,
            volume_context: request.volume_context,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unpublish_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UnpublishRequest>,
) -> RestResult<StatusCode> {
    state
        .manager
        .node_unpublish_volume(&id, &request.target_path)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, format!("ready ({})", state.manager.backend_name()))
}
