use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::errors::{DeviceError, OrchestratorError};
use crate::orchestrator::{JobKind, Orchestrator, StartOutcome, Variant};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ProjectQuery {
    pub project: Option<String>,
}

#[derive(Deserialize)]
pub struct StartJobRequest {
    #[serde(default)]
    pub project: String,
    pub build_type: Option<String>,
}

#[derive(Deserialize)]
pub struct CleanRequest {
    #[serde(default)]
    pub project: String,
}

/// Either `{action: add|remove|select, ...}` or the legacy `{address}` form.
#[derive(Deserialize)]
pub struct DeviceRequest {
    pub action: Option<String>,
    pub address: Option<String>,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
}

#[derive(Deserialize)]
pub struct PairRequest {
    #[serde(default)]
    pub pair_address: String,
    #[serde(default)]
    pub pairing_code: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct PairResponse {
    pub success: bool,
    pub message: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Device(inner) => inner.into(),
            err if err.is_client_error() => ApiError::BadRequest(err.to_string()),
            err => ApiError::Internal(format!("{:#}", err)),
        }
    }
}

impl From<DeviceError> for ApiError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::UnknownDevice(_) => ApiError::NotFound(err.to_string()),
            DeviceError::MissingField(_)
            | DeviceError::InvalidAddress(_)
            | DeviceError::BridgeNotFound => ApiError::BadRequest(err.to_string()),
            err => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::warn!(error = %rejection.body_text(), "rejected request body");
        ApiError::BadRequest("Invalid JSON".to_string())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/projects", get(list_projects))
        .route("/api/status", get(get_status))
        .route("/api/logs", get(get_logs))
        .route("/api/jobs", get(list_jobs))
        .route("/api/start-build", post(start_build))
        .route("/api/clean-cache", post(clean_cache))
        .route("/api/deploy", post(deploy))
        .route("/api/device", get(get_devices).post(update_devices))
        .route("/api/pair-device", post(pair_device))
        .route("/artifacts/{project}/{file}", get(download_artifact))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

fn required_project(query: ProjectQuery) -> Result<String, ApiError> {
    query
        .project
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Project is required".to_string()))
}

/// `build_type` from a request body; absent means debug.
fn parse_variant(build_type: Option<&str>) -> Result<Variant, ApiError> {
    match build_type {
        None => Ok(Variant::Debug),
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::BadRequest("Build type must be debug or release.".to_string())),
    }
}

fn already_running(kind: JobKind) -> String {
    let label = match kind {
        JobKind::Build => "Build",
        JobKind::Clean => "Clean",
        JobKind::Deploy => "Deploy",
    };
    format!("{} already running.", label)
}

fn start_response(outcome: StartOutcome, started: &str) -> Json<MessageResponse> {
    let message = match outcome {
        StartOutcome::Started(_) => started.to_string(),
        StartOutcome::AlreadyRunning(kind) => already_running(kind),
    };
    Json(MessageResponse { message })
}

/// `attachment` disposition with an ASCII-safe quoted name plus the exact
/// name in RFC 5987 form.
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            ' ' => ' ',
            c if c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(file_name)
    )
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_projects(State(state): State<SharedState>) -> impl IntoResponse {
    let projects = state.orchestrator.list_buildable_projects();
    Json(serde_json::json!({ "projects": projects }))
}

async fn get_status(
    State(state): State<SharedState>,
    Query(query): Query<ProjectQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let project = required_project(query)?;
    let record = state.orchestrator.get_status(&project)?;
    Ok(Json(record))
}

async fn get_logs(
    State(state): State<SharedState>,
    Query(query): Query<ProjectQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let project = required_project(query)?;
    match state.orchestrator.get_log(&project)? {
        Some(logs) => Ok(Json(serde_json::json!({ "logs": logs }))),
        None => Err(ApiError::NotFound("No logs available.".to_string())),
    }
}

async fn list_jobs(State(state): State<SharedState>) -> impl IntoResponse {
    Json(serde_json::json!({ "jobs": state.orchestrator.active_jobs() }))
}

async fn start_build(
    State(state): State<SharedState>,
    payload: Result<Json<StartJobRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let variant = parse_variant(req.build_type.as_deref())?;
    let outcome = state.orchestrator.start_build(&req.project, variant)?;
    Ok(start_response(outcome, "Build started"))
}

async fn clean_cache(
    State(state): State<SharedState>,
    payload: Result<Json<CleanRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let outcome = state.orchestrator.start_clean(&req.project)?;
    Ok(start_response(outcome, "Clean cache started"))
}

async fn deploy(
    State(state): State<SharedState>,
    payload: Result<Json<StartJobRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let variant = parse_variant(req.build_type.as_deref())?;
    let outcome = state.orchestrator.start_deploy(&req.project, Some(variant))?;
    Ok(start_response(outcome, "Deploy started"))
}

async fn get_devices(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.orchestrator.list_devices()?))
}

async fn update_devices(
    State(state): State<SharedState>,
    payload: Result<Json<DeviceRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let orchestrator = &state.orchestrator;
    let address = req.address.as_deref().unwrap_or_default();
    let device_id = req.device_id.as_deref().unwrap_or_default();

    let snapshot = match req.action.as_deref() {
        Some("add") => orchestrator.add_device(
            address,
            req.device_id.as_deref(),
            req.device_name.as_deref(),
        )?,
        Some("remove") => orchestrator.remove_device(device_id)?,
        Some("select") => orchestrator.select_device(device_id)?,
        Some(_) => return Err(ApiError::BadRequest("Unknown action.".to_string())),
        None => orchestrator.set_device_address(address)?,
    };
    Ok(Json(snapshot))
}

async fn pair_device(
    State(state): State<SharedState>,
    payload: Result<Json<PairRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;
    let response = match state
        .orchestrator
        .pair_device(&req.pair_address, &req.pairing_code)
        .await
    {
        Ok(outcome) => PairResponse {
            success: outcome.is_success(),
            message: outcome.message(),
        },
        Err(DeviceError::BridgeNotFound) => PairResponse {
            success: false,
            message: DeviceError::BridgeNotFound.to_string(),
        },
        Err(e @ (DeviceError::MissingField(_) | DeviceError::InvalidAddress(_))) => {
            return Err(e.into());
        }
        Err(e) => PairResponse {
            success: false,
            message: format!("Unexpected error: {}", e),
        },
    };

    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    Ok((status, Json(response)).into_response())
}

async fn download_artifact(
    State(state): State<SharedState>,
    Path((project, file)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state
        .orchestrator
        .published_artifact(&project, &file)
        .ok_or_else(|| ApiError::NotFound(format!("Artifact not found: {}", file)))?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to read artifact: {}", e)))?;
    let mime = mime_guess::from_path(&path).first_or_octet_stream();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(&file)),
        ],
        bytes,
    ))
}
