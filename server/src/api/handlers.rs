//! REST handlers

use super::AppState;
use crate::command::CommandRecord;
use crate::error::HubError;
use crate::events::EndReason;
use crate::hub::HealthReport;
use crate::registry::DeviceInfo;
use crate::ussd::SessionSnapshot;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    #[serde(alias = "phone")]
    pub device: String,
    pub command: String,
}

#[derive(Debug, Deserialize)]
pub struct StartUssdRequest {
    #[serde(alias = "phone_id")]
    pub device_id: String,
    #[serde(alias = "ussd_code")]
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct RespondUssdRequest {
    pub session_id: String,
    pub response: String,
}

#[derive(Debug, Deserialize)]
pub struct EndUssdRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    fn success() -> Json<Self> {
        Json(Self { status: "success" })
    }
}

#[derive(Debug, Serialize)]
pub struct EndUssdResponse {
    pub session_id: String,
    pub ended: bool,
}

// Error handling

#[derive(Debug)]
pub enum ApiError {
    Hub(HubError),
    NotFound(String),
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        ApiError::Hub(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, label, message) = match self {
            ApiError::Hub(err) => {
                let (status, label) = match &err {
                    HubError::DeviceNotFound(_) => (StatusCode::NOT_FOUND, "device not found"),
                    HubError::Dispatch { .. } => (StatusCode::BAD_GATEWAY, "dispatch failed"),
                    HubError::SessionNotActive(_) => (StatusCode::CONFLICT, "session not active"),
                };
                (status, label, err.to_string())
            }
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "not found", message),
        };

        debug!(status = status.as_u16(), %message, "request failed");
        (status, Json(json!({ "status": label, "error": message }))).into_response()
    }
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.hub.health().await)
}

/// GET /api/devices
pub async fn list_devices(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.hub.registry.list_connected().await)
}

/// GET /api/devices/status
pub async fn device_status(State(state): State<AppState>) -> Json<Vec<DeviceInfo>> {
    Json(state.hub.registry.devices().await)
}

/// GET /api/devices/{id}/history
pub async fn device_history(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Vec<CommandRecord>>, ApiError> {
    let history = state.hub.dispatcher.history(&device_id).await;
    if history.is_empty() {
        return Err(ApiError::NotFound(format!("No history for {device_id}")));
    }
    Ok(Json(history))
}

/// POST /api/command
pub async fn send_command(
    State(state): State<AppState>,
    Json(req): Json<CommandRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .hub
        .dispatcher
        .send(&req.device, &req.command)
        .await
        .into_result(&req.device)?;
    Ok(StatusResponse::success())
}

/// POST /api/ussd/start
pub async fn start_ussd(
    State(state): State<AppState>,
    Json(req): Json<StartUssdRequest>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let session = state
        .hub
        .sessions
        .start_session(&req.device_id, &req.code)
        .await?;
    Ok(Json(session))
}

/// POST /api/ussd/respond
pub async fn respond_ussd(
    State(state): State<AppState>,
    Json(req): Json<RespondUssdRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .hub
        .sessions
        .respond(&req.session_id, &req.response)
        .await?;
    Ok(StatusResponse::success())
}

/// POST /api/ussd/end
pub async fn end_ussd(
    State(state): State<AppState>,
    Json(req): Json<EndUssdRequest>,
) -> Json<EndUssdResponse> {
    let ended = state
        .hub
        .sessions
        .end_session(&req.session_id, EndReason::User)
        .await
        .is_some();
    if ended {
        info!(session = %req.session_id, "session ended by operator");
    }
    Json(EndUssdResponse {
        session_id: req.session_id,
        ended,
    })
}

/// GET /api/ussd/sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.hub.sessions.active_sessions().await)
}
