use super::state::AppState;
use crate::call::{CallStats, CallStatus, TranscriptEntry};
use crate::error::CallError;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CallActionResponse {
    pub status: CallStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct MuteResponse {
    pub is_muted: bool,
}

#[derive(Debug, Serialize)]
pub struct CallStatusResponse {
    pub status: CallStatus,
    pub is_muted: bool,
    pub is_remote_speaking: bool,
    pub stats: CallStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(e: CallError) -> axum::response::Response {
    let code = match e {
        CallError::AlreadyInCall { .. } => StatusCode::CONFLICT,
        CallError::ControllerGone => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        code,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /call/start
/// Start a call; connection progress shows up in /call/status
pub async fn start_call(State(state): State<AppState>) -> impl IntoResponse {
    info!("Start requested over HTTP");

    if let Err(e) = state.call.start_call().await {
        error!("Failed to start call: {}", e);
        return error_response(e);
    }

    (
        StatusCode::OK,
        Json(CallActionResponse {
            status: state.call.status(),
            message: "Call starting".to_string(),
        }),
    )
        .into_response()
}

/// POST /call/hangup
/// Hang up; a no-op outside a call
pub async fn hang_up(State(state): State<AppState>) -> impl IntoResponse {
    info!("Hang-up requested over HTTP");

    if let Err(e) = state.call.hang_up().await {
        error!("Failed to hang up: {}", e);
        return error_response(e);
    }

    (
        StatusCode::OK,
        Json(CallActionResponse {
            status: state.call.status(),
            message: "Call ended".to_string(),
        }),
    )
        .into_response()
}

/// POST /call/mute
pub async fn toggle_mute(State(state): State<AppState>) -> impl IntoResponse {
    match state.call.toggle_mute().await {
        Ok(is_muted) => (StatusCode::OK, Json(MuteResponse { is_muted })).into_response(),
        Err(e) => {
            error!("Failed to toggle mute: {}", e);
            error_response(e)
        }
    }
}

/// GET /call/status
pub async fn get_call_status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.call.snapshot();
    (
        StatusCode::OK,
        Json(CallStatusResponse {
            status: snapshot.status,
            is_muted: snapshot.is_muted,
            is_remote_speaking: snapshot.is_remote_speaking,
            stats: snapshot.stats,
        }),
    )
        .into_response()
}

/// GET /call/transcript
/// Completed transcript entries, oldest first
pub async fn get_call_transcript(State(state): State<AppState>) -> impl IntoResponse {
    let transcript: Vec<TranscriptEntry> = state.call.snapshot().transcript;
    (StatusCode::OK, Json(transcript)).into_response()
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
