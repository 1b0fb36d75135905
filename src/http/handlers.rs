use super::state::AppState;
use crate::error::SessionError;
use crate::session::SessionConfig;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    /// Audio sample rate in Hz
    pub sample_rate: u32,

    /// BCP-47 language tag, e.g. "en-US"
    pub language: String,

    /// Provider model identifier, e.g. "nova-2"
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct FinishSessionResponse {
    pub session_id: String,
    pub transcript: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Map a session error onto the HTTP status the caller should see.
fn error_status(err: &SessionError) -> StatusCode {
    match err {
        SessionError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        SessionError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        SessionError::CapacityExceeded(_) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::ConnectionFailed(_) | SessionError::RetriesExhausted => {
            StatusCode::BAD_GATEWAY
        }
        SessionError::SessionClosed => StatusCode::GONE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: SessionError) -> axum::response::Response {
    (
        error_status(&err),
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /sessions
/// Create a streaming session; responds once the upstream connection is live
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    let config = SessionConfig {
        sample_rate: req.sample_rate,
        language: req.language,
        model: req.model,
    };

    match state.registry.create_session(config).await {
        Ok(session_id) => {
            info!("Session {} created", session_id);
            (
                StatusCode::CREATED,
                Json(CreateSessionResponse {
                    session_id,
                    status: "connected".to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to create session: {}", e);
            error_response(e)
        }
    }
}

/// POST /sessions/:session_id/audio
/// Forward one raw audio chunk into the session
pub async fn forward_audio(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    match state.registry.forward_audio(&session_id, body).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /sessions/:session_id/finish
/// Signal end-of-input, wait for finalization, return the full transcript
pub async fn finish_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.registry.finish_session(&session_id).await {
        Ok(transcript) => (
            StatusCode::OK,
            Json(FinishSessionResponse {
                session_id,
                transcript,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to finish session {}: {}", session_id, e);
            error_response(e)
        }
    }
}

/// DELETE /sessions/:session_id
/// Close a session without finalizing
pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.registry.close_session(&session_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /sessions/:session_id/status
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let session = match state.registry.get(&session_id).await {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };
    match session.status().await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /sessions/:session_id/transcript
pub async fn get_session_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let session = match state.registry.get(&session_id).await {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };
    match session.transcript().await {
        Ok(segments) => (StatusCode::OK, Json(segments)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /metrics
/// Fleet-wide counters for external monitoring
pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.registry.metrics().snapshot())).into_response()
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
