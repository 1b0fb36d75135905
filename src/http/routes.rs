use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session control
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/:session_id", delete(handlers::close_session))
        .route(
            "/sessions/:session_id/audio",
            post(handlers::forward_audio),
        )
        .route(
            "/sessions/:session_id/finish",
            post(handlers::finish_session),
        )
        // Session queries
        .route(
            "/sessions/:session_id/status",
            get(handlers::get_session_status),
        )
        .route(
            "/sessions/:session_id/transcript",
            get(handlers::get_session_transcript),
        )
        // Fleet metrics
        .route("/metrics", get(handlers::get_metrics))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
