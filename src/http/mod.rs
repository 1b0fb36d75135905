//! HTTP API server for external control (the surrounding transport layer)
//!
//! This module provides a REST API for driving streaming sessions:
//! - POST /sessions - Create a session
//! - POST /sessions/:id/audio - Forward a raw audio chunk
//! - POST /sessions/:id/finish - Finalize and fetch the transcript
//! - DELETE /sessions/:id - Close without finalizing
//! - GET /sessions/:id/status - Query session status
//! - GET /sessions/:id/transcript - Get accumulated segments
//! - GET /metrics - Fleet-wide counters
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
