use super::session::ConnectionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-session counters, updated only by the session's own task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionMetrics {
    /// Audio chunks accepted from the transport layer
    pub chunks_received: u64,

    /// Audio chunks delivered to the upstream handle
    pub chunks_forwarded: u64,

    /// Audio chunks parked in the reconnection buffer during outages
    pub chunks_buffered: u64,

    /// Buffered chunks dropped to stay under the buffer cap
    pub buffer_evictions: u64,

    /// Transcript events received from the provider
    pub transcripts_received: u64,

    /// Upstream errors observed
    pub errors: u64,

    /// Reconnection attempts that produced a live handle
    pub reconnects_succeeded: u64,

    /// Reconnection attempts that failed or timed out
    pub reconnects_failed: u64,

    /// Cumulative time spent without an upstream handle, in milliseconds
    pub downtime_ms: u64,
}

/// A single transcript segment from the STT provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Transcribed text
    pub text: String,

    /// When this segment was received
    pub timestamp: DateTime<Utc>,

    /// Confidence score (0.0 to 1.0), if available
    pub confidence: Option<f32>,

    /// Whether this is a finalized result (false = interim hypothesis)
    pub is_final: bool,
}

/// Point-in-time snapshot of a session, exposed over the status route.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub connection_id: String,
    pub state: ConnectionState,
    pub is_reconnecting: bool,
    pub created_at: DateTime<Utc>,
    pub duration_secs: f64,

    /// Bytes currently parked in the reconnection buffer
    pub buffered_bytes: usize,

    /// Latest non-final hypothesis, replaced wholesale on each update
    pub interim_transcript: String,

    /// Length of the accumulated finalized transcript
    pub transcript_chars: usize,

    pub metrics: SessionMetrics,
}
