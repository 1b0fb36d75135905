use crate::session::{RECONNECT_BUFFER_CAP, TRANSCRIPT_CAP_CHARS};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Fleet-wide counters rolled up from session lifecycle events.
///
/// Read-only observability surface: the snapshot feeds external monitoring
/// and never drives control-flow decisions.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    active_sessions: AtomicU64,
    peak_sessions: AtomicU64,
    sessions_created: AtomicU64,
    sessions_closed: AtomicU64,
    sessions_cleaned: AtomicU64,
    chunks_forwarded: AtomicU64,
    transcripts_received: AtomicU64,
    reconnects_succeeded: AtomicU64,
    reconnects_failed: AtomicU64,
    total_session_ms: AtomicU64,
}

/// Serializable point-in-time view of the fleet counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub active_sessions: u64,
    pub peak_sessions: u64,
    pub sessions_created: u64,
    pub sessions_closed: u64,

    /// Sessions reclaimed by the idle/age sweep
    pub sessions_cleaned: u64,

    pub chunks_forwarded: u64,
    pub transcripts_received: u64,
    pub reconnects_succeeded: u64,
    pub reconnects_failed: u64,
    pub total_session_secs: f64,
    pub avg_session_secs: f64,

    /// Rough upper bound derived from active session count and the
    /// per-session buffer and transcript caps
    pub estimated_memory_bytes: u64,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        let active = self.active_sessions.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_sessions.fetch_max(active, Ordering::Relaxed);
    }

    pub fn on_session_closed(&self, duration: Duration) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
        self.total_session_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        // Saturating decrement; a double-remove must not wrap the gauge
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// A session reclaimed by the registry sweep counts as both cleaned and
    /// closed.
    pub fn on_session_cleaned(&self, duration: Duration) {
        self.sessions_cleaned.fetch_add(1, Ordering::Relaxed);
        self.on_session_closed(duration);
    }

    pub fn on_chunks_forwarded(&self, count: u64) {
        self.chunks_forwarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn on_transcript(&self) {
        self.transcripts_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_reconnect(&self, success: bool) {
        if success {
            self.reconnects_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reconnects_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let active = self.active_sessions.load(Ordering::Relaxed);
        let closed = self.sessions_closed.load(Ordering::Relaxed);
        let total_ms = self.total_session_ms.load(Ordering::Relaxed);
        let avg_secs = if closed > 0 {
            total_ms as f64 / closed as f64 / 1000.0
        } else {
            0.0
        };

        MetricsSnapshot {
            active_sessions: active,
            peak_sessions: self.peak_sessions.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_closed: closed,
            sessions_cleaned: self.sessions_cleaned.load(Ordering::Relaxed),
            chunks_forwarded: self.chunks_forwarded.load(Ordering::Relaxed),
            transcripts_received: self.transcripts_received.load(Ordering::Relaxed),
            reconnects_succeeded: self.reconnects_succeeded.load(Ordering::Relaxed),
            reconnects_failed: self.reconnects_failed.load(Ordering::Relaxed),
            total_session_secs: total_ms as f64 / 1000.0,
            avg_session_secs: avg_secs,
            estimated_memory_bytes: active
                * (RECONNECT_BUFFER_CAP as u64 + 2 * TRANSCRIPT_CAP_CHARS as u64),
        }
    }
}
