use thiserror::Error;

/// Errors surfaced by the session core.
///
/// Transient upstream classes (`StreamDisconnected`, `RateLimited`,
/// `ServiceUnavailable`, `ServerError`, `NetworkTimeout`) are handled by the
/// retry machinery and only reach callers once their attempt budget is
/// exhausted. The rest are surfaced synchronously to the caller of the
/// operation that triggered them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// Initial handshake with the STT provider failed.
    #[error("connection to STT provider failed: {0}")]
    ConnectionFailed(String),

    /// The upstream stream dropped mid-session.
    #[error("upstream stream disconnected")]
    StreamDisconnected,

    /// The provider rejected us with a rate-limit response.
    #[error("rate limited by STT provider")]
    RateLimited,

    /// The provider reported itself unavailable.
    #[error("STT provider unavailable")]
    ServiceUnavailable,

    /// Generic provider-side failure.
    #[error("STT provider server error: {0}")]
    ServerError(String),

    /// A network operation hit its timeout.
    #[error("network operation timed out")]
    NetworkTimeout,

    /// The registry is at its concurrency ceiling, or audio forwarding
    /// stalled beyond the per-chunk admission timeout.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// No session exists under the given id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Every attempt in the applicable retry schedule failed.
    #[error("reconnection attempts exhausted")]
    RetriesExhausted,

    /// The session has already been torn down.
    #[error("session closed")]
    SessionClosed,

    /// Session creation was given an unrecognized configuration value.
    #[error("invalid session config: {0}")]
    InvalidConfig(String),
}
