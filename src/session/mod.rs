//! STT session lifecycle management
//!
//! One `SttSession` per active client connection, owning:
//! - the upstream provider handle (replaced wholesale on reconnect)
//! - transcript accumulation (interim + finalized segments)
//! - the reconnection buffer holding audio during outages
//! - retry scheduling, keepalive, and the finalization handshake

mod buffer;
mod config;
mod retry;
mod session;
mod stats;

pub use buffer::{ReconnectionBuffer, RECONNECT_BUFFER_CAP};
pub use config::SessionConfig;
pub use retry::{ConnectContext, ErrorClass, RetryPolicy, INITIAL_BUDGET, MIDSTREAM_BUDGET};
pub use session::{
    ConnectionState, SttSession, CLOSE_SETTLE_WINDOW, FINALIZE_TIMEOUT, FORWARD_TIMEOUT,
    KEEPALIVE_INTERVAL, TRANSCRIPT_CAP_CHARS,
};
pub use stats::{SessionMetrics, SessionStatus, TranscriptSegment};
