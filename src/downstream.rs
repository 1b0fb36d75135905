use crate::error::SessionError;
use async_trait::async_trait;
use tracing::{error, info};

/// Consumer of finalized utterances (the LLM/TTS stage).
///
/// `on_final_transcript` is invoked once per finalized utterance, in
/// provider order. `on_session_failed` fires exactly once when a session
/// exhausts its reconnection budget and ends in the error state.
#[async_trait]
pub trait DownstreamHandler: Send + Sync {
    async fn on_final_transcript(&self, session_id: &str, text: &str);

    async fn on_session_failed(&self, session_id: &str, err: &SessionError);
}

/// Log-only downstream, used until a real response stage is wired in.
pub struct LoggingDownstream;

#[async_trait]
impl DownstreamHandler for LoggingDownstream {
    async fn on_final_transcript(&self, session_id: &str, text: &str) {
        info!("Final transcript for {}: {}", session_id, text);
    }

    async fn on_session_failed(&self, session_id: &str, err: &SessionError) {
        error!("Session {} failed: {}", session_id, err);
    }
}
