use crate::session::{ErrorClass, SessionConfig};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Inbound events from the provider connection.
///
/// The session state machine is the sole consumer; events for a torn-down
/// handle are discarded with the handle's receiver.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// A transcription result, interim or finalized.
    Transcript {
        text: String,
        confidence: Option<f32>,
        is_final: bool,
    },

    /// Stream metadata. Treated as the authoritative finalization ack.
    Metadata {
        request_id: String,
        duration_secs: f64,
    },

    /// A classified provider-side failure.
    Error { code: UpstreamErrorCode },

    /// The provider closed the stream.
    Closed,
}

/// Provider error classification as reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorCode {
    RateLimited,
    ServiceUnavailable,
    ServerError,
    NetworkTimeout,
    Unknown,
}

impl UpstreamErrorCode {
    /// Map the wire code onto the retry scheduling class.
    pub fn class(self) -> ErrorClass {
        match self {
            Self::RateLimited => ErrorClass::RateLimited,
            Self::ServiceUnavailable => ErrorClass::ServiceUnavailable,
            Self::ServerError => ErrorClass::Server,
            Self::NetworkTimeout => ErrorClass::Network,
            Self::Unknown => ErrorClass::Unclassified,
        }
    }
}

/// One live streaming connection to the STT provider.
///
/// A session owns exactly one of these at a time; on reconnect the old
/// handle is fully torn down before a replacement is installed.
#[async_trait]
pub trait UpstreamConnection: Send {
    /// Forward one chunk of raw audio.
    async fn send_audio(&mut self, chunk: Bytes) -> Result<()>;

    /// Periodic no-op preventing provider-side idle timeout.
    async fn keepalive(&mut self) -> Result<()>;

    /// Ask the provider to finalize the stream. Events keep flowing until
    /// the metadata ack or close arrives.
    async fn request_close(&mut self) -> Result<()>;

    /// Tear the link down immediately, discarding in-flight data.
    async fn abort(&mut self);
}

/// Factory for upstream connections.
///
/// Returns the exclusively-owned connection handle plus the event channel
/// the provider feeds. Implemented by the WebSocket adapter in production
/// and by scripted mocks in tests.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(
        &self,
        config: &SessionConfig,
    ) -> Result<(Box<dyn UpstreamConnection>, mpsc::Receiver<UpstreamEvent>)>;
}
