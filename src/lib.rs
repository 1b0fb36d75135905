pub mod config;
pub mod downstream;
pub mod error;
pub mod http;
pub mod metrics;
pub mod registry;
pub mod session;
pub mod upstream;

pub use config::Config;
pub use downstream::{DownstreamHandler, LoggingDownstream};
pub use error::SessionError;
pub use http::{create_router, AppState};
pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use registry::{RegistryLimits, SessionRegistry};
pub use session::{
    ConnectionState, ReconnectionBuffer, RetryPolicy, SessionConfig, SessionMetrics,
    SessionStatus, SttSession, TranscriptSegment,
};
pub use upstream::{UpstreamConnection, UpstreamConnector, UpstreamErrorCode, UpstreamEvent, WsConnector};
