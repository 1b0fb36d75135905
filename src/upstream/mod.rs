//! Upstream STT provider boundary
//!
//! The session core consumes the provider's event surface only: a streaming
//! connection it can send audio to, and a channel of transcript/metadata/
//! error/close events coming back. `WsConnector` is the thin production
//! adapter; tests substitute scripted connectors.

mod connection;
mod ws;

pub use connection::{UpstreamConnection, UpstreamConnector, UpstreamErrorCode, UpstreamEvent};
pub use ws::WsConnector;
