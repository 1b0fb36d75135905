use super::connection::{UpstreamConnection, UpstreamConnector, UpstreamErrorCode, UpstreamEvent};
use crate::session::SessionConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Control messages sent to the provider.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ProviderRequest {
    Start {
        sample_rate: u32,
        language: String,
        model: String,
    },
    KeepAlive,
    CloseStream,
}

/// Messages received from the provider.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ProviderMessage {
    Transcript {
        text: String,
        confidence: Option<f32>,
        #[serde(default)]
        is_final: bool,
    },
    Metadata {
        request_id: String,
        #[serde(default)]
        duration: f64,
    },
    Error {
        code: UpstreamErrorCode,
    },
}

impl From<ProviderMessage> for UpstreamEvent {
    fn from(msg: ProviderMessage) -> Self {
        match msg {
            ProviderMessage::Transcript {
                text,
                confidence,
                is_final,
            } => UpstreamEvent::Transcript {
                text,
                confidence,
                is_final,
            },
            ProviderMessage::Metadata {
                request_id,
                duration,
            } => UpstreamEvent::Metadata {
                request_id,
                duration_secs: duration,
            },
            ProviderMessage::Error { code } => UpstreamEvent::Error { code },
        }
    }
}

/// WebSocket connector to the STT provider endpoint.
///
/// Thin adapter only: audio goes out as binary frames, control messages as
/// JSON text, inbound text frames are parsed into [`UpstreamEvent`]s. All
/// lifecycle decisions live in the session state machine.
pub struct WsConnector {
    url: String,
    api_key: String,
}

impl WsConnector {
    pub fn new(url: String, api_key: String) -> Self {
        Self { url, api_key }
    }
}

#[async_trait]
impl UpstreamConnector for WsConnector {
    async fn connect(
        &self,
        config: &SessionConfig,
    ) -> Result<(Box<dyn UpstreamConnection>, mpsc::Receiver<UpstreamEvent>)> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .context("Invalid provider URL")?;
        request.headers_mut().insert(
            "Authorization",
            format!("Token {}", self.api_key)
                .parse()
                .context("Invalid API key header value")?,
        );

        info!("Connecting to STT provider at {}", self.url);

        let (ws_stream, _) = connect_async(request)
            .await
            .context("WebSocket connect to STT provider failed")?;

        let (mut write, read) = ws_stream.split();

        // Declare the stream parameters before any audio flows
        let start = serde_json::to_string(&ProviderRequest::Start {
            sample_rate: config.sample_rate,
            language: config.language.clone(),
            model: config.model.clone(),
        })?;
        write
            .send(Message::Text(start))
            .await
            .context("Failed to send stream start message")?;

        let (event_tx, event_rx) = mpsc::channel(64);
        tokio::spawn(read_loop(read, event_tx));

        Ok((Box::new(WsUpstream { write }), event_rx))
    }
}

/// Pump inbound frames into the session's event channel until the socket
/// closes or the session drops its receiver.
async fn read_loop(mut read: SplitStream<WsStream>, tx: mpsc::Sender<UpstreamEvent>) {
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ProviderMessage>(&text) {
                Ok(parsed) => {
                    if tx.send(parsed.into()).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("Unparseable provider message: {}", e);
                }
            },
            Ok(Message::Close(frame)) => {
                info!("Provider closed the stream: {:?}", frame);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Provider socket error: {}", e);
                let _ = tx
                    .send(UpstreamEvent::Error {
                        code: UpstreamErrorCode::NetworkTimeout,
                    })
                    .await;
                break;
            }
        }
    }
    let _ = tx.send(UpstreamEvent::Closed).await;
}

struct WsUpstream {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl UpstreamConnection for WsUpstream {
    async fn send_audio(&mut self, chunk: Bytes) -> Result<()> {
        self.write
            .send(Message::Binary(chunk.to_vec()))
            .await
            .context("Failed to send audio frame")
    }

    async fn keepalive(&mut self) -> Result<()> {
        let msg = serde_json::to_string(&ProviderRequest::KeepAlive)?;
        self.write
            .send(Message::Text(msg))
            .await
            .context("Failed to send keepalive")
    }

    async fn request_close(&mut self) -> Result<()> {
        let msg = serde_json::to_string(&ProviderRequest::CloseStream)?;
        self.write
            .send(Message::Text(msg))
            .await
            .context("Failed to send stream close request")
    }

    async fn abort(&mut self) {
        let _ = self.write.close().await;
    }
}
