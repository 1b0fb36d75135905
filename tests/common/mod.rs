// Shared test support: scripted upstream connector and channel-backed
// downstream handler for driving sessions without a real provider.
#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use voice_gateway::downstream::DownstreamHandler;
use voice_gateway::error::SessionError;
use voice_gateway::session::SessionConfig;
use voice_gateway::upstream::{UpstreamConnection, UpstreamConnector, UpstreamEvent};

/// What the session wrote to a mock link, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SentItem {
    Audio(Bytes),
    KeepAlive,
    CloseRequest,
}

/// Test-side view of one established mock connection.
pub struct MockLink {
    /// Inject provider events into the session
    pub events: mpsc::Sender<UpstreamEvent>,
    sent: Mutex<mpsc::UnboundedReceiver<SentItem>>,
    /// Flip to make subsequent sends on this link fail
    pub fail_sends: Arc<AtomicBool>,
}

impl MockLink {
    /// Next item the session sent, keepalives included. The generous
    /// timeout also covers tests running under a paused clock.
    pub async fn recv_sent(&self) -> Option<SentItem> {
        let mut rx = self.sent.lock().await;
        tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next audio chunk, skipping keepalives.
    pub async fn recv_audio(&self) -> Option<Bytes> {
        loop {
            match self.recv_sent().await {
                Some(SentItem::Audio(chunk)) => return Some(chunk),
                Some(SentItem::KeepAlive) => continue,
                Some(SentItem::CloseRequest) | None => return None,
            }
        }
    }

    /// True if nothing (beyond keepalives) arrives within the window.
    pub async fn assert_quiet(&self, window: Duration) -> bool {
        let mut rx = self.sent.lock().await;
        loop {
            match tokio::time::timeout(window, rx.recv()).await {
                Ok(Some(SentItem::KeepAlive)) => continue,
                Ok(Some(_)) => return false,
                Ok(None) | Err(_) => return true,
            }
        }
    }
}

/// Scripted connector: fails a configured number of connect attempts, then
/// hands out fresh mock links the test can drive.
pub struct MockConnector {
    fail_remaining: AtomicUsize,
    always_fail: AtomicBool,
    pub connect_count: AtomicUsize,
    links: Mutex<Vec<Arc<MockLink>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Self::failing_first(0)
    }

    pub fn failing_first(n: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_remaining: AtomicUsize::new(n),
            always_fail: AtomicBool::new(false),
            connect_count: AtomicUsize::new(0),
            links: Mutex::new(Vec::new()),
        })
    }

    pub fn always_failing() -> Arc<Self> {
        let connector = Self::new();
        connector.always_fail.store(true, Ordering::SeqCst);
        connector
    }

    /// Refuse all future connect attempts (e.g. after a first success).
    pub fn refuse_further_connects(&self) {
        self.always_fail.store(true, Ordering::SeqCst);
    }

    /// Fail the next `n` connect attempts, then succeed again.
    pub fn fail_next_connects(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Wait until the `index`-th connection has been established.
    pub async fn link(&self, index: usize) -> Arc<MockLink> {
        for _ in 0..1000 {
            if let Some(link) = self.links.lock().await.get(index) {
                return Arc::clone(link);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("mock link {} was never established", index);
    }
}

#[async_trait]
impl UpstreamConnector for MockConnector {
    async fn connect(
        &self,
        _config: &SessionConfig,
    ) -> Result<(Box<dyn UpstreamConnection>, mpsc::Receiver<UpstreamEvent>)> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        if self.always_fail.load(Ordering::SeqCst) {
            bail!("mock connect refused");
        }
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            bail!("mock connect failed");
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let fail_sends = Arc::new(AtomicBool::new(false));
        let link = Arc::new(MockLink {
            events: event_tx,
            sent: Mutex::new(sent_rx),
            fail_sends: Arc::clone(&fail_sends),
        });
        self.links.lock().await.push(link);

        Ok((
            Box::new(MockUpstream {
                sent: sent_tx,
                fail_sends,
            }),
            event_rx,
        ))
    }
}

struct MockUpstream {
    sent: mpsc::UnboundedSender<SentItem>,
    fail_sends: Arc<AtomicBool>,
}

#[async_trait]
impl UpstreamConnection for MockUpstream {
    async fn send_audio(&mut self, chunk: Bytes) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            bail!("mock send failed");
        }
        self.sent
            .send(SentItem::Audio(chunk))
            .map_err(|_| anyhow!("link receiver dropped"))
    }

    async fn keepalive(&mut self) -> Result<()> {
        self.sent
            .send(SentItem::KeepAlive)
            .map_err(|_| anyhow!("link receiver dropped"))
    }

    async fn request_close(&mut self) -> Result<()> {
        self.sent
            .send(SentItem::CloseRequest)
            .map_err(|_| anyhow!("link receiver dropped"))
    }

    async fn abort(&mut self) {}
}

/// Downstream handler that forwards callbacks into test channels.
pub struct MockDownstream {
    finals: mpsc::UnboundedSender<(String, String)>,
    failures: mpsc::UnboundedSender<(String, SessionError)>,
}

impl MockDownstream {
    #[allow(clippy::type_complexity)]
    pub fn new() -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<(String, String)>,
        mpsc::UnboundedReceiver<(String, SessionError)>,
    ) {
        let (finals_tx, finals_rx) = mpsc::unbounded_channel();
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                finals: finals_tx,
                failures: failures_tx,
            }),
            finals_rx,
            failures_rx,
        )
    }
}

#[async_trait]
impl DownstreamHandler for MockDownstream {
    async fn on_final_transcript(&self, session_id: &str, text: &str) {
        let _ = self
            .finals
            .send((session_id.to_string(), text.to_string()));
    }

    async fn on_session_failed(&self, session_id: &str, err: &SessionError) {
        let _ = self.failures.send((session_id.to_string(), err.clone()));
    }
}

/// Poll a condition until it holds or the deadline passes.
pub async fn wait_for<F: Fn() -> bool>(cond: F, deadline: Duration) -> bool {
    let steps = (deadline.as_millis() / 10).max(1);
    for _ in 0..steps {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
