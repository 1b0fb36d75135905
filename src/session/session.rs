use super::buffer::ReconnectionBuffer;
use super::config::SessionConfig;
use super::retry::{ConnectContext, ErrorClass, RetryPolicy};
use super::stats::{SessionMetrics, SessionStatus, TranscriptSegment};
use crate::downstream::DownstreamHandler;
use crate::error::SessionError;
use crate::metrics::MetricsAggregator;
use crate::upstream::{UpstreamConnection, UpstreamConnector, UpstreamEvent};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Accumulated finalized transcript is capped to bound memory on
/// pathologically long sessions.
pub const TRANSCRIPT_CAP_CHARS: usize = 50_000;

/// Keepalive cadence preventing provider-side idle timeout.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(8);

/// Per-chunk admission timeout; forwarding that blocks longer fails with
/// `CapacityExceeded`.
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// Safety net awaiting the metadata ack after a stream-close request.
pub const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);

/// Window after a close request during which an upstream close is expected
/// completion rather than an unplanned disconnect. Tuned to the provider's
/// observed gap between acknowledgment events; re-derive when retargeting.
pub const CLOSE_SETTLE_WINDOW: Duration = Duration::from_secs(3);

const CMD_CHANNEL_CAPACITY: usize = 64;

/// Connection state of a session's upstream link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    /// Terminal: automatic recovery has given up.
    Error,
}

enum SessionCommand {
    Audio(Bytes),
    Finish(oneshot::Sender<Result<String, SessionError>>),
    Status(oneshot::Sender<SessionStatus>),
    Transcript(oneshot::Sender<Vec<TranscriptSegment>>),
    Close,
}

/// Handle to one active STT session.
///
/// All session state lives in a spawned task that is the sole consumer of
/// the command channel and the upstream event channel, so no two handlers
/// for the same session ever run concurrently. The handle is cheap to share
/// across the HTTP layer and the registry.
pub struct SttSession {
    session_id: String,
    connection_id: String,
    config: SessionConfig,
    created_at: DateTime<Utc>,
    created_instant: Instant,
    cmd_tx: mpsc::Sender<SessionCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    last_activity_ms: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SttSession {
    /// Create a session and establish its initial upstream connection.
    ///
    /// Returns once the hybrid initial-connection schedule resolves: `Ok`
    /// with the live session, or the single failure report after the
    /// schedule is exhausted.
    pub async fn start(
        session_id: String,
        config: SessionConfig,
        connector: Arc<dyn UpstreamConnector>,
        downstream: Arc<dyn DownstreamHandler>,
        fleet: Arc<MetricsAggregator>,
    ) -> Result<Arc<Self>, SessionError> {
        config.validate()?;

        let connection_id = Uuid::new_v4().to_string();
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (ready_tx, ready_rx) = oneshot::channel();

        let actor = SessionActor {
            session_id: session_id.clone(),
            connection_id: connection_id.clone(),
            created_at: Utc::now(),
            config: config.clone(),
            connector,
            downstream,
            fleet,
            cmd_rx,
            state_tx,
            upstream: None,
            events: None,
            buffer: ReconnectionBuffer::new(),
            accumulated: String::new(),
            accumulated_chars: 0,
            interim: String::new(),
            segments: Vec::new(),
            metrics: SessionMetrics::default(),
            retry: RetryState::default(),
            created_instant: Instant::now(),
            failure_reported: false,
        };
        let task = tokio::spawn(actor.run(ready_tx));

        let session = Arc::new(Self {
            session_id,
            connection_id,
            config,
            created_at: Utc::now(),
            created_instant: Instant::now(),
            cmd_tx,
            state_rx,
            last_activity_ms: AtomicU64::new(0),
            task: Mutex::new(Some(task)),
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(session),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SessionError::ConnectionFailed(
                "session task ended before connecting".to_string(),
            )),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Whether the session task is still running.
    pub fn is_active(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    /// Time since session creation.
    pub fn age(&self) -> Duration {
        self.created_instant.elapsed()
    }

    /// Time since the last audio chunk was admitted.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.created_instant.elapsed().saturating_sub(last)
    }

    fn touch(&self) {
        self.last_activity_ms.store(
            self.created_instant.elapsed().as_millis() as u64,
            Ordering::Relaxed,
        );
    }

    /// Admit one audio chunk into the session.
    ///
    /// While connected the chunk is forwarded immediately; while
    /// reconnecting it is parked in the reconnection buffer. Admission that
    /// blocks longer than [`FORWARD_TIMEOUT`] fails with
    /// `CapacityExceeded` without affecting other sessions.
    pub async fn forward_audio(&self, chunk: Bytes) -> Result<(), SessionError> {
        if self.state() == ConnectionState::Error {
            return Err(SessionError::StreamDisconnected);
        }
        self.touch();
        match self
            .cmd_tx
            .send_timeout(SessionCommand::Audio(chunk), FORWARD_TIMEOUT)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(SessionError::CapacityExceeded(
                "audio forwarding stalled".to_string(),
            )),
            Err(SendTimeoutError::Closed(_)) => Err(SessionError::SessionClosed),
        }
    }

    /// Signal end-of-input and wait for the finalization handshake.
    ///
    /// Returns the full accumulated transcript once the provider
    /// acknowledges the close (or the safety-net timeout fires).
    pub async fn finish(&self) -> Result<String, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Finish(tx))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Status(tx))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    pub async fn transcript(&self) -> Result<Vec<TranscriptSegment>, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Transcript(tx))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Tear the session down, giving the task a bounded grace period to
    /// flush and exit before it is aborted.
    pub async fn close(&self, grace: Duration) {
        let _ = self.cmd_tx.try_send(SessionCommand::Close);
        let task = { self.task.lock().await.take() };
        if let Some(task) = task {
            let abort = task.abort_handle();
            match tokio::time::timeout(grace, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Session {} task panicked: {}", self.session_id, e),
                Err(_) => {
                    warn!(
                        "Session {} did not drain within {:?}, aborting",
                        self.session_id, grace
                    );
                    abort.abort();
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct RetryState {
    retry_count: u32,
    reconnect_attempts: u64,
    last_retry_at: Option<Instant>,
}

impl RetryState {
    /// Reset only on a successful (re)connection.
    fn reset(&mut self) {
        self.retry_count = 0;
        self.last_retry_at = None;
    }
}

/// What the state machine does next after leaving a state loop.
enum Step {
    Connected,
    Reconnect(ErrorClass),
    Failed(SessionError),
    Exit,
}

struct SessionActor {
    session_id: String,
    connection_id: String,
    created_at: DateTime<Utc>,
    config: SessionConfig,
    connector: Arc<dyn UpstreamConnector>,
    downstream: Arc<dyn DownstreamHandler>,
    fleet: Arc<MetricsAggregator>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    state_tx: watch::Sender<ConnectionState>,
    upstream: Option<Box<dyn UpstreamConnection>>,
    events: Option<mpsc::Receiver<UpstreamEvent>>,
    buffer: ReconnectionBuffer,
    accumulated: String,
    accumulated_chars: usize,
    interim: String,
    segments: Vec<TranscriptSegment>,
    metrics: SessionMetrics,
    retry: RetryState,
    created_instant: Instant,
    failure_reported: bool,
}

impl SessionActor {
    async fn run(mut self, ready: oneshot::Sender<Result<(), SessionError>>) {
        match self.establish_initial().await {
            Ok(()) => {
                self.state_tx.send_replace(ConnectionState::Connected);
                info!("Session {} connected to provider", self.session_id);
                let _ = ready.send(Ok(()));
            }
            Err(e) => {
                self.state_tx.send_replace(ConnectionState::Error);
                self.failure_reported = true;
                let _ = ready.send(Err(e));
                return;
            }
        }

        let mut step = Step::Connected;
        loop {
            step = match step {
                Step::Connected => self.run_connected().await,
                Step::Reconnect(class) => self.run_reconnect(class).await,
                Step::Failed(err) => self.run_failed(err).await,
                Step::Exit => break,
            };
        }

        self.teardown_upstream().await;
        debug!("Session {} task exiting", self.session_id);
    }

    /// Initial connection with the hybrid schedule: immediate early
    /// attempts, backing off later, bounded by the 10 s budget.
    async fn establish_initial(&mut self) -> Result<(), SessionError> {
        let context = ConnectContext::Initial;
        let budget = RetryPolicy::budget(context);
        let started = Instant::now();
        let mut class = ErrorClass::Unclassified;
        let mut last_error = String::new();

        loop {
            let attempt = self.retry.retry_count;
            let Some(delay) = RetryPolicy::delay_for(class, context, attempt) else {
                break;
            };
            if started.elapsed() + delay > budget {
                break;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            self.retry.retry_count += 1;
            self.retry.last_retry_at = Some(Instant::now());

            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.connector.connect(&self.config)).await {
                Ok(Ok((conn, events))) => {
                    self.upstream = Some(conn);
                    self.events = Some(events);
                    self.retry.reset();
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!(
                        "Session {} connect attempt {} failed: {}",
                        self.session_id,
                        attempt + 1,
                        e
                    );
                    class = classify(&e);
                    last_error = e.to_string();
                    self.metrics.errors += 1;
                }
                Err(_) => {
                    warn!(
                        "Session {} connect attempt {} timed out",
                        self.session_id,
                        attempt + 1
                    );
                    class = ErrorClass::Network;
                    last_error = "connection attempt timed out".to_string();
                    self.metrics.errors += 1;
                }
            }
        }

        Err(SessionError::ConnectionFailed(format!(
            "{} attempts exhausted: {}",
            self.retry.retry_count, last_error
        )))
    }

    /// Normal operation: forward audio immediately, fold transcript events
    /// into session state, keepalive on a fixed cadence.
    async fn run_connected(&mut self) -> Step {
        let Some(mut events) = self.events.take() else {
            return Step::Reconnect(ErrorClass::Unclassified);
        };

        let mut keepalive = tokio::time::interval_at(
            tokio::time::Instant::now() + KEEPALIVE_INTERVAL,
            KEEPALIVE_INTERVAL,
        );
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(SessionCommand::Close) => return Step::Exit,
                    Some(SessionCommand::Audio(chunk)) => {
                        if let Err(class) = self.forward_chunk(chunk).await {
                            return Step::Reconnect(class);
                        }
                    }
                    Some(SessionCommand::Finish(reply)) => {
                        return self.run_finalizing(&mut events, reply).await;
                    }
                    Some(SessionCommand::Status(tx)) => {
                        let _ = tx.send(self.status_snapshot());
                    }
                    Some(SessionCommand::Transcript(tx)) => {
                        let _ = tx.send(self.transcript_snapshot());
                    }
                },
                ev = events.recv() => match ev {
                    Some(UpstreamEvent::Transcript { text, confidence, is_final }) => {
                        self.handle_transcript(text, confidence, is_final).await;
                    }
                    Some(UpstreamEvent::Metadata { request_id, .. }) => {
                        debug!(
                            "Session {} metadata outside finalization: {}",
                            self.session_id, request_id
                        );
                    }
                    Some(UpstreamEvent::Error { code }) => {
                        self.metrics.errors += 1;
                        warn!("Session {} upstream error: {:?}", self.session_id, code);
                        return Step::Reconnect(code.class());
                    }
                    Some(UpstreamEvent::Closed) | None => {
                        warn!("Session {} upstream closed unexpectedly", self.session_id);
                        return Step::Reconnect(ErrorClass::Unclassified);
                    }
                },
                _ = keepalive.tick() => {
                    if let Some(upstream) = self.upstream.as_mut() {
                        if let Err(e) = upstream.keepalive().await {
                            warn!("Session {} keepalive failed: {}", self.session_id, e);
                            return Step::Reconnect(ErrorClass::Network);
                        }
                    }
                }
            }
        }
    }

    /// Mid-stream reconnection: fast-only schedule under a 1 s budget,
    /// buffering inbound audio for replay the whole time.
    async fn run_reconnect(&mut self, class: ErrorClass) -> Step {
        let outage_started = Instant::now();
        self.state_tx.send_replace(ConnectionState::Disconnected);
        // The failed handle is fully torn down before a replacement exists
        self.teardown_upstream().await;
        warn!("Session {} disconnected mid-stream, reconnecting", self.session_id);

        let context = ConnectContext::Midstream;
        let budget = RetryPolicy::budget(context);

        loop {
            let attempt = self.retry.retry_count;
            let Some(delay) = RetryPolicy::delay_for(class, context, attempt) else {
                break;
            };
            if outage_started.elapsed() + delay > budget {
                break;
            }

            if let Some(step) = self.buffer_while(delay).await {
                self.metrics.downtime_ms += outage_started.elapsed().as_millis() as u64;
                return step;
            }

            self.retry.retry_count += 1;
            self.retry.reconnect_attempts += 1;
            self.retry.last_retry_at = Some(Instant::now());

            let remaining = budget.saturating_sub(outage_started.elapsed());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.connector.connect(&self.config)).await {
                Ok(Ok((conn, events))) => {
                    self.upstream = Some(conn);
                    self.events = Some(events);
                    match self.flush_buffer().await {
                        Ok(flushed) => {
                            self.retry.reset();
                            self.metrics.reconnects_succeeded += 1;
                            self.fleet.on_reconnect(true);
                            self.metrics.downtime_ms +=
                                outage_started.elapsed().as_millis() as u64;
                            self.state_tx.send_replace(ConnectionState::Connected);
                            info!(
                                "Session {} reconnected, {} buffered chunks replayed",
                                self.session_id, flushed
                            );
                            return Step::Connected;
                        }
                        Err(_) => {
                            // Fresh handle died during replay; counts as a
                            // failed attempt, unsent chunks stay queued
                            self.teardown_upstream().await;
                            self.metrics.reconnects_failed += 1;
                            self.fleet.on_reconnect(false);
                            warn!(
                                "Session {} lost new handle during buffer replay",
                                self.session_id
                            );
                        }
                    }
                }
                Ok(Err(e)) => {
                    self.metrics.reconnects_failed += 1;
                    self.fleet.on_reconnect(false);
                    warn!(
                        "Session {} reconnect attempt {} failed: {}",
                        self.session_id,
                        attempt + 1,
                        e
                    );
                }
                Err(_) => {
                    self.metrics.reconnects_failed += 1;
                    self.fleet.on_reconnect(false);
                    warn!(
                        "Session {} reconnect attempt {} timed out",
                        self.session_id,
                        attempt + 1
                    );
                }
            }
        }

        self.metrics.downtime_ms += outage_started.elapsed().as_millis() as u64;
        warn!(
            "Session {} reconnection exhausted after {} attempts over {:?}",
            self.session_id,
            self.retry.reconnect_attempts,
            self.retry
                .last_retry_at
                .map(|t| t.duration_since(outage_started))
                .unwrap_or_default()
        );
        Step::Failed(SessionError::RetriesExhausted)
    }

    /// Sleep for a retry delay while still admitting commands: audio is
    /// parked in the reconnection buffer instead of being dropped.
    async fn buffer_while(&mut self, delay: Duration) -> Option<Step> {
        let deadline = tokio::time::sleep(delay);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return None,
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(SessionCommand::Close) => return Some(Step::Exit),
                    Some(SessionCommand::Audio(chunk)) => {
                        self.metrics.chunks_received += 1;
                        self.buffer_chunk(chunk);
                    }
                    Some(SessionCommand::Finish(reply)) => {
                        // End-of-input during an outage: return what we have
                        let _ = reply.send(Ok(self.accumulated.clone()));
                        return Some(Step::Exit);
                    }
                    Some(SessionCommand::Status(tx)) => {
                        let _ = tx.send(self.status_snapshot());
                    }
                    Some(SessionCommand::Transcript(tx)) => {
                        let _ = tx.send(self.transcript_snapshot());
                    }
                },
            }
        }
    }

    /// Finalization sub-protocol: request stream close, treat upstream
    /// close as expected completion, accept the metadata ack as
    /// authoritative, and never wait past the safety-net timeout.
    async fn run_finalizing(
        &mut self,
        events: &mut mpsc::Receiver<UpstreamEvent>,
        reply: oneshot::Sender<Result<String, SessionError>>,
    ) -> Step {
        info!("Session {} finalizing", self.session_id);

        match self.upstream.as_mut() {
            Some(upstream) => {
                if let Err(e) = upstream.request_close().await {
                    warn!("Session {} close request failed: {}", self.session_id, e);
                    let _ = reply.send(Ok(self.accumulated.clone()));
                    return Step::Exit;
                }
            }
            None => {
                let _ = reply.send(Ok(self.accumulated.clone()));
                return Step::Exit;
            }
        }

        let close_requested = Instant::now();
        let deadline = tokio::time::sleep(FINALIZE_TIMEOUT);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                ev = events.recv() => match ev {
                    Some(UpstreamEvent::Transcript { text, confidence, is_final }) => {
                        self.handle_transcript(text, confidence, is_final).await;
                    }
                    Some(UpstreamEvent::Metadata { request_id, duration_secs }) => {
                        info!(
                            "Session {} finalized (request {}, {:.1}s of audio)",
                            self.session_id, request_id, duration_secs
                        );
                        break;
                    }
                    Some(UpstreamEvent::Error { .. }) | Some(UpstreamEvent::Closed) | None => {
                        if close_requested.elapsed() <= CLOSE_SETTLE_WINDOW {
                            debug!(
                                "Session {} upstream closed after close request",
                                self.session_id
                            );
                        } else {
                            warn!(
                                "Session {} upstream closed before metadata ack",
                                self.session_id
                            );
                        }
                        break;
                    }
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(SessionCommand::Close) => break,
                    Some(SessionCommand::Audio(_)) => {
                        // End of input already signalled; late audio is dropped
                        self.metrics.errors += 1;
                    }
                    Some(SessionCommand::Finish(dup)) => {
                        let _ = dup.send(Err(SessionError::SessionClosed));
                    }
                    Some(SessionCommand::Status(tx)) => {
                        let _ = tx.send(self.status_snapshot());
                    }
                    Some(SessionCommand::Transcript(tx)) => {
                        let _ = tx.send(self.transcript_snapshot());
                    }
                },
                _ = &mut deadline => {
                    warn!(
                        "Session {} finalization timed out awaiting metadata ack",
                        self.session_id
                    );
                    break;
                }
            }
        }

        let _ = reply.send(Ok(self.accumulated.clone()));
        Step::Exit
    }

    /// Terminal error state: report the failure exactly once, then answer
    /// queries until the registry removes the session.
    async fn run_failed(&mut self, err: SessionError) -> Step {
        self.state_tx.send_replace(ConnectionState::Error);
        self.teardown_upstream().await;
        if !self.failure_reported {
            self.failure_reported = true;
            error!("Session {} failed: {}", self.session_id, err);
            self.downstream
                .on_session_failed(&self.session_id, &err)
                .await;
        }

        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                SessionCommand::Close => break,
                SessionCommand::Audio(_) => {
                    self.metrics.errors += 1;
                }
                SessionCommand::Finish(reply) => {
                    let _ = reply.send(Err(err.clone()));
                }
                SessionCommand::Status(tx) => {
                    let _ = tx.send(self.status_snapshot());
                }
                SessionCommand::Transcript(tx) => {
                    let _ = tx.send(self.transcript_snapshot());
                }
            }
        }
        Step::Exit
    }

    /// Forward one chunk to the live handle; on failure the chunk moves to
    /// the reconnection buffer so nothing is lost or reordered.
    async fn forward_chunk(&mut self, chunk: Bytes) -> Result<(), ErrorClass> {
        self.metrics.chunks_received += 1;
        let Some(upstream) = self.upstream.as_mut() else {
            self.buffer_chunk(chunk);
            return Err(ErrorClass::Unclassified);
        };
        match tokio::time::timeout(FORWARD_TIMEOUT, upstream.send_audio(chunk.clone())).await {
            Ok(Ok(())) => {
                self.metrics.chunks_forwarded += 1;
                self.fleet.on_chunks_forwarded(1);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("Session {} audio send failed: {}", self.session_id, e);
                self.metrics.errors += 1;
                self.buffer_chunk(chunk);
                Err(ErrorClass::Network)
            }
            Err(_) => {
                warn!("Session {} audio send timed out", self.session_id);
                self.metrics.errors += 1;
                self.buffer_chunk(chunk);
                Err(ErrorClass::Network)
            }
        }
    }

    fn buffer_chunk(&mut self, chunk: Bytes) {
        let evicted = self.buffer.push(chunk);
        self.metrics.chunks_buffered += 1;
        if evicted > 0 {
            // Non-fatal overflow: oldest audio dropped, newest retained
            self.metrics.buffer_evictions += evicted;
            warn!(
                "Session {} reconnection buffer full, dropped {} oldest chunks",
                self.session_id, evicted
            );
        }
    }

    /// Replay everything buffered during the outage, in arrival order, to
    /// the freshly installed handle.
    async fn flush_buffer(&mut self) -> Result<usize, ErrorClass> {
        let chunks = self.buffer.drain();
        let total = chunks.len();
        let mut iter = chunks.into_iter();
        loop {
            let Some(chunk) = iter.next() else {
                return Ok(total);
            };
            let Some(upstream) = self.upstream.as_mut() else {
                self.requeue(chunk, iter);
                return Err(ErrorClass::Unclassified);
            };
            match tokio::time::timeout(FORWARD_TIMEOUT, upstream.send_audio(chunk.clone())).await {
                Ok(Ok(())) => {
                    self.metrics.chunks_forwarded += 1;
                    self.fleet.on_chunks_forwarded(1);
                }
                Ok(Err(_)) | Err(_) => {
                    self.requeue(chunk, iter);
                    return Err(ErrorClass::Network);
                }
            }
        }
    }

    fn requeue(&mut self, failed: Bytes, rest: impl Iterator<Item = Bytes>) {
        self.buffer.push(failed);
        for chunk in rest {
            self.buffer.push(chunk);
        }
    }

    async fn handle_transcript(&mut self, text: String, confidence: Option<f32>, is_final: bool) {
        self.metrics.transcripts_received += 1;
        self.fleet.on_transcript();
        if is_final {
            self.append_final(&text);
            self.interim.clear();
            self.segments.push(TranscriptSegment {
                text: text.clone(),
                timestamp: Utc::now(),
                confidence,
                is_final: true,
            });
            self.downstream
                .on_final_transcript(&self.session_id, &text)
                .await;
        } else {
            // Interim hypothesis is replaced wholesale on each update
            self.interim = text;
        }
    }

    /// Append finalized text, honoring the transcript cap. The separator
    /// between segments counts against the cap too.
    fn append_final(&mut self, text: &str) {
        let mut remaining = TRANSCRIPT_CAP_CHARS.saturating_sub(self.accumulated_chars);
        let sep = usize::from(!self.accumulated.is_empty());
        if remaining <= sep {
            return;
        }
        remaining -= sep;
        let take: String = text.chars().take(remaining).collect();
        if take.is_empty() {
            return;
        }
        if sep == 1 {
            self.accumulated.push(' ');
        }
        self.accumulated_chars += sep + take.chars().count();
        self.accumulated.push_str(&take);
    }

    /// Tear down the current handle before any replacement is installed.
    /// Dropping the event receiver discards any late events with it.
    async fn teardown_upstream(&mut self) {
        if let Some(mut upstream) = self.upstream.take() {
            upstream.abort().await;
        }
        self.events = None;
    }

    fn status_snapshot(&self) -> SessionStatus {
        let state = *self.state_tx.borrow();
        SessionStatus {
            session_id: self.session_id.clone(),
            connection_id: self.connection_id.clone(),
            state,
            is_reconnecting: state == ConnectionState::Disconnected,
            created_at: self.created_at,
            duration_secs: self.created_instant.elapsed().as_secs_f64(),
            buffered_bytes: self.buffer.len_bytes(),
            interim_transcript: self.interim.clone(),
            transcript_chars: self.accumulated_chars,
            metrics: self.metrics.clone(),
        }
    }

    fn transcript_snapshot(&self) -> Vec<TranscriptSegment> {
        let mut segments = self.segments.clone();
        if !self.interim.is_empty() {
            segments.push(TranscriptSegment {
                text: self.interim.clone(),
                timestamp: Utc::now(),
                confidence: None,
                is_final: false,
            });
        }
        segments
    }
}

/// Map a connector error onto a retry class when it carries one.
fn classify(err: &anyhow::Error) -> ErrorClass {
    match err.downcast_ref::<SessionError>() {
        Some(SessionError::RateLimited) => ErrorClass::RateLimited,
        Some(SessionError::ServiceUnavailable) => ErrorClass::ServiceUnavailable,
        Some(SessionError::ServerError(_)) => ErrorClass::Server,
        Some(SessionError::NetworkTimeout) => ErrorClass::Network,
        _ => ErrorClass::Unclassified,
    }
}
