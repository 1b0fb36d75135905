use crate::downstream::DownstreamHandler;
use crate::error::SessionError;
use crate::metrics::MetricsAggregator;
use crate::session::{ConnectionState, SessionConfig, SttSession};
use crate::upstream::UpstreamConnector;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Global concurrency ceiling.
pub const MAX_SESSIONS: usize = 1000;

/// A session with no audio for this long is reclaimed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Hard cap on session lifetime.
pub const MAX_SESSION_AGE: Duration = Duration::from_secs(60 * 60);

/// Cadence of the idle/age sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Per-session grace period when draining on shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Tunable limits, overridable for tests.
#[derive(Debug, Clone)]
pub struct RegistryLimits {
    pub max_sessions: usize,
    pub idle_timeout: Duration,
    pub max_session_age: Duration,
    pub sweep_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            max_sessions: MAX_SESSIONS,
            idle_timeout: IDLE_TIMEOUT,
            max_session_age: MAX_SESSION_AGE,
            sweep_interval: SWEEP_INTERVAL,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }
}

/// Authoritative map of active sessions.
///
/// The registry is the only writer of the session map: inserts happen in
/// `create_session`, removals in `remove`/sweep/drain. It is constructed
/// explicitly and passed to whatever boundary creates sessions; there is no
/// global singleton.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SttSession>>>,
    connector: Arc<dyn UpstreamConnector>,
    downstream: Arc<dyn DownstreamHandler>,
    metrics: Arc<MetricsAggregator>,
    limits: RegistryLimits,
}

impl SessionRegistry {
    pub fn new(
        connector: Arc<dyn UpstreamConnector>,
        downstream: Arc<dyn DownstreamHandler>,
    ) -> Arc<Self> {
        Self::with_limits(connector, downstream, RegistryLimits::default())
    }

    pub fn with_limits(
        connector: Arc<dyn UpstreamConnector>,
        downstream: Arc<dyn DownstreamHandler>,
        limits: RegistryLimits,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            connector,
            downstream,
            metrics: Arc::new(MetricsAggregator::new()),
            limits,
        })
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Create a session and wait for its initial connection to resolve.
    ///
    /// Fails with `CapacityExceeded` at the concurrency ceiling and with
    /// the connection failure once the initial retry schedule is exhausted.
    pub async fn create_session(&self, config: SessionConfig) -> Result<String, SessionError> {
        config.validate()?;

        {
            let sessions = self.sessions.read().await;
            if sessions.len() >= self.limits.max_sessions {
                return Err(SessionError::CapacityExceeded(format!(
                    "{} active sessions",
                    sessions.len()
                )));
            }
        }

        let session_id = format!("session-{}", Uuid::new_v4());
        info!("Creating session {}", session_id);

        let session = SttSession::start(
            session_id.clone(),
            config,
            Arc::clone(&self.connector),
            Arc::clone(&self.downstream),
            Arc::clone(&self.metrics),
        )
        .await?;

        {
            let mut sessions = self.sessions.write().await;
            // Re-check under the write lock; creations race only here
            if sessions.len() >= self.limits.max_sessions {
                drop(sessions);
                session.close(self.limits.shutdown_grace).await;
                return Err(SessionError::CapacityExceeded(
                    "session limit reached during creation".to_string(),
                ));
            }
            sessions.insert(session_id.clone(), session);
        }
        self.metrics.on_session_created();

        Ok(session_id)
    }

    pub async fn get(&self, session_id: &str) -> Result<Arc<SttSession>, SessionError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))
    }

    /// Detach a session for teardown. Idempotent: absent ids return `None`.
    pub async fn remove(&self, session_id: &str) -> Option<Arc<SttSession>> {
        self.sessions.write().await.remove(session_id)
    }

    /// Route one audio chunk to its session.
    pub async fn forward_audio(&self, session_id: &str, chunk: Bytes) -> Result<(), SessionError> {
        let session = self.get(session_id).await?;
        session.forward_audio(chunk).await
    }

    /// Finalize a session: flush the stream upstream, return the full
    /// transcript, and release the slot.
    pub async fn finish_session(&self, session_id: &str) -> Result<String, SessionError> {
        let session = self.get(session_id).await?;
        let transcript = session.finish().await;
        if let Some(session) = self.remove(session_id).await {
            session.close(self.limits.shutdown_grace).await;
            self.metrics.on_session_closed(session.age());
        }
        transcript
    }

    /// Close and remove a session without finalizing.
    pub async fn close_session(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self
            .remove(session_id)
            .await
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        session.close(self.limits.shutdown_grace).await;
        self.metrics.on_session_closed(session.age());
        info!("Session {} closed", session_id);
        Ok(())
    }

    /// Spawn the recurring idle/age sweep. The returned handle is aborted
    /// by the owner on shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.limits.sweep_interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }

    /// Remove sessions that are idle past the inactivity timeout, older
    /// than the maximum session age, terminally failed, or already gone.
    pub async fn sweep(&self) {
        let stale: Vec<Arc<SttSession>> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| {
                    s.idle_for() > self.limits.idle_timeout
                        || s.age() > self.limits.max_session_age
                        || s.state() == ConnectionState::Error
                        || !s.is_active()
                })
                .cloned()
                .collect()
        };

        if stale.is_empty() {
            return;
        }
        info!("Sweeping {} stale sessions", stale.len());

        for session in stale {
            let id = session.session_id().to_string();
            if self.remove(&id).await.is_some() {
                warn!(
                    "Session {} reclaimed (idle {:?}, age {:?})",
                    id,
                    session.idle_for(),
                    session.age()
                );
                session.close(self.limits.shutdown_grace).await;
                self.metrics.on_session_cleaned(session.age());
            }
        }
    }

    /// Drain every session concurrently, each with the shutdown grace
    /// period, then account for them.
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<SttSession>> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, s)| s).collect()
        };
        if drained.is_empty() {
            return;
        }
        info!("Draining {} sessions for shutdown", drained.len());

        let grace = self.limits.shutdown_grace;
        futures::future::join_all(drained.iter().map(|s| s.close(grace))).await;

        for session in drained {
            self.metrics.on_session_closed(session.age());
        }
    }
}
