// Integration tests for the session registry
//
// These tests cover the concurrency ceiling, lookup and removal semantics,
// the idle/age sweep, and the shutdown drain.

mod common;

use anyhow::Result;
use bytes::Bytes;
use common::{MockConnector, MockDownstream, SentItem};
use std::sync::Arc;
use std::time::Duration;
use voice_gateway::session::SessionConfig;
use voice_gateway::upstream::UpstreamEvent;
use voice_gateway::{RegistryLimits, SessionError, SessionRegistry};

fn test_limits() -> RegistryLimits {
    RegistryLimits {
        max_sessions: 4,
        shutdown_grace: Duration::from_secs(1),
        ..RegistryLimits::default()
    }
}

fn test_registry(connector: Arc<MockConnector>, limits: RegistryLimits) -> Arc<SessionRegistry> {
    let (downstream, _finals, _failures) = MockDownstream::new();
    SessionRegistry::with_limits(connector, downstream, limits)
}

#[tokio::test]
async fn test_create_get_and_close() -> Result<()> {
    let connector = MockConnector::new();
    let registry = test_registry(Arc::clone(&connector), test_limits());

    let id = registry.create_session(SessionConfig::default()).await?;
    assert!(id.starts_with("session-"));
    assert_eq!(registry.session_count().await, 1);

    let session = registry.get(&id).await?;
    assert_eq!(session.session_id(), id);

    registry.close_session(&id).await?;
    assert_eq!(registry.session_count().await, 0);

    // Closing again is an error, not a panic
    assert!(matches!(
        registry.close_session(&id).await,
        Err(SessionError::SessionNotFound(_))
    ));

    let snapshot = registry.metrics().snapshot();
    assert_eq!(snapshot.sessions_created, 1);
    assert_eq!(snapshot.sessions_closed, 1);
    assert_eq!(snapshot.active_sessions, 0);
    Ok(())
}

#[tokio::test]
async fn test_capacity_ceiling_rejects_new_sessions() -> Result<()> {
    let connector = MockConnector::new();
    let limits = RegistryLimits {
        max_sessions: 2,
        ..test_limits()
    };
    let registry = test_registry(Arc::clone(&connector), limits);

    let first = registry.create_session(SessionConfig::default()).await?;
    registry.create_session(SessionConfig::default()).await?;

    let res = registry.create_session(SessionConfig::default()).await;
    assert!(matches!(res, Err(SessionError::CapacityExceeded(_))));
    assert_eq!(registry.session_count().await, 2);

    // Freeing a slot lets creation succeed again
    registry.close_session(&first).await?;
    registry.create_session(SessionConfig::default()).await?;
    assert_eq!(registry.session_count().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_connecting() -> Result<()> {
    let connector = MockConnector::new();
    let registry = test_registry(Arc::clone(&connector), test_limits());

    let res = registry
        .create_session(SessionConfig {
            sample_rate: 11_025,
            ..SessionConfig::default()
        })
        .await;
    assert!(matches!(res, Err(SessionError::InvalidConfig(_))));
    assert_eq!(connector.connects(), 0);
    Ok(())
}

#[tokio::test]
async fn test_forward_audio_routes_to_the_right_session() -> Result<()> {
    let connector = MockConnector::new();
    let registry = test_registry(Arc::clone(&connector), test_limits());

    let id = registry.create_session(SessionConfig::default()).await?;
    let link = connector.link(0).await;

    registry.forward_audio(&id, Bytes::from_static(b"pcm")).await?;
    assert_eq!(link.recv_audio().await, Some(Bytes::from_static(b"pcm")));

    assert!(matches!(
        registry
            .forward_audio("session-missing", Bytes::from_static(b"pcm"))
            .await,
        Err(SessionError::SessionNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_finish_session_returns_transcript_and_frees_slot() -> Result<()> {
    let connector = MockConnector::new();
    let registry = test_registry(Arc::clone(&connector), test_limits());

    let id = registry.create_session(SessionConfig::default()).await?;
    let link = connector.link(0).await;

    link.events
        .send(UpstreamEvent::Transcript {
            text: "done deal".to_string(),
            confidence: Some(0.9),
            is_final: true,
        })
        .await?;

    let finishing = {
        let registry = Arc::clone(&registry);
        let id = id.clone();
        tokio::spawn(async move { registry.finish_session(&id).await })
    };
    assert_eq!(link.recv_sent().await, Some(SentItem::CloseRequest));
    link.events
        .send(UpstreamEvent::Metadata {
            request_id: "req-9".to_string(),
            duration_secs: 3.0,
        })
        .await?;

    let transcript = finishing.await??;
    assert_eq!(transcript, "done deal");
    assert_eq!(registry.session_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_sweep_reclaims_idle_sessions() -> Result<()> {
    let connector = MockConnector::new();
    let limits = RegistryLimits {
        idle_timeout: Duration::from_millis(50),
        ..test_limits()
    };
    let registry = test_registry(Arc::clone(&connector), limits);

    registry.create_session(SessionConfig::default()).await?;
    tokio::time::sleep(Duration::from_millis(150)).await;

    registry.sweep().await;
    assert_eq!(registry.session_count().await, 0);

    let snapshot = registry.metrics().snapshot();
    assert_eq!(snapshot.sessions_cleaned, 1);
    assert_eq!(snapshot.sessions_closed, 1);
    assert_eq!(snapshot.active_sessions, 0);
    Ok(())
}

#[tokio::test]
async fn test_sweep_reclaims_sessions_past_max_age() -> Result<()> {
    let connector = MockConnector::new();
    let limits = RegistryLimits {
        max_session_age: Duration::from_millis(50),
        ..test_limits()
    };
    let registry = test_registry(Arc::clone(&connector), limits);

    let id = registry.create_session(SessionConfig::default()).await?;
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Recent activity does not save a session past the age cap
    registry.forward_audio(&id, Bytes::from_static(b"pcm")).await?;

    registry.sweep().await;
    assert_eq!(registry.session_count().await, 0);

    let snapshot = registry.metrics().snapshot();
    assert_eq!(snapshot.sessions_cleaned, 1);
    assert_eq!(snapshot.active_sessions, 0);
    Ok(())
}

#[tokio::test]
async fn test_sweep_reclaims_terminally_failed_sessions() -> Result<()> {
    let connector = MockConnector::new();
    let registry = test_registry(Arc::clone(&connector), test_limits());

    let id = registry.create_session(SessionConfig::default()).await?;
    let link = connector.link(0).await;

    // Kill the stream and refuse recovery so the session lands in error
    connector.refuse_further_connects();
    link.events.send(UpstreamEvent::Closed).await?;

    let session = registry.get(&id).await?;
    assert!(
        common::wait_for(
            || session.state() == voice_gateway::ConnectionState::Error,
            Duration::from_secs(5),
        )
        .await
    );

    registry.sweep().await;
    assert_eq!(registry.session_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_sweep_leaves_healthy_sessions_alone() -> Result<()> {
    let connector = MockConnector::new();
    let registry = test_registry(Arc::clone(&connector), test_limits());

    let id = registry.create_session(SessionConfig::default()).await?;
    registry.forward_audio(&id, Bytes::from_static(b"pcm")).await?;

    registry.sweep().await;
    assert_eq!(registry.session_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_drains_every_session() -> Result<()> {
    let connector = MockConnector::new();
    let registry = test_registry(Arc::clone(&connector), test_limits());

    registry.create_session(SessionConfig::default()).await?;
    registry.create_session(SessionConfig::default()).await?;
    registry.create_session(SessionConfig::default()).await?;
    assert_eq!(registry.session_count().await, 3);

    registry.shutdown().await;
    assert_eq!(registry.session_count().await, 0);

    let snapshot = registry.metrics().snapshot();
    assert_eq!(snapshot.sessions_created, 3);
    assert_eq!(snapshot.sessions_closed, 3);
    assert_eq!(snapshot.active_sessions, 0);
    assert_eq!(snapshot.peak_sessions, 3);
    Ok(())
}
