use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use voice_gateway::registry::RegistryLimits;
use voice_gateway::upstream::WsConnector;
use voice_gateway::{create_router, AppState, Config, LoggingDownstream, SessionRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cfg = Config::load("config/voice-gateway")?;

    info!("voice-gateway v0.1.0");
    info!("Loaded config: {}", cfg.service.name);
    info!("STT provider: {}", cfg.stt.url);

    let connector = Arc::new(WsConnector::new(cfg.stt.url, cfg.stt.api_key));
    let downstream = Arc::new(LoggingDownstream);
    let registry = SessionRegistry::with_limits(
        connector,
        downstream,
        RegistryLimits {
            max_sessions: cfg.limits.max_sessions,
            ..RegistryLimits::default()
        },
    );

    let sweeper = registry.spawn_sweeper();

    let app = create_router(AppState::new(Arc::clone(&registry)));
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down, draining sessions");
    sweeper.abort();
    registry.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
