//! Session Server
//!
//! This binary:
//! - Connects to Redis (session and marker storage)
//! - Connects to Redpanda and runs the session invalidator
//! - Serves the session HTTP API and Prometheus metrics
//! - Shuts everything down on Ctrl+C or SIGTERM
//!
//! # Usage
//!
//! ```bash
//! docker compose up -d
//! cargo run --bin sessionward
//! ```

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use sessionward_auth::{RedisBackend, SessionInvalidator, SessionManager};
use sessionward_core::environment::SystemClock;
use sessionward_core::event_bus::EventBus;
use sessionward_redpanda::RedpandaEventBus;
use sessionward_server::{HttpUserDirectory, ServerConfig};
use sessionward_web::{SessionState, router};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sessionward=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    info!(
        redpanda = %config.redpanda_brokers,
        directory = %config.user_directory_url,
        topics = ?config.invalidator.topics,
        "Configuration loaded"
    );

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    let backend = Arc::new(RedisBackend::new(&config.redis_url).await?);
    backend.ping().await?;

    let directory = Arc::new(HttpUserDirectory::new(
        &config.user_directory_url,
        config.user_directory_timeout,
    )?);

    let mut bus = RedpandaEventBus::builder().brokers(&config.redpanda_brokers);
    if let Some(group) = &config.consumer_group {
        bus = bus.consumer_group(group);
    }
    let event_bus: Arc<dyn EventBus> = Arc::new(bus.build()?);

    let manager = SessionManager::new(backend, Arc::new(SystemClock), config.session.clone());

    let (shutdown_tx, _) = broadcast::channel(1);

    let invalidator = SessionInvalidator::new(
        manager.clone(),
        Arc::clone(&directory),
        event_bus,
        config.invalidator.clone(),
    )
    .with_shutdown(shutdown_tx.subscribe())
    .spawn();
    info!("Session invalidator started");

    let metrics_app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || std::future::ready(prometheus.render())),
    );
    let metrics_listener = tokio::net::TcpListener::bind(config.metrics_addr()).await?;
    let mut metrics_shutdown = shutdown_tx.subscribe();
    let metrics_server = tokio::spawn(async move {
        axum::serve(metrics_listener, metrics_app)
            .with_graceful_shutdown(async move {
                let _ = metrics_shutdown.recv().await;
            })
            .await
    });
    info!(addr = %config.metrics_addr(), "Metrics listening");

    let state = SessionState::new(manager, directory, config.cookies.clone());
    let listener = tokio::net::TcpListener::bind(config.http_addr()).await?;
    info!(addr = %config.http_addr(), "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, initiating graceful shutdown...");
    let _ = shutdown_tx.send(());

    let timeout = Duration::from_secs(10);
    match tokio::time::timeout(timeout, invalidator).await {
        Ok(Ok(())) => info!("Session invalidator stopped"),
        Ok(Err(e)) => warn!(error = %e, "Session invalidator task failed"),
        Err(_) => warn!("Session invalidator shutdown timed out"),
    }
    match tokio::time::timeout(timeout, metrics_server).await {
        Ok(Ok(Ok(()))) => info!("Metrics server stopped"),
        Ok(Ok(Err(e))) => warn!(error = %e, "Metrics server failed"),
        Ok(Err(e)) => warn!(error = %e, "Metrics server task failed"),
        Err(_) => warn!("Metrics server shutdown timed out"),
    }

    info!("Graceful shutdown complete");
    Ok(())
}

/// Returns when the process receives SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
