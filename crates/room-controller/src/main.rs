//! Room Controller
//!
//! Stateful WebSocket signaling server for multi-party WebRTC rooms.
//!
//! # Servers
//!
//! One listener carries everything (default: 0.0.0.0:8080):
//! - `GET /ws` - WebSocket signaling endpoint
//! - `POST /upload`, `GET /sessions/:id/files`, `GET /stats` - media API
//! - `GET /health`, `GET /ready` - probes
//! - `GET /metrics` - Prometheus exposition
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Build the storage collaborator and session manager
//! 4. Initialize the actor system (`RoomSupervisorHandle`)
//! 5. Bind the listener and start serving
//! 6. Wait for shutdown signal, drain rooms, stop

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use room_controller::actors::RoomSupervisorHandle;
use room_controller::config::Config;
use room_controller::http::api_router;
use room_controller::observability::{health_router, HealthState};
use room_controller::registry::ConnectionRegistry;
use room_controller::session::SessionManager;
use room_controller::state::AppState;
use room_controller::storage::{ArtifactStore, FsArtifactStore};
use room_controller::transport::ws_router;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long room drain may take during graceful shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Room Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        anyhow::anyhow!(e)
    })?;

    info!(
        server_id = %config.server_id,
        bind_address = %config.bind_address,
        room_capacity = config.room_capacity,
        max_connections = config.max_connections,
        finalize_timeout_seconds = config.finalize_timeout_seconds,
        sessions_path = %config.sessions_path.display(),
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus metrics recorder")?;
    info!("Prometheus metrics recorder initialized");

    // Initialize health state
    let health_state = Arc::new(HealthState::new());

    // Storage collaborator and session lifecycle manager
    let store: Arc<dyn ArtifactStore> =
        Arc::new(FsArtifactStore::new(config.sessions_path.clone()));
    let sessions = Arc::new(SessionManager::new(Arc::clone(&store)));

    // Connection registry with the global ceiling
    let registry = Arc::new(ConnectionRegistry::new(config.max_connections));

    // Initialize actor system
    let supervisor = RoomSupervisorHandle::new(
        config.server_id.clone(),
        config.room_capacity,
        config.finalize_timeout(),
        Arc::clone(&registry),
        Arc::clone(&sessions),
        Arc::clone(&store),
    );
    info!("Actor system initialized");

    // Child token so the HTTP server stops before rooms drain
    let shutdown_token = supervisor.child_token();

    let app_state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        registry,
        supervisor: supervisor.clone(),
        sessions,
        store,
    });

    // Metrics endpoint served by the Prometheus exporter
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = ws_router(Arc::clone(&app_state))
        .merge(api_router(Arc::clone(&app_state)))
        .merge(health_router(Arc::clone(&health_state)))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http());

    // Bind before spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!(addr = %config.bind_address, "Listener bound successfully");

    let server_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_shutdown_token.cancelled().await;
            info!("Server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Server failed");
        }
    });

    health_state.set_ready();
    info!("Room Controller running - press Ctrl+C to shutdown");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Stop routing new clients here first
    health_state.set_not_ready();
    shutdown_token.cancel();

    // Drain rooms (flushes in-flight recordings), then the root token
    // cancels remaining connections
    if let Err(e) = supervisor.shutdown(SHUTDOWN_DEADLINE).await {
        warn!(error = %e, "Actor system shutdown error");
    }

    info!("Room Controller shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
