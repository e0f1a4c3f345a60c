//! Health endpoints for the Room Controller.
//!
//! - `GET /health` - liveness probe (is the process running?)
//! - `GET /ready` - readiness probe (is the signaling endpoint accepting?)
//!
//! Readiness flips on once the actor system is up and the listener is
//! bound, and flips off first thing during graceful shutdown so load
//! balancers stop routing new clients before live sessions drain.
//!
//! The `/metrics` endpoint is served separately by the Prometheus exporter.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness / readiness state for the server.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    /// Mark the server ready to accept signaling traffic.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the server not ready (draining).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Check if the process is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Check if the server is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_live_but_not_ready() {
        let state = HealthState::new();
        assert!(state.is_live());
        assert!(!state.is_ready());
    }

    #[test]
    fn test_readiness_toggles() {
        let state = HealthState::new();
        state.set_ready();
        assert!(state.is_ready());
        state.set_not_ready();
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_readiness_handler_tracks_state() {
        let state = Arc::new(HealthState::new());
        assert_eq!(
            readiness_handler(State(Arc::clone(&state))).await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.set_ready();
        assert_eq!(
            readiness_handler(State(state)).await,
            StatusCode::OK
        );
    }
}
