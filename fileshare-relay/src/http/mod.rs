//! HTTP endpoints for fileshare-relay.
//!
//! Provides health checks, metrics, and the WebSocket relay path.

pub mod health;
mod metrics;

use crate::protocol::ws_handler;
use crate::server::FileRelay;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<FileRelay>) -> Router {
    let ws_path = relay.config().server.ws_path.clone();
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .route(&ws_path, get(ws_handler))
        .layer(Extension(relay))
}
