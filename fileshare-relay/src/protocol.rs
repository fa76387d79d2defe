//! WebSocket upgrade handler for the relay path.
//!
//! Admission checks run before the upgrade so rejected clients get a plain
//! HTTP status instead of a half-open socket.

use crate::server::FileRelay;
use crate::session::Session;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Accept a WebSocket connection and hand it to a new [`Session`].
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(relay): Extension<Arc<FileRelay>>,
    remote: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let remote = remote.map(|ConnectInfo(addr)| addr);

    if let Err(status) = admit_upgrade(&relay, remote).await {
        return status.into_response();
    }

    let max_message_size = relay.config().limits.max_message_size;
    ws.max_message_size(max_message_size)
        .max_frame_size(max_message_size)
        .on_upgrade(move |socket| async move {
            let session = Session::new(relay, remote);
            if let Err(e) = session.run(socket).await {
                tracing::warn!("Session error: {}", e);
            }
        })
}

/// Connection rate limit and capacity checks.
async fn admit_upgrade(relay: &FileRelay, remote: Option<SocketAddr>) -> Result<(), StatusCode> {
    if relay.shutdown_token().is_cancelled() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    // Prevent connection flooding from a single address
    if let Some(addr) = remote {
        if let Err(e) = relay.rate_limits().check_connection(&addr.ip()) {
            tracing::warn!("Connection rate limited for {}: {}", addr, e);
            relay.metrics().rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    let active = relay.connection_count().await;
    if let Err(e) = relay.rate_limits().check_capacity(active) {
        tracing::warn!("Rejecting connection from {:?}: {}", remote, e);
        relay.metrics().rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(())
}
