//! Main FileRelay server coordination.
//!
//! FileRelay owns the connection registry, rate limiters and metrics, and
//! ties presence broadcasting and routing to connection lifecycle events.

use crate::config::Config;
use crate::error::{RegistryError, Result};
use crate::limits::RateLimits;
use crate::presence;
use crate::registry::{ConnectionRegistry, PeerHandle};
use crate::router::{self, RouteOutcome};
use fileshare_types::{ConnectionId, DeclineNotice, OfferRequest};
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64`; no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total WebSocket connections registered.
    pub connections_total: AtomicU64,
    /// Offers handed to their target's queue.
    pub offers_forwarded: AtomicU64,
    /// Offers answered with `target_unavailable`.
    pub offers_undeliverable: AtomicU64,
    /// Decline notices handed to the offering peer.
    pub offers_declined: AtomicU64,
    /// Total base64 payload bytes forwarded in offers.
    pub payload_bytes_forwarded: AtomicU64,
    /// Presence events enqueued (joined + left, per recipient).
    pub presence_events_sent: AtomicU64,
    /// Presence events that could not be enqueued.
    pub presence_delivery_failures: AtomicU64,
    /// Connections closed because their outbound queue filled up.
    pub forced_disconnects: AtomicU64,
    /// Total rate limit rejections (connection + message + capacity).
    pub rate_limit_hits: AtomicU64,
    /// Total protocol errors (malformed frames, unknown types).
    pub errors_total: AtomicU64,
}

/// Main relay server.
pub struct FileRelay {
    config: Config,
    /// Who is online.
    registry: ConnectionRegistry,
    /// Rate limiters for connections and messages.
    rate_limits: RateLimits,
    /// Operational metrics (counters, gauges).
    metrics: RelayMetrics,
    /// Cancelled once to stop the listener and every session.
    shutdown: CancellationToken,
    started_at: Instant,
}

impl std::fmt::Debug for FileRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRelay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("connections", &self.registry.try_len())
            .finish_non_exhaustive()
    }
}

impl FileRelay {
    /// Create a new FileRelay with the given config.
    pub fn new(config: Config) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        Self {
            config,
            registry: ConnectionRegistry::new(),
            rate_limits,
            metrics: RelayMetrics::default(),
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Time since this relay was constructed.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }

    /// Token that fires when the relay shuts down. Sessions derive their
    /// own disconnect token from it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting connections and close every session.
    pub fn shutdown(&self) {
        tracing::info!("Relay shutdown requested");
        self.shutdown.cancel();
    }

    /// Allocate an identifier for a new connection.
    pub fn allocate_id(&self) -> ConnectionId {
        ConnectionId::random()
    }

    /// Make a connection Active: register it, greet it with its identity
    /// and the current roster, and announce it to everyone else.
    ///
    /// Returns the roster the newcomer was sent.
    pub async fn admit(
        &self,
        handle: PeerHandle,
    ) -> std::result::Result<Vec<ConnectionId>, RegistryError> {
        let metrics = &self.metrics;
        let roster = self
            .registry
            .register_with(handle, |newcomer, others| {
                presence::announce_join(newcomer, others, metrics)
            })
            .await?;

        self.metrics
            .connections_total
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(roster)
    }

    /// Close a connection: unregister it, then announce the departure.
    ///
    /// Idempotent; returns `false` (and broadcasts nothing) if the
    /// connection was already gone.
    pub async fn release(&self, id: &ConnectionId) -> bool {
        let metrics = &self.metrics;
        self.registry
            .unregister_with(id, |remaining| {
                presence::announce_leave(*id, remaining, metrics)
            })
            .await
            .is_some()
    }

    /// Forward a file offer from `sender` to its target.
    pub async fn route_offer(&self, sender: &PeerHandle, request: OfferRequest) -> RouteOutcome {
        router::route_offer(&self.registry, &self.metrics, sender, request).await
    }

    /// Forward a decline notice from `decliner` to the offering peer.
    pub async fn route_decline(
        &self,
        decliner: &PeerHandle,
        notice: DeclineNotice,
    ) -> RouteOutcome {
        router::route_decline(&self.registry, &self.metrics, decliner, notice).await
    }
}

/// Serve HTTP and WebSocket traffic on `listener` until the relay shuts down.
pub async fn serve(relay: Arc<FileRelay>, listener: TcpListener) -> Result<()> {
    let local_addr = listener.local_addr()?;
    tracing::info!(
        "fileshare relay listening on {} (websocket path {})",
        local_addr,
        relay.config().server.ws_path
    );

    let shutdown = relay.shutdown_token();
    let app = crate::http::build_router(relay);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    tracing::info!("fileshare relay stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fileshare_types::ServerMessage;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    fn test_relay() -> FileRelay {
        FileRelay::new(Config::default())
    }

    fn connect(relay: &FileRelay) -> (PeerHandle, mpsc::Receiver<ServerMessage>) {
        PeerHandle::channel(
            relay.allocate_id(),
            relay.config().limits.outbound_queue_capacity,
            relay.shutdown_token().child_token(),
        )
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn admit_and_release() {
        let relay = test_relay();
        let (peer, _rx) = connect(&relay);
        let id = peer.id();

        relay.admit(peer).await.unwrap();
        assert_eq!(relay.connection_count().await, 1);

        assert!(relay.release(&id).await);
        assert_eq!(relay.connection_count().await, 0);
        assert_eq!(relay.metrics().connections_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn admitting_same_handle_twice_is_an_invariant_violation() {
        let relay = test_relay();
        let (peer, _rx) = connect(&relay);

        relay.admit(peer.clone()).await.unwrap();
        assert!(matches!(
            relay.admit(peer).await,
            Err(RegistryError::DuplicateIdentifier { .. })
        ));
        assert_eq!(relay.connection_count().await, 1);
    }

    #[tokio::test]
    async fn rosters_follow_join_order() {
        let relay = test_relay();
        let (a, mut ra) = connect(&relay);
        let (b, mut rb) = connect(&relay);
        let (c, mut rc) = connect(&relay);
        let (a_id, b_id, c_id) = (a.id(), b.id(), c.id());

        assert!(relay.admit(a).await.unwrap().is_empty());
        assert_eq!(relay.admit(b).await.unwrap(), vec![a_id]);
        let mut ab = vec![a_id, b_id];
        ab.sort();
        assert_eq!(relay.admit(c).await.unwrap(), ab);

        assert_eq!(
            drain(&mut ra),
            vec![
                ServerMessage::UserId { user_id: a_id },
                ServerMessage::ConnectedUsers { users: vec![] },
                ServerMessage::UserConnected { user_id: b_id },
                ServerMessage::UserConnected { user_id: c_id },
            ]
        );
        assert_eq!(
            drain(&mut rb),
            vec![
                ServerMessage::UserId { user_id: b_id },
                ServerMessage::ConnectedUsers { users: vec![a_id] },
                ServerMessage::UserConnected { user_id: c_id },
            ]
        );
        assert_eq!(
            drain(&mut rc),
            vec![
                ServerMessage::UserId { user_id: c_id },
                ServerMessage::ConnectedUsers { users: ab },
            ]
        );
    }

    #[tokio::test]
    async fn double_release_broadcasts_once() {
        let relay = test_relay();
        let (a, mut ra) = connect(&relay);
        let (b, _rb) = connect(&relay);
        let b_id = b.id();
        relay.admit(a).await.unwrap();
        relay.admit(b).await.unwrap();
        drain(&mut ra);

        assert!(relay.release(&b_id).await);
        assert!(!relay.release(&b_id).await);

        assert_eq!(
            drain(&mut ra),
            vec![ServerMessage::UserDisconnected { user_id: b_id }]
        );
    }

    #[tokio::test]
    async fn concurrent_joins_and_leaves_stay_consistent() {
        let relay = Arc::new(test_relay());
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let relay = relay.clone();
            tasks.push(tokio::spawn(async move {
                let (peer, rx) = connect(&relay);
                let id = peer.id();
                relay.admit(peer).await.unwrap();
                (id, rx)
            }));
        }
        let mut peers = Vec::new();
        for task in tasks {
            peers.push(task.await.unwrap());
        }

        // Every peer saw each other peer exactly once: either in its roster
        // or as a later join.
        for (id, rx) in peers.iter_mut() {
            let mut seen = Vec::new();
            for msg in drain(rx) {
                match msg {
                    ServerMessage::ConnectedUsers { users } => seen.extend(users),
                    ServerMessage::UserConnected { user_id } => seen.push(user_id),
                    _ => {}
                }
            }
            seen.sort();
            let mut expected: Vec<_> = peers_ids_except(&relay, *id).await;
            expected.sort();
            assert_eq!(seen, expected);
        }
    }

    async fn peers_ids_except(relay: &FileRelay, id: ConnectionId) -> Vec<ConnectionId> {
        relay
            .registry()
            .snapshot()
            .await
            .into_iter()
            .filter(|other| *other != id)
            .collect()
    }

    #[tokio::test]
    async fn shutdown_cancels_session_tokens() {
        let relay = test_relay();
        let (peer, _rx) = connect(&relay);
        relay.admit(peer.clone()).await.unwrap();

        relay.shutdown();
        assert!(peer.is_disconnecting());
    }

    #[test]
    fn relay_is_debug() {
        let relay = test_relay();
        let debug = format!("{:?}", relay);
        assert!(debug.contains("FileRelay"));
    }
}
