//! Presence broadcasting.
//!
//! Both announcements run inside the registry's write lock (see
//! [`ConnectionRegistry::register_with`](crate::registry::ConnectionRegistry::register_with)),
//! so a join and a concurrent leave are always seen in one consistent
//! order. Delivery is best-effort: a peer whose queue is closed or full is
//! skipped, and a full queue triggers that peer's own disconnect.

use crate::registry::{Members, PeerHandle};
use crate::server::RelayMetrics;
use fileshare_types::{ConnectionId, ServerMessage};
use std::sync::atomic::Ordering;

/// Greet a newcomer and tell everyone else it joined.
///
/// `others` are the members registered before the newcomer. The newcomer
/// receives its own `user_id` followed by the roster of `others`; each
/// member of `others` receives one `user_connected`. Returns the roster.
pub fn announce_join(
    newcomer: &PeerHandle,
    others: &Members,
    metrics: &RelayMetrics,
) -> Vec<ConnectionId> {
    let mut roster: Vec<ConnectionId> = others.keys().copied().collect();
    roster.sort();

    let greeting = [
        ServerMessage::UserId {
            user_id: newcomer.id(),
        },
        ServerMessage::ConnectedUsers {
            users: roster.clone(),
        },
    ];
    for message in greeting {
        if let Err(e) = newcomer.deliver(message) {
            tracing::debug!("Failed to greet {}: {}", newcomer.id(), e);
            metrics
                .presence_delivery_failures
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    let joined = ServerMessage::UserConnected {
        user_id: newcomer.id(),
    };
    let sent = broadcast(others.values(), &joined, metrics);

    tracing::debug!(
        "Announced join of {} to {}/{} peers",
        newcomer.id(),
        sent,
        others.len()
    );
    roster
}

/// Tell the remaining members that `departed` left.
pub fn announce_leave(departed: ConnectionId, remaining: &Members, metrics: &RelayMetrics) {
    let left = ServerMessage::UserDisconnected { user_id: departed };
    let sent = broadcast(remaining.values(), &left, metrics);

    tracing::debug!(
        "Announced departure of {} to {}/{} peers",
        departed,
        sent,
        remaining.len()
    );
}

/// Enqueue `event` on every peer, at most once each. Returns how many
/// peers accepted it.
fn broadcast<'a>(
    peers: impl Iterator<Item = &'a PeerHandle>,
    event: &ServerMessage,
    metrics: &RelayMetrics,
) -> usize {
    let mut sent = 0;
    for peer in peers {
        match peer.deliver(event.clone()) {
            Ok(()) => sent += 1,
            Err(e) => {
                tracing::debug!("Presence {} to {} failed: {}", event.kind(), peer.id(), e);
                metrics
                    .presence_delivery_failures
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    metrics
        .presence_events_sent
        .fetch_add(sent as u64, Ordering::Relaxed);
    sent
}
