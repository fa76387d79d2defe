//! Directed message routing.
//!
//! The sender is always the handle of the session the frame arrived on;
//! nothing in the client payload can change it. Targets are re-resolved
//! through the registry on every call and the handle is dropped as soon as
//! the forward attempt returns.

use crate::registry::{ConnectionRegistry, PeerHandle};
use crate::server::RelayMetrics;
use fileshare_types::{
    ConnectionId, DeclineNotice, FileOffer, OfferDeclined, OfferRequest, ServerMessage,
};
use std::sync::atomic::Ordering;

/// Result of a single forward attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the target's outbound queue.
    Delivered,
    /// Target unknown, gone, or not draining its queue.
    TargetUnavailable,
}

/// Forward a file offer from `sender` to the target it names.
///
/// On failure the sender alone receives `target_unavailable`.
pub async fn route_offer(
    registry: &ConnectionRegistry,
    metrics: &RelayMetrics,
    sender: &PeerHandle,
    request: OfferRequest,
) -> RouteOutcome {
    let OfferRequest {
        target_user_id,
        file_name,
        file,
    } = request;

    let Some(target) = resolve(registry, &target_user_id).await else {
        tracing::debug!(
            "Offer of {:?} from {} to unknown target {:?}",
            file_name,
            sender.id(),
            target_user_id
        );
        return reject(sender, metrics, target_user_id);
    };

    let payload_len = file.len() as u64;
    let offer = ServerMessage::FileOffer(FileOffer {
        sender_id: sender.id(),
        file_name,
        file,
    });

    match target.deliver(offer) {
        Ok(()) => {
            tracing::debug!(
                "Forwarded offer from {} to {} ({} bytes)",
                sender.id(),
                target.id(),
                payload_len
            );
            metrics.offers_forwarded.fetch_add(1, Ordering::Relaxed);
            metrics
                .payload_bytes_forwarded
                .fetch_add(payload_len, Ordering::Relaxed);
            RouteOutcome::Delivered
        }
        Err(e) => {
            tracing::debug!("Offer to {} failed: {}", target.id(), e);
            reject(sender, metrics, target_user_id)
        }
    }
}

/// Forward a decline notice from `decliner` to the peer that made the offer.
///
/// A missing peer is not reported back; the decliner has nothing to act on.
pub async fn route_decline(
    registry: &ConnectionRegistry,
    metrics: &RelayMetrics,
    decliner: &PeerHandle,
    notice: DeclineNotice,
) -> RouteOutcome {
    let Some(target) = resolve(registry, &notice.target_user_id).await else {
        return RouteOutcome::TargetUnavailable;
    };

    let declined = ServerMessage::OfferDeclined(OfferDeclined {
        sender_id: decliner.id(),
        file_name: notice.file_name,
    });
    match target.deliver(declined) {
        Ok(()) => {
            metrics.offers_declined.fetch_add(1, Ordering::Relaxed);
            RouteOutcome::Delivered
        }
        Err(e) => {
            tracing::debug!("Decline notice to {} failed: {}", target.id(), e);
            RouteOutcome::TargetUnavailable
        }
    }
}

/// Parse and look up a client-supplied target. Unparseable ids are simply
/// not registered.
async fn resolve(registry: &ConnectionRegistry, raw: &str) -> Option<PeerHandle> {
    let id: ConnectionId = raw.parse().ok()?;
    registry.lookup(&id).await
}

fn reject(sender: &PeerHandle, metrics: &RelayMetrics, target_user_id: String) -> RouteOutcome {
    metrics.offers_undeliverable.fetch_add(1, Ordering::Relaxed);
    if let Err(e) = sender.deliver(ServerMessage::TargetUnavailable { target_user_id }) {
        tracing::debug!("Could not notify {} of failed offer: {}", sender.id(), e);
    }
    RouteOutcome::TargetUnavailable
}
