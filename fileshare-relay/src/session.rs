//! Per-connection session management.
//!
//! Each upgraded WebSocket gets a Session that registers it, runs the
//! writer and reader halves, and unregisters it when either half ends.

use crate::error::RelayError;
use crate::registry::PeerHandle;
use crate::server::FileRelay;
use axum::extract::ws::{Message, WebSocket};
use fileshare_types::{ClientMessage, ConnectionId, ServerMessage};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Session state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Upgraded but not yet registered; invisible to other peers.
    Connecting,
    /// Registered; takes part in presence and routing.
    Active {
        /// Identifier bound to this connection for its whole life.
        id: ConnectionId,
    },
    /// Unregistered. Terminal.
    Closed,
}

/// What the reader loop does after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// A per-connection session.
pub struct Session {
    relay: Arc<FileRelay>,
    remote: Option<SocketAddr>,
    state: SessionState,
}

impl Session {
    /// Create a new session for an upgraded connection.
    pub fn new(relay: Arc<FileRelay>, remote: Option<SocketAddr>) -> Self {
        Self {
            relay,
            remote,
            state: SessionState::Connecting,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session until the transport closes, the peer is forcibly
    /// disconnected, or the relay shuts down.
    pub async fn run(mut self, socket: WebSocket) -> Result<(), RelayError> {
        let disconnect = self.relay.shutdown_token().child_token();
        let (peer, outbound) = PeerHandle::channel(
            self.relay.allocate_id(),
            self.relay.config().limits.outbound_queue_capacity,
            disconnect.clone(),
        );
        let id = peer.id();

        // Greeting is enqueued here, before the writer starts draining.
        if let Err(e) = self.relay.admit(peer.clone()).await {
            tracing::error!("Refusing connection from {:?}: {}", self.remote, e);
            self.state = SessionState::Closed;
            return Err(e.into());
        }
        self.state = SessionState::Active { id };
        tracing::info!("Connection {} active (remote {:?})", id, self.remote);

        let (sink, stream) = socket.split();
        let writer = write_loop(sink, outbound, disconnect.clone());
        let reader = self.read_loop(stream, &peer);

        tokio::select! {
            _ = writer => tracing::debug!("Writer for {} ended", id),
            _ = reader => tracing::debug!("Reader for {} ended", id),
        }

        if disconnect.is_cancelled() && !self.relay.shutdown_token().is_cancelled() {
            tracing::warn!("Connection {} was forcibly disconnected", id);
            self.relay
                .metrics()
                .forced_disconnects
                .fetch_add(1, Ordering::Relaxed);
        }
        disconnect.cancel();

        self.relay.release(&id).await;
        self.state = SessionState::Closed;
        tracing::info!("Connection {} closed", id);
        Ok(())
    }

    /// Decode client frames until the transport closes or errors.
    async fn read_loop<S>(&self, mut stream: S, peer: &PeerHandle)
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        while let Some(frame) = stream.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!("Transport error on {}: {}", peer.id(), e);
                    break;
                }
            };
            if self.handle_frame(peer, frame).await == Flow::Close {
                break;
            }
        }
    }

    async fn handle_frame(&self, peer: &PeerHandle, frame: Message) -> Flow {
        match frame {
            Message::Text(text) => {
                self.handle_text(peer, &text).await;
                Flow::Continue
            }
            Message::Binary(_) => {
                self.reject_frame(peer, "binary frames are not supported".to_string());
                Flow::Continue
            }
            Message::Ping(_) | Message::Pong(_) => Flow::Continue,
            Message::Close(_) => {
                tracing::debug!("Connection {} sent close", peer.id());
                Flow::Close
            }
        }
    }

    async fn handle_text(&self, peer: &PeerHandle, text: &str) {
        if let Err(e) = self.relay.rate_limits().check_message(&peer.id()) {
            tracing::warn!("Message rate limited for {}: {}", peer.id(), e);
            self.relay
                .metrics()
                .rate_limit_hits
                .fetch_add(1, Ordering::Relaxed);
            notify(peer, e.to_string());
            return;
        }

        let message = match ClientMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                self.reject_frame(peer, format!("invalid message: {}", e));
                return;
            }
        };

        match message {
            ClientMessage::FileOffer(request) => {
                self.relay.route_offer(peer, request).await;
            }
            ClientMessage::OfferDeclined(notice) => {
                self.relay.route_decline(peer, notice).await;
            }
        }
    }

    fn reject_frame(&self, peer: &PeerHandle, reason: String) {
        tracing::debug!("Rejected frame from {}: {}", peer.id(), reason);
        self.relay
            .metrics()
            .errors_total
            .fetch_add(1, Ordering::Relaxed);
        notify(peer, reason);
    }
}

fn notify(peer: &PeerHandle, message: String) {
    if let Err(e) = peer.deliver(ServerMessage::Error { message }) {
        tracing::debug!("Could not send error notice to {}: {}", peer.id(), e);
    }
}

/// Drain the outbound queue into the socket. Sends a close frame when the
/// connection is told to disconnect.
async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<ServerMessage>,
    disconnect: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        let message = tokio::select! {
            biased;
            _ = disconnect.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize {}: {}", message.kind(), e);
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(json)).await {
            tracing::debug!("Socket write failed: {}", e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LimitsConfig};
    use fileshare_types::FileOffer;
    use futures_util::stream;

    fn relay_with(limits: LimitsConfig) -> Arc<FileRelay> {
        Arc::new(FileRelay::new(Config {
            limits,
            ..Config::default()
        }))
    }

    async fn active(relay: &Arc<FileRelay>) -> (PeerHandle, mpsc::Receiver<ServerMessage>) {
        let (peer, mut rx) = PeerHandle::channel(
            relay.allocate_id(),
            relay.config().limits.outbound_queue_capacity,
            relay.shutdown_token().child_token(),
        );
        relay.admit(peer.clone()).await.unwrap();
        while rx.try_recv().is_ok() {}
        (peer, rx)
    }

    fn text(json: &str) -> Message {
        Message::Text(json.to_string())
    }

    #[test]
    fn new_session_is_connecting() {
        let session = Session::new(relay_with(LimitsConfig::default()), None);
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn offer_is_routed_with_session_identity() {
        let relay = relay_with(LimitsConfig::default());
        let session = Session::new(relay.clone(), None);
        let (sender, _sender_rx) = active(&relay).await;
        let (target, mut target_rx) = active(&relay).await;

        let frame = text(&format!(
            r#"{{"target_user_id":"{}","file_name":"a.txt","file":"aGk=","sender_id":"{}"}}"#,
            target.id(),
            ConnectionId::random()
        ));
        assert_eq!(session.handle_frame(&sender, frame).await, Flow::Continue);

        assert_eq!(
            target_rx.try_recv().unwrap(),
            ServerMessage::FileOffer(FileOffer {
                sender_id: sender.id(),
                file_name: "a.txt".into(),
                file: "aGk=".into(),
            })
        );
    }

    #[tokio::test]
    async fn malformed_frame_gets_error_and_keeps_connection() {
        let relay = relay_with(LimitsConfig::default());
        let session = Session::new(relay.clone(), None);
        let (peer, mut rx) = active(&relay).await;

        let flow = session.handle_frame(&peer, text("{not json")).await;
        assert_eq!(flow, Flow::Continue);
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Error { .. }));
        assert_eq!(relay.metrics().errors_total.load(Ordering::Relaxed), 1);
        assert!(relay.registry().lookup(&peer.id()).await.is_some());
    }

    #[tokio::test]
    async fn unknown_type_gets_error() {
        let relay = relay_with(LimitsConfig::default());
        let session = Session::new(relay.clone(), None);
        let (peer, mut rx) = active(&relay).await;

        session
            .handle_frame(&peer, text(r#"{"type":"chat","text":"hi"}"#))
            .await;
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn binary_frame_gets_error() {
        let relay = relay_with(LimitsConfig::default());
        let session = Session::new(relay.clone(), None);
        let (peer, mut rx) = active(&relay).await;

        let flow = session
            .handle_frame(&peer, Message::Binary(vec![1, 2, 3]))
            .await;
        assert_eq!(flow, Flow::Continue);
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn close_and_ping_frames() {
        let relay = relay_with(LimitsConfig::default());
        let session = Session::new(relay.clone(), None);
        let (peer, mut rx) = active(&relay).await;

        assert_eq!(
            session.handle_frame(&peer, Message::Ping(vec![])).await,
            Flow::Continue
        );
        assert_eq!(
            session.handle_frame(&peer, Message::Close(None)).await,
            Flow::Close
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rate_limited_frames_are_dropped() {
        let relay = relay_with(LimitsConfig {
            messages_per_minute: 1,
            ..LimitsConfig::default()
        });
        let session = Session::new(relay.clone(), None);
        let (sender, mut sender_rx) = active(&relay).await;
        let (target, mut target_rx) = active(&relay).await;
        // Discard the sender's notice that the target joined.
        while sender_rx.try_recv().is_ok() {}

        let offer = format!(
            r#"{{"target_user_id":"{}","file_name":"a.txt","file":"aGk="}}"#,
            target.id()
        );
        session.handle_frame(&sender, text(&offer)).await;
        session.handle_frame(&sender, text(&offer)).await;

        assert!(matches!(
            target_rx.try_recv().unwrap(),
            ServerMessage::FileOffer(_)
        ));
        assert!(target_rx.try_recv().is_err());
        assert!(matches!(
            sender_rx.try_recv().unwrap(),
            ServerMessage::Error { .. }
        ));
        assert_eq!(relay.metrics().rate_limit_hits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn read_loop_stops_at_close() {
        let relay = relay_with(LimitsConfig::default());
        let session = Session::new(relay.clone(), None);
        let (peer, mut rx) = active(&relay).await;

        let frames = stream::iter(vec![
            Ok::<_, axum::Error>(Message::Binary(vec![0])),
            Ok(Message::Close(None)),
            Ok(Message::Binary(vec![0])),
        ]);
        session.read_loop(frames, &peer).await;

        // Only the frame before the close was answered.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn write_loop_drains_queue_in_order() {
        let (tx, rx) = mpsc::channel(4);
        let id = ConnectionId::random();
        tx.send(ServerMessage::UserId { user_id: id }).await.unwrap();
        tx.send(ServerMessage::ConnectedUsers { users: vec![] })
            .await
            .unwrap();
        drop(tx);

        let mut written: Vec<Message> = Vec::new();
        write_loop(&mut written, rx, CancellationToken::new()).await;

        assert_eq!(written.len(), 2);
        assert!(matches!(&written[0], Message::Text(t) if t.contains("\"user_id\"")));
        assert!(matches!(&written[1], Message::Text(t) if t.contains("connected_users")));
    }

    #[tokio::test]
    async fn write_loop_sends_close_on_disconnect() {
        let (_tx, rx) = mpsc::channel::<ServerMessage>(4);
        let token = CancellationToken::new();
        token.cancel();

        let mut written: Vec<Message> = Vec::new();
        write_loop(&mut written, rx, token).await;

        assert_eq!(written.len(), 1);
        assert!(matches!(written[0], Message::Close(None)));
    }
}
