//! WebSocket connection to a fileshare relay.

use anyhow::{Context, Result};
use fileshare_types::{ClientMessage, ConnectionId, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Default relay endpoint.
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8000/ws/socket-server/";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An open session with the relay.
pub struct RelayConnection {
    ws: Socket,
    id: ConnectionId,
    roster: Vec<ConnectionId>,
}

impl RelayConnection {
    /// Connect and read the greeting (`user_id` then `connected_users`).
    pub async fn connect(url: &str) -> Result<Self> {
        let (mut ws, _) = connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to relay at {}", url))?;
        tracing::debug!("Connected to {}", url);

        let id = match read_message(&mut ws).await? {
            Some(ServerMessage::UserId { user_id }) => user_id,
            Some(other) => anyhow::bail!("Expected user_id from relay, got {}", other.kind()),
            None => anyhow::bail!("Relay closed the connection before greeting"),
        };
        let roster = match read_message(&mut ws).await? {
            Some(ServerMessage::ConnectedUsers { users }) => users,
            Some(other) => {
                anyhow::bail!("Expected connected_users from relay, got {}", other.kind())
            }
            None => anyhow::bail!("Relay closed the connection before greeting"),
        };

        Ok(Self { ws, id, roster })
    }

    /// Identifier the relay assigned to this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Peers that were online when this connection was admitted.
    pub fn roster(&self) -> &[ConnectionId] {
        &self.roster
    }

    /// Send one client frame.
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = message.to_json()?;
        self.ws
            .send(Message::Text(json))
            .await
            .context("Failed to send to relay")
    }

    /// Next relay message, or `None` once the relay closes the connection.
    ///
    /// Frames that do not decode are logged and skipped.
    pub async fn next_message(&mut self) -> Result<Option<ServerMessage>> {
        read_message(&mut self.ws).await
    }

    /// Close the connection politely.
    pub async fn close(mut self) -> Result<()> {
        self.ws
            .close(None)
            .await
            .context("Failed to close relay connection")
    }
}

async fn read_message(ws: &mut Socket) -> Result<Option<ServerMessage>> {
    while let Some(frame) = ws.next().await {
        match frame.context("Relay connection failed")? {
            Message::Text(text) => match ServerMessage::from_json(&text) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => tracing::warn!("Ignoring unreadable relay frame: {}", e),
            },
            Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}
