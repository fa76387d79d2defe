//! Protocol messages for the fileshare relay.
//!
//! Every frame is a JSON text message tagged with a `type` field. The relay
//! never looks inside `file`: it is the base64 text the sending client
//! produced and is forwarded byte-for-byte.

use serde::{Deserialize, Serialize};

use crate::{ConnectionId, ProtocolError, ProtocolResult};

/// Messages sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Identity assigned to this connection, sent once at connect.
    UserId {
        /// The assigned identifier.
        user_id: ConnectionId,
    },
    /// Peers that were already connected when this connection joined.
    ConnectedUsers {
        /// Roster snapshot, never containing the receiver itself.
        users: Vec<ConnectionId>,
    },
    /// A peer joined.
    UserConnected {
        /// The peer that joined.
        user_id: ConnectionId,
    },
    /// A peer left.
    UserDisconnected {
        /// The peer that left.
        user_id: ConnectionId,
    },
    /// A file offered by another peer.
    FileOffer(FileOffer),
    /// An offer this connection sent could not be delivered.
    TargetUnavailable {
        /// The target exactly as the client addressed it.
        target_user_id: String,
    },
    /// A peer declined an offer this connection sent.
    OfferDeclined(OfferDeclined),
    /// The relay could not process a frame from this connection.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ServerMessage {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(ProtocolError::Serialization)
    }

    /// Parse a JSON text frame received from the relay.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }

    /// Wire tag of this message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserId { .. } => "user_id",
            Self::ConnectedUsers { .. } => "connected_users",
            Self::UserConnected { .. } => "user_connected",
            Self::UserDisconnected { .. } => "user_disconnected",
            Self::FileOffer(_) => "file_offer",
            Self::TargetUnavailable { .. } => "target_unavailable",
            Self::OfferDeclined(_) => "offer_declined",
            Self::Error { .. } => "error",
        }
    }
}

/// A forwarded file offer, delivered to the addressed target only.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOffer {
    /// Identity of the connection that sent the offer (set by the relay).
    pub sender_id: ConnectionId,
    /// File name as the sender supplied it.
    pub file_name: String,
    /// Base64-encoded file contents (opaque to the relay).
    pub file: String,
}

impl std::fmt::Debug for FileOffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileOffer")
            .field("sender_id", &self.sender_id)
            .field("file_name", &self.file_name)
            .field("file_len", &self.file.len())
            .finish()
    }
}

/// Notice that the peer named in `sender_id` declined an offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferDeclined {
    /// The peer that declined (set by the relay).
    pub sender_id: ConnectionId,
    /// Name of the declined file.
    pub file_name: String,
}

/// Messages sent from a client to the relay.
///
/// The offer frame predates the `type` tag, so a frame without one is read
/// as [`ClientMessage::FileOffer`]. Unknown fields are ignored; in
/// particular any `sender_id` a client embeds has no effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask the relay to forward a file to a target.
    FileOffer(OfferRequest),
    /// Tell the peer that offered a file that it was declined.
    OfferDeclined(DeclineNotice),
}

impl ClientMessage {
    /// Tag assumed for frames that carry no `type` field.
    pub const DEFAULT_TYPE: &'static str = "file_offer";

    /// Parse a JSON text frame received from a client.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        #[derive(Deserialize)]
        struct Tag {
            #[serde(rename = "type", default)]
            kind: Option<String>,
        }

        let tag: Tag = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        match tag.kind.as_deref().unwrap_or(Self::DEFAULT_TYPE) {
            "file_offer" => serde_json::from_str(text)
                .map(Self::FileOffer)
                .map_err(ProtocolError::Malformed),
            "offer_declined" => serde_json::from_str(text)
                .map(Self::OfferDeclined)
                .map_err(ProtocolError::Malformed),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(ProtocolError::Serialization)
    }
}

/// Offer request as sent by the offering client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRequest {
    /// Identifier of the peer that should receive the file.
    pub target_user_id: String,
    /// File name to present to the target.
    pub file_name: String,
    /// Base64-encoded file contents.
    pub file: String,
}

impl std::fmt::Debug for OfferRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfferRequest")
            .field("target_user_id", &self.target_user_id)
            .field("file_name", &self.file_name)
            .field("file_len", &self.file.len())
            .finish()
    }
}

/// Decline notice as sent by the client that received an offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclineNotice {
    /// The peer whose offer is being declined.
    pub target_user_id: String,
    /// Name of the declined file.
    pub file_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn as_value(msg: &ServerMessage) -> Value {
        serde_json::from_str(&msg.to_json().unwrap()).unwrap()
    }

    #[test]
    fn user_id_wire_shape() {
        let id = ConnectionId::random();
        let value = as_value(&ServerMessage::UserId { user_id: id });
        assert_eq!(value, json!({ "type": "user_id", "user_id": id.to_string() }));
    }

    #[test]
    fn connected_users_wire_shape() {
        let a = ConnectionId::random();
        let b = ConnectionId::random();
        let value = as_value(&ServerMessage::ConnectedUsers { users: vec![a, b] });
        assert_eq!(
            value,
            json!({ "type": "connected_users", "users": [a.to_string(), b.to_string()] })
        );
    }

    #[test]
    fn presence_wire_shapes() {
        let id = ConnectionId::random();
        assert_eq!(
            as_value(&ServerMessage::UserConnected { user_id: id }),
            json!({ "type": "user_connected", "user_id": id.to_string() })
        );
        assert_eq!(
            as_value(&ServerMessage::UserDisconnected { user_id: id }),
            json!({ "type": "user_disconnected", "user_id": id.to_string() })
        );
    }

    #[test]
    fn file_offer_wire_shape() {
        let sender = ConnectionId::random();
        let msg = ServerMessage::FileOffer(FileOffer {
            sender_id: sender,
            file_name: "report.pdf".into(),
            file: "SGVsbG8=".into(),
        });
        assert_eq!(
            as_value(&msg),
            json!({
                "type": "file_offer",
                "sender_id": sender.to_string(),
                "file_name": "report.pdf",
                "file": "SGVsbG8=",
            })
        );
    }

    #[test]
    fn target_unavailable_echoes_raw_target() {
        let msg = ServerMessage::TargetUnavailable {
            target_user_id: "nobody".into(),
        };
        assert_eq!(
            as_value(&msg),
            json!({ "type": "target_unavailable", "target_user_id": "nobody" })
        );
    }

    #[test]
    fn server_message_parses_back() {
        let msg = ServerMessage::OfferDeclined(OfferDeclined {
            sender_id: ConnectionId::random(),
            file_name: "a.txt".into(),
        });
        let parsed = ServerMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.kind(), "offer_declined");
    }

    #[test]
    fn untagged_frame_is_an_offer() {
        let text = r#"{"file_name":"a.txt","file":"QQ==","target_user_id":"abc"}"#;
        let msg = ClientMessage::from_json(text).unwrap();
        assert_eq!(
            msg,
            ClientMessage::FileOffer(OfferRequest {
                target_user_id: "abc".into(),
                file_name: "a.txt".into(),
                file: "QQ==".into(),
            })
        );
    }

    #[test]
    fn tagged_offer_frame_is_accepted() {
        let text = r#"{"type":"file_offer","file_name":"a.txt","file":"QQ==","target_user_id":"abc"}"#;
        assert!(matches!(
            ClientMessage::from_json(text).unwrap(),
            ClientMessage::FileOffer(_)
        ));
    }

    #[test]
    fn embedded_sender_id_is_ignored() {
        let text = r#"{"sender_id":"spoofed","user_id":"spoofed","file_name":"a","file":"","target_user_id":"t"}"#;
        let ClientMessage::FileOffer(offer) = ClientMessage::from_json(text).unwrap() else {
            panic!("expected an offer");
        };
        assert_eq!(offer.target_user_id, "t");
    }

    #[test]
    fn decline_frame_parses() {
        let text = r#"{"type":"offer_declined","target_user_id":"abc","file_name":"a.txt"}"#;
        assert_eq!(
            ClientMessage::from_json(text).unwrap(),
            ClientMessage::OfferDeclined(DeclineNotice {
                target_user_id: "abc".into(),
                file_name: "a.txt".into(),
            })
        );
    }

    #[test]
    fn client_message_serializes_with_tag() {
        let msg = ClientMessage::FileOffer(OfferRequest {
            target_user_id: "abc".into(),
            file_name: "a.txt".into(),
            file: "QQ==".into(),
        });
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "file_offer");
        assert_eq!(ClientMessage::from_json(&msg.to_json().unwrap()).unwrap(), msg);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = ClientMessage::from_json(r#"{"type":"chat","text":"hi"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(ref t) if t == "chat"));
    }

    #[test]
    fn missing_fields_are_malformed() {
        let err = ClientMessage::from_json(r#"{"file_name":"a.txt"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(matches!(
            ClientMessage::from_json("hello").unwrap_err(),
            ProtocolError::Malformed(_)
        ));
        assert!(matches!(
            ClientMessage::from_json("[1,2]").unwrap_err(),
            ProtocolError::Malformed(_)
        ));
    }

    #[test]
    fn offer_debug_hides_payload() {
        let offer = FileOffer {
            sender_id: ConnectionId::random(),
            file_name: "big.bin".into(),
            file: "A".repeat(1000),
        };
        let debug = format!("{:?}", offer);
        assert!(debug.contains("file_len: 1000"));
        assert!(!debug.contains("AAAA"));
    }
}
