//! # fileshare-types
//!
//! Wire format types for the fileshare relay protocol.
//!
//! This crate provides the types shared by the relay and its clients:
//! - [`ConnectionId`] - Relay-assigned identity of one connection
//! - [`ServerMessage`] - Frames sent by the relay (presence, offers, notices)
//! - [`ClientMessage`] - Frames sent by clients (offers, decline notices)
//! - [`ProtocolError`] - Codec errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use ids::ConnectionId;
pub use messages::{
    ClientMessage, DeclineNotice, FileOffer, OfferDeclined, OfferRequest, ServerMessage,
};
