//! # fileshare-relay
//!
//! Presence and file-offer relay for fileshare.
//!
//! This crate implements a relay server that:
//! - Accepts WebSocket connections and assigns each one an identifier
//! - Tells every connected peer who joins and who leaves
//! - Forwards file offers (base64 text) to the single peer they name
//! - Never decodes, stores, or retries a payload
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                    ┌── Client B
//!            │  WebSocket (JSON)  │
//!            ├───────────────────►│
//!            │                    │
//!        ┌───┴────────────────────┴───┐
//!        │       fileshare-relay      │
//!        │  ┌──────────────────────┐  │
//!        │  │ ConnectionRegistry   │  │
//!        │  └──────────────────────┘  │
//!        └────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! One persistent WebSocket per client at `server.ws_path`:
//! - connect → `user_id`, then `connected_users`
//! - peer joins / leaves → `user_connected` / `user_disconnected`
//! - `file_offer` (client) → `file_offer` (target) or `target_unavailable`
//! - `offer_declined` (client) → `offer_declined` (offering peer)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod config;
pub mod error;
pub mod http;
pub mod limits;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;

pub use config::Config;
pub use error::{RelayError, Result};
pub use server::{serve, FileRelay};
