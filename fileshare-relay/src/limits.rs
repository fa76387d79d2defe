//! Rate limiting for fileshare-relay.
//!
//! Provides protection against connection flooding and message spam.
//!
//! ## Design Notes
//!
//! Connections are limited before the WebSocket upgrade, keyed by the
//! remote IP address. Once a connection is registered its frames are
//! limited by its [`ConnectionId`]. Both use the governor crate's keyed
//! rate limiters backed by DashMap. The concurrent connection cap is a
//! soft limit checked at upgrade time.

use crate::config::LimitsConfig;
use fileshare_types::ConnectionId;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits new connections per remote IP.
    ///
    /// Configured via `limits.connections_per_ip` (per minute).
    connection_limiter: Arc<KeyedLimiter<IpAddr>>,

    /// Limits client frames per connection.
    ///
    /// Configured via `limits.messages_per_minute`.
    message_limiter: Arc<KeyedLimiter<ConnectionId>>,

    /// Maximum concurrent registered connections.
    max_connections: usize,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("connection_limiter", &"KeyedLimiter<IpAddr>")
            .field("message_limiter", &"KeyedLimiter<ConnectionId>")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// Zero quotas are rejected by [`Config::validate`](crate::config::Config::validate);
    /// if one slips through it is treated as one per minute.
    pub fn new(config: &LimitsConfig) -> Self {
        let connections_per_minute =
            NonZeroU32::new(config.connections_per_ip).unwrap_or(NonZeroU32::MIN);
        let messages_per_minute =
            NonZeroU32::new(config.messages_per_minute).unwrap_or(NonZeroU32::MIN);

        Self {
            connection_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(
                connections_per_minute,
            ))),
            message_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(messages_per_minute))),
            max_connections: config.max_connections,
        }
    }

    /// Check if a new connection from `ip` is allowed.
    pub fn check_connection(&self, ip: &IpAddr) -> Result<(), RateLimitError> {
        self.connection_limiter
            .check_key(ip)
            .map_err(|_| RateLimitError::ConnectionLimitExceeded)
    }

    /// Check if a frame from connection `id` is allowed.
    pub fn check_message(&self, id: &ConnectionId) -> Result<(), RateLimitError> {
        self.message_limiter
            .check_key(id)
            .map_err(|_| RateLimitError::MessageLimitExceeded)
    }

    /// Check the concurrent connection cap against the current count.
    pub fn check_capacity(&self, active: usize) -> Result<(), RateLimitError> {
        if active >= self.max_connections {
            Err(RateLimitError::CapacityReached {
                limit: self.max_connections,
            })
        } else {
            Ok(())
        }
    }

    /// Get the number of tracked connection keys (for metrics).
    pub fn connection_keys_count(&self) -> usize {
        self.connection_limiter.len()
    }

    /// Get the number of tracked message keys (for metrics).
    pub fn message_keys_count(&self) -> usize {
        self.message_limiter.len()
    }

    /// Evict stale entries from the keyed rate limiter DashMaps.
    ///
    /// Every closed connection leaves a key behind in the message limiter.
    /// `retain_recent()` drops keys whose cells have fully recharged. Call
    /// periodically from the cleanup task.
    pub fn shrink(&self) {
        self.connection_limiter.retain_recent();
        self.message_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many connection attempts from this address.
    #[error("connection rate limit exceeded")]
    ConnectionLimitExceeded,
    /// Too many frames from this connection.
    #[error("message rate limit exceeded")]
    MessageLimitExceeded,
    /// The relay already holds its maximum number of connections.
    #[error("relay at capacity ({limit} connections)")]
    CapacityReached {
        /// Configured maximum.
        limit: usize,
    },
}
