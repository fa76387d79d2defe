//! Prometheus metrics endpoint.

use crate::server::FileRelay;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(relay): Extension<Arc<FileRelay>>) -> impl IntoResponse {
    let body = render(&relay).await;
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

async fn render(relay: &FileRelay) -> String {
    let m = relay.metrics();

    // Gauges
    let connections = relay.connection_count().await;
    let limiter_keys =
        relay.rate_limits().connection_keys_count() + relay.rate_limits().message_keys_count();
    let uptime = relay.uptime().as_secs();

    // Counters
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let forwarded = m.offers_forwarded.load(Ordering::Relaxed);
    let undeliverable = m.offers_undeliverable.load(Ordering::Relaxed);
    let declined = m.offers_declined.load(Ordering::Relaxed);
    let payload_bytes = m.payload_bytes_forwarded.load(Ordering::Relaxed);
    let presence_sent = m.presence_events_sent.load(Ordering::Relaxed);
    let presence_failed = m.presence_delivery_failures.load(Ordering::Relaxed);
    let forced = m.forced_disconnects.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);

    format!(
        r#"# HELP fileshare_relay_connections_active Number of registered connections
# TYPE fileshare_relay_connections_active gauge
fileshare_relay_connections_active {connections}

# HELP fileshare_relay_rate_limiter_keys Keys tracked by the rate limiters
# TYPE fileshare_relay_rate_limiter_keys gauge
fileshare_relay_rate_limiter_keys {limiter_keys}

# HELP fileshare_relay_uptime_seconds Seconds since the relay started
# TYPE fileshare_relay_uptime_seconds gauge
fileshare_relay_uptime_seconds {uptime}

# HELP fileshare_relay_info Server information
# TYPE fileshare_relay_info gauge
fileshare_relay_info{{version="{version}"}} 1

# HELP fileshare_relay_connections_total Total connections registered
# TYPE fileshare_relay_connections_total counter
fileshare_relay_connections_total {conns_total}

# HELP fileshare_relay_offers_forwarded_total File offers handed to their target
# TYPE fileshare_relay_offers_forwarded_total counter
fileshare_relay_offers_forwarded_total {forwarded}

# HELP fileshare_relay_offers_undeliverable_total File offers answered with target_unavailable
# TYPE fileshare_relay_offers_undeliverable_total counter
fileshare_relay_offers_undeliverable_total {undeliverable}

# HELP fileshare_relay_offers_declined_total Decline notices forwarded
# TYPE fileshare_relay_offers_declined_total counter
fileshare_relay_offers_declined_total {declined}

# HELP fileshare_relay_payload_bytes_forwarded_total Encoded payload bytes forwarded
# TYPE fileshare_relay_payload_bytes_forwarded_total counter
fileshare_relay_payload_bytes_forwarded_total {payload_bytes}

# HELP fileshare_relay_presence_events_total Presence events enqueued
# TYPE fileshare_relay_presence_events_total counter
fileshare_relay_presence_events_total {presence_sent}

# HELP fileshare_relay_presence_failures_total Presence events that could not be enqueued
# TYPE fileshare_relay_presence_failures_total counter
fileshare_relay_presence_failures_total {presence_failed}

# HELP fileshare_relay_forced_disconnects_total Connections closed for a full outbound queue
# TYPE fileshare_relay_forced_disconnects_total counter
fileshare_relay_forced_disconnects_total {forced}

# HELP fileshare_relay_rate_limit_hits_total Total rate limit rejections
# TYPE fileshare_relay_rate_limit_hits_total counter
fileshare_relay_rate_limit_hits_total {rate_limits}

# HELP fileshare_relay_errors_total Total protocol errors
# TYPE fileshare_relay_errors_total counter
fileshare_relay_errors_total {errors}
"#,
        version = env!("CARGO_PKG_VERSION"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn renders_every_counter() {
        let relay = FileRelay::new(Config::default());
        relay.metrics().offers_forwarded.fetch_add(3, Ordering::Relaxed);
        relay.metrics().errors_total.fetch_add(1, Ordering::Relaxed);

        let body = render(&relay).await;
        assert!(body.contains("fileshare_relay_connections_active 0"));
        assert!(body.contains("fileshare_relay_offers_forwarded_total 3"));
        assert!(body.contains("fileshare_relay_errors_total 1"));
        assert!(body.contains("# TYPE fileshare_relay_forced_disconnects_total counter"));
    }

    #[tokio::test]
    async fn every_sample_has_help_and_type() {
        let relay = FileRelay::new(Config::default());
        let body = render(&relay).await;

        for line in body.lines().filter(|l| !l.is_empty() && !l.starts_with('#')) {
            let name = line
                .split(|c: char| c == ' ' || c == '{')
                .next()
                .unwrap_or_default();
            assert!(body.contains(&format!("# HELP {} ", name)), "{}", name);
            assert!(body.contains(&format!("# TYPE {} ", name)), "{}", name);
        }
    }
}
