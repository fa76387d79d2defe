//! fileshare-relay binary entry point.
//!
//! Usage:
//! ```bash
//! fileshare-relay --config relay.toml
//! RUST_LOG=fileshare_relay=debug fileshare-relay
//! ```

use anyhow::Context;
use fileshare_relay::cleanup::spawn_cleanup_task;
use fileshare_relay::{serve, Config, FileRelay};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = get_config_path();
    let config = load_config(&config_path)?;
    config.validate().context("invalid configuration")?;

    tracing::info!(
        "fileshare-relay v{} starting (config: {:?})",
        env!("CARGO_PKG_VERSION"),
        config_path
    );

    let listener = TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_address))?;

    let cleanup = config.cleanup.clone();
    let relay = Arc::new(FileRelay::new(config));
    let cleanup_task = spawn_cleanup_task(relay.clone(), cleanup);

    let signal_relay = relay.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => signal_relay.shutdown(),
            Err(e) => tracing::error!("Failed to listen for ctrl-c: {}", e),
        }
    });

    serve(relay, listener).await?;
    cleanup_task.abort();
    Ok(())
}

/// Read the config file, falling back to defaults when it does not exist.
fn load_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        Ok(Config::from_file(path)?)
    } else {
        tracing::info!("No config file at {:?}, using defaults", path);
        Ok(Config::default())
    }
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("relay.toml"))
}
