//! # fileshare
//!
//! Command-line client for the fileshare relay.
//!
//! ## Commands
//!
//! - `listen`: Show who is online and receive offered files
//! - `send`: Offer a file to one connected peer
//!
//! ## Example
//!
//! ```bash
//! # In one terminal: print your ID and wait for offers
//! fileshare listen --download-dir ~/Downloads
//!
//! # In another: offer a file to that ID
//! fileshare send --to 3f0c8c1e-... report.pdf
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;
mod connection;
mod decision;
mod download;

use commands::listen::ListenOptions;
use commands::send::SendOutcome;
use commands::{listen, send};
use connection::DEFAULT_RELAY_URL;
use decision::DecisionPolicy;

/// Command-line client for the fileshare relay.
#[derive(Parser, Debug)]
#[command(name = "fileshare")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Relay WebSocket URL
    #[arg(long, global = true, default_value = DEFAULT_RELAY_URL)]
    relay: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show who is online and receive offered files
    Listen {
        /// Directory accepted files are written to
        #[arg(long, short, default_value = ".")]
        download_dir: PathBuf,

        /// Accept every offer without asking
        #[arg(long, conflicts_with = "decline_all")]
        accept_all: bool,

        /// Decline every offer without asking
        #[arg(long, conflicts_with = "accept_all")]
        decline_all: bool,

        /// Tell the sender when an offer is declined
        #[arg(long)]
        notify_decline: bool,
    },

    /// Offer a file to one connected peer
    Send {
        /// ID of the peer to send to
        #[arg(long)]
        to: String,

        /// File to send
        file: PathBuf,

        /// Seconds to wait for a decline or unavailable notice
        #[arg(long, default_value = "3")]
        wait_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Listen {
            download_dir,
            accept_all,
            decline_all,
            notify_decline,
        } => {
            let policy = if accept_all {
                DecisionPolicy::AcceptAll
            } else if decline_all {
                DecisionPolicy::DeclineAll
            } else {
                DecisionPolicy::Prompt
            };
            listen::run(
                &cli.relay,
                ListenOptions {
                    download_dir,
                    policy,
                    notify_decline,
                },
            )
            .await?;
        }
        Commands::Send {
            to,
            file,
            wait_secs,
        } => {
            let outcome = send::run(&cli.relay, &to, &file, Duration::from_secs(wait_secs)).await?;
            if outcome == SendOutcome::TargetUnavailable {
                anyhow::bail!("Offer was not delivered: {} is not connected", to.trim());
            }
        }
    }

    Ok(())
}
