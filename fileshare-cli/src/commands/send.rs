//! Offer a file to one connected peer.

use anyhow::{Context, Result};
use base64::Engine;
use fileshare_types::{ClientMessage, ConnectionId, OfferRequest, ServerMessage};
use std::path::Path;
use std::time::Duration;

use crate::connection::RelayConnection;

/// What the relay told us after the offer went out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Forwarded; no decline arrived while waiting.
    Sent,
    /// The target is not connected.
    TargetUnavailable,
    /// The target declined the offer.
    Declined,
}

/// Run the send command.
pub async fn run(relay_url: &str, to: &str, file: &Path, wait: Duration) -> Result<SendOutcome> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))?;
    let request = build_offer(to, file, &data)?;
    let file_name = request.file_name.clone();

    let mut conn = RelayConnection::connect(relay_url).await?;
    println!("Connected as {}", conn.id());
    if !is_online(conn.roster(), to) {
        println!("  Note: {} is not in the current roster", to.trim());
    }

    println!("Offering {} ({} bytes) to {}...", file_name, data.len(), to.trim());
    conn.send(&ClientMessage::FileOffer(request)).await?;

    let outcome = wait_for_outcome(&mut conn, to, &file_name, wait).await?;
    match outcome {
        SendOutcome::Sent => println!("Offer delivered to {}.", to.trim()),
        SendOutcome::TargetUnavailable => println!("{} is not connected.", to.trim()),
        SendOutcome::Declined => println!("{} declined {}.", to.trim(), file_name),
    }

    if let Err(e) = conn.close().await {
        tracing::debug!("Close failed: {:#}", e);
    }
    Ok(outcome)
}

/// Encode `data` as an offer of `file` to `to`.
pub fn build_offer(to: &str, file: &Path, data: &[u8]) -> Result<OfferRequest> {
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{:?} has no file name", file))?;

    Ok(OfferRequest {
        target_user_id: to.trim().to_string(),
        file_name,
        file: base64::engine::general_purpose::STANDARD.encode(data),
    })
}

fn is_online(roster: &[ConnectionId], to: &str) -> bool {
    to.parse::<ConnectionId>()
        .map(|id| roster.contains(&id))
        .unwrap_or(false)
}

/// Whether `message` settles the offer of `file_name` to `to`.
pub fn classify(message: &ServerMessage, to: &str, file_name: &str) -> Option<SendOutcome> {
    let to = to.trim();
    match message {
        ServerMessage::TargetUnavailable { target_user_id } if target_user_id == to => {
            Some(SendOutcome::TargetUnavailable)
        }
        ServerMessage::OfferDeclined(declined)
            if declined.file_name == file_name && declined.sender_id.to_string() == to =>
        {
            Some(SendOutcome::Declined)
        }
        _ => None,
    }
}

/// Read relay messages for up to `wait` looking for a verdict on the offer.
async fn wait_for_outcome(
    conn: &mut RelayConnection,
    to: &str,
    file_name: &str,
    wait: Duration,
) -> Result<SendOutcome> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let next = match tokio::time::timeout_at(deadline, conn.next_message()).await {
            Ok(next) => next?,
            Err(_) => return Ok(SendOutcome::Sent),
        };
        match next {
            Some(message) => {
                if let Some(outcome) = classify(&message, to, file_name) {
                    return Ok(outcome);
                }
                tracing::debug!("Ignoring {} while waiting", message.kind());
            }
            None => return Ok(SendOutcome::Sent),
        }
    }
}
