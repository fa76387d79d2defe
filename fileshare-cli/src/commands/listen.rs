//! Stay connected, show presence, and receive files.

use anyhow::Result;
use fileshare_types::{ClientMessage, DeclineNotice, FileOffer, ServerMessage};
use std::future::Future;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::connection::RelayConnection;
use crate::decision::{spawn_decision_task, Decision, DecisionPolicy};
use crate::download::save_offer;

/// Offers waiting for a decision before new ones are declined outright.
const PENDING_OFFERS: usize = 16;

/// Options for the listen command.
#[derive(Debug, Clone)]
pub struct ListenOptions {
    /// Where accepted files are written.
    pub download_dir: PathBuf,
    /// How offers are decided.
    pub policy: DecisionPolicy,
    /// Send `offer_declined` back to the offering peer.
    pub notify_decline: bool,
}

/// What happened while listening.
#[derive(Debug, Default)]
pub struct ListenSummary {
    /// Files written, in order.
    pub saved: Vec<PathBuf>,
    /// Offers declined.
    pub declined: usize,
}

enum Event {
    Stop,
    Relay(Option<ServerMessage>),
    Decided(FileOffer, Decision),
}

/// Run the listen command until ctrl-c or the relay goes away.
pub async fn run(relay_url: &str, options: ListenOptions) -> Result<()> {
    let summary = run_until(relay_url, options, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    println!();
    println!(
        "Saved {} file(s), declined {} offer(s).",
        summary.saved.len(),
        summary.declined
    );
    Ok(())
}

/// Listen until `stop` resolves or the relay closes the connection.
pub async fn run_until<F>(relay_url: &str, options: ListenOptions, stop: F) -> Result<ListenSummary>
where
    F: Future<Output = ()>,
{
    let mut conn = RelayConnection::connect(relay_url).await?;
    println!("Connected to {}", relay_url);
    println!("  Your ID: {}", conn.id());
    if conn.roster().is_empty() {
        println!("  Nobody else is online.");
    } else {
        println!("  Online:");
        for peer in conn.roster() {
            println!("    {}", peer);
        }
    }
    println!("Waiting for offers (ctrl-c to stop)...");

    let (offer_tx, offer_rx) = mpsc::channel(PENDING_OFFERS);
    let (decided_tx, mut decided_rx) = mpsc::channel(PENDING_OFFERS);
    let decider = spawn_decision_task(options.policy, offer_rx, decided_tx);

    let mut summary = ListenSummary::default();
    tokio::pin!(stop);

    loop {
        let event = tokio::select! {
            _ = &mut stop => Event::Stop,
            message = conn.next_message() => Event::Relay(message?),
            Some((offer, decision)) = decided_rx.recv() => Event::Decided(offer, decision),
        };

        match event {
            Event::Stop => break,
            Event::Relay(None) => {
                println!("Relay closed the connection.");
                break;
            }
            Event::Relay(Some(ServerMessage::FileOffer(offer))) => {
                println!(
                    "Offer from {}: {} ({} bytes encoded)",
                    offer.sender_id,
                    offer.file_name,
                    offer.file.len()
                );
                if let Err(e) = offer_tx.try_send(offer) {
                    let offer = match e {
                        mpsc::error::TrySendError::Full(offer)
                        | mpsc::error::TrySendError::Closed(offer) => offer,
                    };
                    tracing::warn!("Too many pending offers, declining {:?}", offer.file_name);
                    decline(&mut conn, &options, &mut summary, offer).await?;
                }
            }
            Event::Relay(Some(message)) => show(&message),
            Event::Decided(offer, Decision::Accept) => {
                match save_offer(&options.download_dir, &offer).await {
                    Ok(path) => {
                        println!("Saved {} from {} to {:?}", offer.file_name, offer.sender_id, path);
                        summary.saved.push(path);
                    }
                    Err(e) => eprintln!("Could not save {}: {:#}", offer.file_name, e),
                }
            }
            Event::Decided(offer, Decision::Decline) => {
                decline(&mut conn, &options, &mut summary, offer).await?;
            }
        }
    }

    drop(offer_tx);
    decider.abort();
    if let Err(e) = conn.close().await {
        tracing::debug!("Close failed: {:#}", e);
    }
    Ok(summary)
}

async fn decline(
    conn: &mut RelayConnection,
    options: &ListenOptions,
    summary: &mut ListenSummary,
    offer: FileOffer,
) -> Result<()> {
    println!("Declined {} from {}", offer.file_name, offer.sender_id);
    summary.declined += 1;
    if options.notify_decline {
        conn.send(&ClientMessage::OfferDeclined(DeclineNotice {
            target_user_id: offer.sender_id.to_string(),
            file_name: offer.file_name,
        }))
        .await?;
    }
    Ok(())
}

/// Print a presence change or relay notice.
fn show(message: &ServerMessage) {
    match message {
        ServerMessage::UserConnected { user_id } => println!("+ {} joined", user_id),
        ServerMessage::UserDisconnected { user_id } => println!("- {} left", user_id),
        ServerMessage::TargetUnavailable { target_user_id } => {
            println!("! {} is not connected", target_user_id)
        }
        ServerMessage::OfferDeclined(declined) => {
            println!("! {} declined {}", declined.sender_id, declined.file_name)
        }
        ServerMessage::Error { message } => eprintln!("Relay error: {}", message),
        other => tracing::debug!("Ignoring {} after greeting", other.kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use fileshare_relay::{serve, Config, FileRelay};
    use fileshare_types::{ConnectionId, OfferDeclined, OfferRequest};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    async fn start_relay() -> (Arc<FileRelay>, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/socket-server/", listener.local_addr().unwrap());
        let relay = Arc::new(FileRelay::new(Config::default()));
        tokio::spawn(serve(relay.clone(), listener));
        (relay, url)
    }

    /// Wait for the next peer to join and return its id.
    async fn joined(conn: &mut RelayConnection) -> ConnectionId {
        loop {
            let next = tokio::time::timeout(Duration::from_secs(5), conn.next_message())
                .await
                .unwrap()
                .unwrap();
            if let Some(ServerMessage::UserConnected { user_id }) = next {
                return user_id;
            }
        }
    }

    async fn offer_to(conn: &mut RelayConnection, target: ConnectionId, name: &str, body: &[u8]) {
        conn.send(&ClientMessage::FileOffer(OfferRequest {
            target_user_id: target.to_string(),
            file_name: name.to_string(),
            file: base64::engine::general_purpose::STANDARD.encode(body),
        }))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn accepted_offer_is_saved() {
        let (relay, url) = start_relay().await;
        let dir = tempdir().unwrap();
        let mut sender = RelayConnection::connect(&url).await.unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let options = ListenOptions {
            download_dir: dir.path().to_path_buf(),
            policy: DecisionPolicy::AcceptAll,
            notify_decline: false,
        };
        let listen_url = url.clone();
        let listener = tokio::spawn(async move {
            run_until(&listen_url, options, async {
                let _ = stop_rx.await;
            })
            .await
        });

        let listener_id = joined(&mut sender).await;
        offer_to(&mut sender, listener_id, "notes.txt", b"remember the milk").await;

        let expected = dir.path().join("notes.txt");
        tokio::time::timeout(Duration::from_secs(5), async {
            while std::fs::read(&expected).map(|b| b.len()).unwrap_or(0) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        stop_tx.send(()).unwrap();
        let summary = listener.await.unwrap().unwrap();
        assert_eq!(summary.saved, vec![expected.clone()]);
        assert_eq!(std::fs::read(&expected).unwrap(), b"remember the milk");

        relay.shutdown();
    }

    #[tokio::test]
    async fn declined_offer_notifies_sender() {
        let (relay, url) = start_relay().await;
        let dir = tempdir().unwrap();
        let mut sender = RelayConnection::connect(&url).await.unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let options = ListenOptions {
            download_dir: dir.path().to_path_buf(),
            policy: DecisionPolicy::DeclineAll,
            notify_decline: true,
        };
        let listen_url = url.clone();
        let listener = tokio::spawn(async move {
            run_until(&listen_url, options, async {
                let _ = stop_rx.await;
            })
            .await
        });

        let listener_id = joined(&mut sender).await;
        offer_to(&mut sender, listener_id, "spam.exe", b"MZ").await;

        let notice = tokio::time::timeout(Duration::from_secs(5), sender.next_message())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            notice,
            Some(ServerMessage::OfferDeclined(OfferDeclined {
                sender_id: listener_id,
                file_name: "spam.exe".into(),
            }))
        );

        stop_tx.send(()).unwrap();
        let summary = listener.await.unwrap().unwrap();
        assert_eq!(summary.declined, 1);
        assert!(summary.saved.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        relay.shutdown();
    }

    #[tokio::test]
    async fn listen_ends_when_relay_shuts_down() {
        let (relay, url) = start_relay().await;
        let dir = tempdir().unwrap();
        let options = ListenOptions {
            download_dir: dir.path().to_path_buf(),
            policy: DecisionPolicy::DeclineAll,
            notify_decline: false,
        };

        let listener = tokio::spawn(async move {
            run_until(&url, options, std::future::pending::<()>()).await
        });
        while relay.connection_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        relay.shutdown();

        let summary = tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(summary.declined, 0);
    }
}
