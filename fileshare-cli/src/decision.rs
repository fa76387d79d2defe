//! Accept/decline decisions for incoming offers.
//!
//! Deciding can mean waiting on a person at a terminal, so it runs on its
//! own task. The listen loop hands offers over a channel and picks up
//! decisions from another; it never blocks on the answer. Terminal lines
//! are read on a dedicated thread and forwarded over a channel.

use fileshare_types::FileOffer;
use std::io::{BufRead, Write};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Outcome for one offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Save the file.
    Accept,
    /// Discard the file.
    Decline,
}

/// How offers are decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionPolicy {
    /// Ask on the terminal.
    Prompt,
    /// Accept everything.
    AcceptAll,
    /// Decline everything.
    DeclineAll,
}

/// Write the question for `offer` to `output`.
pub fn write_prompt<W: Write>(offer: &FileOffer, output: &mut W) -> std::io::Result<()> {
    write!(
        output,
        "User {} is sending a file: {} ({} bytes encoded). Download it? [y/N] ",
        offer.sender_id,
        offer.file_name,
        offer.file.len()
    )?;
    output.flush()
}

/// Anything other than `y`/`yes` (case-insensitive) declines.
pub fn parse_answer(line: &str) -> Decision {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Decision::Accept,
        _ => Decision::Decline,
    }
}

/// Forward terminal lines over a channel from a dedicated thread.
///
/// The reader is a plain OS thread, not a blocking-pool task, so runtime
/// shutdown never waits on a read parked at the terminal. The channel
/// closes at end of input.
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(1);
    let spawned = std::thread::Builder::new()
        .name("stdin-answers".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Could not read from stdin: {}", e);
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        tracing::error!("Could not start stdin reader, offers will be declined: {}", e);
    }
    rx
}

/// Spawn the task that decides offers one at a time, in arrival order.
///
/// The task ends when `offers` is closed or nobody is left to receive
/// decisions.
pub fn spawn_decision_task(
    policy: DecisionPolicy,
    offers: mpsc::Receiver<FileOffer>,
    decided: mpsc::Sender<(FileOffer, Decision)>,
) -> JoinHandle<()> {
    let fixed = match policy {
        DecisionPolicy::Prompt => {
            return spawn_prompt_task(stdin_lines(), std::io::stdout(), offers, decided)
        }
        DecisionPolicy::AcceptAll => Decision::Accept,
        DecisionPolicy::DeclineAll => Decision::Decline,
    };

    let mut offers = offers;
    tokio::spawn(async move {
        while let Some(offer) = offers.recv().await {
            if decided.send((offer, fixed)).await.is_err() {
                return;
            }
        }
    })
}

/// Spawn a task that asks about each offer on `output` and takes the next
/// line from `answers` as the reply. Closed input declines.
pub fn spawn_prompt_task<W>(
    mut answers: mpsc::Receiver<String>,
    mut output: W,
    mut offers: mpsc::Receiver<FileOffer>,
    decided: mpsc::Sender<(FileOffer, Decision)>,
) -> JoinHandle<()>
where
    W: Write + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(offer) = offers.recv().await {
            // Lines typed before the question do not answer it.
            while answers.try_recv().is_ok() {}

            if let Err(e) = write_prompt(&offer, &mut output) {
                tracing::warn!("Could not show prompt: {}", e);
            }
            let decision = match answers.recv().await {
                Some(line) => parse_answer(&line),
                None => Decision::Decline,
            };

            if decided.send((offer, decision)).await.is_err() {
                return;
            }
        }
    })
}
