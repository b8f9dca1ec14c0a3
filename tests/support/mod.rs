//! Helpers for building head node records and observing client output.
#![allow(dead_code)]

use std::time::Duration;

use anyhow::{anyhow, Result};
use head_mirror::{HeadClient, SessionSignal};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

/// Raw server record with the usual envelope around `body`.
pub fn record(seq: u64, body: &str) -> String {
    format!(r#"{{"seq":{seq},"timestamp":"2024-03-01T10:00:00Z","headId":"h1",{body}}}"#)
}

pub fn greetings(seq: u64, me: &str) -> String {
    format!(
        r#"{{"seq":{seq},"timestamp":"2024-03-01T10:00:00Z","tag":"Greetings","me":{{"vkey":"{me}"}},"headStatus":"Initializing"}}"#
    )
}

pub fn initializing(seq: u64) -> String {
    record(
        seq,
        r#""tag":"HeadIsInitializing","parties":[{"vkey":"alice"},{"vkey":"bob"}]"#,
    )
}

pub fn committed(seq: u64, party: &str, reference: &str, lovelace: u64) -> String {
    record(
        seq,
        &format!(
            r#""tag":"Committed","party":{{"vkey":"{party}"}},"utxo":{{"{reference}":{{"address":"addr_test1","value":{{"lovelace":{lovelace}}}}}}}"#
        ),
    )
}

pub fn open(seq: u64, outputs: &[(&str, u64)]) -> String {
    let utxo = outputs
        .iter()
        .map(|(reference, lovelace)| {
            format!(r#""{reference}":{{"address":"addr_test1","value":{{"lovelace":{lovelace}}}}}"#)
        })
        .collect::<Vec<_>>()
        .join(",");
    record(seq, &format!(r#""tag":"HeadIsOpen","utxo":{{{utxo}}}"#))
}

/// Subscribes a listener that reports every tag it sees.
pub fn tag_recorder(client: &HeadClient) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.subscribe(move |message| {
        tx.send(message.tag().to_string())
            .map_err(|_| anyhow!("test receiver dropped"))
    });
    rx
}

pub async fn next_tag(rx: &mut mpsc::UnboundedReceiver<String>) -> Result<String> {
    timeout(WAIT, rx.recv())
        .await?
        .ok_or_else(|| anyhow!("listener channel closed"))
}

/// Waits for the first signal matching `predicate`, skipping the others.
pub async fn wait_for_signal<F>(
    signals: &mut broadcast::Receiver<SessionSignal>,
    predicate: F,
) -> Result<SessionSignal>
where
    F: Fn(&SessionSignal) -> bool,
{
    timeout(WAIT, async {
        loop {
            let signal = signals.recv().await?;
            if predicate(&signal) {
                return anyhow::Ok(signal);
            }
        }
    })
    .await?
}
