//! Transport plumbing between the head node and the session loop.
//!
//! The session only needs an ordered stream of raw records in and a way to
//! push text out. [`connect_websocket`] provides both over a websocket by
//! pumping frames through channels; [`TransportLink::pair`] gives the same
//! shape in memory.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};

use crate::errors::ClientResult;

/// Item delivered to the session loop, in arrival order.
#[derive(Debug)]
pub enum TransportEvent {
    Text(String),
    Closed,
    Failed(tungstenite::Error),
}

/// The session's view of a connection.
pub struct TransportLink {
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
    pub outbound: mpsc::UnboundedSender<String>,
    /// Task draining `outbound` onto the wire. It finishes once every queued
    /// text is written and all senders are gone.
    pub writer: Option<JoinHandle<()>>,
}

impl TransportLink {
    /// In-memory link. The returned [`RemoteEnd`] plays the head node.
    pub fn pair() -> (TransportLink, RemoteEnd) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        (
            TransportLink {
                inbound: events_rx,
                outbound: outbound_tx,
                writer: None,
            },
            RemoteEnd {
                events: events_tx,
                sent: outbound_rx,
            },
        )
    }
}

/// Server side of an in-memory [`TransportLink`].
pub struct RemoteEnd {
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: mpsc::UnboundedReceiver<String>,
}

impl RemoteEnd {
    /// Pushes one raw record. Returns `false` once the client side is gone.
    pub fn push(&self, raw: impl Into<String>) -> bool {
        self.events.send(TransportEvent::Text(raw.into())).is_ok()
    }

    pub fn close(&self) -> bool {
        self.events.send(TransportEvent::Closed).is_ok()
    }

    /// Reports a broken connection to the client.
    pub fn fail(&self, err: tungstenite::Error) -> bool {
        self.events.send(TransportEvent::Failed(err)).is_ok()
    }

    /// Next text written by the client, or `None` once it released the link.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    pub fn try_next_sent(&mut self) -> Option<String> {
        self.sent.try_recv().ok()
    }
}

/// Opens a websocket to `url` and pumps it through a [`TransportLink`].
pub async fn connect_websocket(url: &str) -> ClientResult<TransportLink> {
    let (stream, _response) = connect_async(url).await?;
    let (mut sink, mut source) = stream.split();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if let Err(err) = sink.send(Message::Text(text)).await {
                warn!(error = %err, "websocket write failed");
                return;
            }
        }
        // Every sender dropped: the client closed the session.
        let _ = sink.close().await;
        debug!("websocket writer finished");
    });

    tokio::spawn(async move {
        while let Some(frame) = source.next().await {
            let event = match frame {
                Ok(Message::Text(text)) => TransportEvent::Text(text),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => TransportEvent::Text(text),
                    Err(_) => TransportEvent::Failed(tungstenite::Error::Utf8),
                },
                Ok(Message::Close(_)) => TransportEvent::Closed,
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(err) => TransportEvent::Failed(err),
            };
            let terminal = !matches!(event, TransportEvent::Text(_));
            if inbound_tx.send(event).is_err() || terminal {
                return;
            }
        }
        let _ = inbound_tx.send(TransportEvent::Closed);
    });

    Ok(TransportLink {
        inbound: inbound_rx,
        outbound: outbound_tx,
        writer: Some(writer),
    })
}
