//! Head client: owns the connection session, the mirror and its listeners.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::commands::ClientCommand;
use crate::commit::{CommitClient, CommitRequest, DraftCommitTx};
use crate::config::ClientConfig;
use crate::dispatch::{EventDispatcher, Fanout};
use crate::errors::{ClientError, ClientResult};
use crate::events::ServerMessage;
use crate::listeners::{EventListener, ListenerFailure, ListenerRegistry, SubscriptionId};
use crate::replay::ReplayGate;
use crate::state::{HeadPhase, MirrorState};
use crate::transport::{self, TransportEvent, TransportLink};

/// Out-of-band notifications about the session itself, as opposed to the
/// server events delivered to listeners.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionSignal {
    HistoryComplete,
    ListenerFailed(ListenerFailure),
    /// A recoverable rejection of a single server event.
    EventRejected { reason: String },
    /// Fatal: the server sent something the client cannot decode.
    ProtocolViolation { reason: String },
    TransportFailed { reason: String },
    Disconnected,
    Closed,
}

impl fmt::Display for SessionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionSignal::HistoryComplete => write!(f, "history complete"),
            SessionSignal::ListenerFailed(failure) => write!(
                f,
                "listener {} failed on {} #{}: {}",
                failure.subscription, failure.tag, failure.seq, failure.reason
            ),
            SessionSignal::EventRejected { reason } => write!(f, "event rejected: {reason}"),
            SessionSignal::ProtocolViolation { reason } => {
                write!(f, "protocol violation: {reason}")
            }
            SessionSignal::TransportFailed { reason } => write!(f, "transport failed: {reason}"),
            SessionSignal::Disconnected => write!(f, "disconnected"),
            SessionSignal::Closed => write!(f, "closed"),
        }
    }
}

/// Client-side mirror of one head node.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct HeadClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    mirror: Arc<RwLock<MirrorState>>,
    gate: Arc<Mutex<ReplayGate>>,
    listeners: Arc<ListenerRegistry>,
    dispatcher: EventDispatcher,
    commit: CommitClient,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    session: Mutex<Option<JoinHandle<()>>>,
    launched: AtomicBool,
    closed: AtomicBool,
    signals: broadcast::Sender<SessionSignal>,
}

impl HeadClient {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let mirror = Arc::new(RwLock::new(MirrorState::new()));
        let gate = Arc::new(Mutex::new(ReplayGate::new()));
        let listeners = Arc::new(ListenerRegistry::new());
        let dispatcher = EventDispatcher::new(
            Arc::clone(&mirror),
            Arc::clone(&gate),
            Arc::clone(&listeners),
            config.transition_policy(),
        );
        let commit = CommitClient::new(&config.host, config.commit_timeout())?;
        let (signals, _) = broadcast::channel(config.signal_capacity);

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                mirror,
                gate,
                listeners,
                dispatcher,
                commit,
                outbound: Mutex::new(None),
                writer: Mutex::new(None),
                session: Mutex::new(None),
                launched: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                signals,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Connects to the node and waits until the history replay is over.
    ///
    /// Resolves once the server's greeting has been applied, or fails on the
    /// first transport error, undecodable record or disconnect before it. A
    /// failed launch closes the client. Launching twice is a logged no-op.
    pub async fn launch(&self) -> ClientResult<()> {
        if !self.claim_launch() {
            return Ok(());
        }

        let config = &self.inner.config;
        let url = config.websocket_url();
        let connected = match time::timeout(
            config.connect_timeout(),
            transport::connect_websocket(&url),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ClientError::ConnectTimeout {
                host: config.host.clone(),
                timeout_ms: config.connect_timeout_ms,
            }),
        };

        match connected {
            Ok(link) => {
                info!(client = %config.name, %url, "connected to head node");
                self.run_session(link).await
            }
            Err(err) => {
                error!(client = %config.name, %url, error = %err, "unable to connect to head node");
                self.publish(SessionSignal::TransportFailed {
                    reason: err.to_string(),
                });
                self.close();
                Err(err)
            }
        }
    }

    /// Same as [`launch`](Self::launch) over an already established link.
    pub async fn launch_with(&self, link: TransportLink) -> ClientResult<()> {
        if !self.claim_launch() {
            return Ok(());
        }
        self.run_session(link).await
    }

    /// Sends one command to the node. Fails synchronously, without writing
    /// anything, when no transport is attached.
    pub fn send(&self, command: &ClientCommand) -> ClientResult<()> {
        let outbound = self.inner.outbound.lock();
        let Some(outbound) = outbound.as_ref() else {
            return Err(self.not_connected());
        };
        let wire = command.to_wire()?;
        outbound.send(wire).map_err(|_| self.not_connected())?;
        debug!(client = %self.name(), command = command.name(), "sent command");
        Ok(())
    }

    /// Requests a draft commit transaction. Independent of the event stream.
    pub async fn commit(&self, request: &CommitRequest) -> ClientResult<DraftCommitTx> {
        self.inner.commit.commit(request).await
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ServerMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(callback)
    }

    pub fn subscribe_shared(&self, listener: EventListener) -> SubscriptionId {
        self.inner.listeners.subscribe_shared(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.listeners.unsubscribe(id)
    }

    pub fn signals(&self) -> broadcast::Receiver<SessionSignal> {
        self.inner.signals.subscribe()
    }

    /// Point-in-time copy of the mirror.
    pub fn state(&self) -> MirrorState {
        self.inner.mirror.read().clone()
    }

    pub fn phase(&self) -> HeadPhase {
        self.inner.mirror.read().phase
    }

    pub fn is_live(&self) -> bool {
        self.inner.gate.lock().is_live()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.outbound.lock().is_some()
    }

    /// Releases the transport and drops every subscriber. The mirror keeps its
    /// last known state. A launch still connecting when this runs fails with
    /// [`ClientError::SessionClosed`] instead of attaching.
    ///
    /// Commands already handed to [`send`](Self::send) may still be in flight;
    /// use [`shutdown`](Self::shutdown) to wait for them.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let had_transport = self.inner.release_transport();
        if let Some(session) = self.inner.session.lock().take() {
            session.abort();
        }
        self.inner.listeners.clear();
        if had_transport {
            info!(client = %self.name(), "closed head session");
        }
        self.publish(SessionSignal::Closed);
    }

    /// Closes the client, then waits up to the connect timeout for the
    /// websocket writer to flush queued commands and send its close frame.
    pub async fn shutdown(&self) {
        self.close();
        let Some(writer) = self.inner.writer.lock().take() else {
            return;
        };
        match time::timeout(self.inner.config.connect_timeout(), writer).await {
            Ok(Ok(())) => debug!(client = %self.name(), "outbound commands flushed"),
            Ok(Err(err)) => warn!(client = %self.name(), error = %err, "websocket writer aborted"),
            Err(_) => warn!(
                client = %self.name(),
                timeout_ms = self.inner.config.connect_timeout_ms,
                "timed out flushing outbound commands"
            ),
        }
    }

    fn claim_launch(&self) -> bool {
        if self.inner.launched.swap(true, Ordering::SeqCst) {
            warn!(client = %self.name(), "attempted to re-launch an already launched client");
            return false;
        }
        true
    }

    async fn run_session(&self, link: TransportLink) -> ClientResult<()> {
        let TransportLink {
            inbound,
            outbound,
            writer,
        } = link;
        let (ready_tx, ready_rx) = oneshot::channel();
        {
            // close() flips the flag before taking the outbound slot, so holding
            // the slot here either sees the flag or gets torn down by close().
            let mut slot = self.inner.outbound.lock();
            if self.inner.closed.load(Ordering::SeqCst) {
                debug!(client = %self.name(), "client closed while connecting, dropping transport");
                return Err(ClientError::SessionClosed {
                    name: self.name().to_string(),
                });
            }
            *slot = Some(outbound);
            *self.inner.writer.lock() = writer;
            let session = tokio::spawn(session_loop(Arc::clone(&self.inner), inbound, ready_tx));
            *self.inner.session.lock() = Some(session);
        }

        let outcome = match ready_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClientError::SessionClosed {
                name: self.name().to_string(),
            }),
        };
        if outcome.is_err() {
            self.close();
        }
        outcome
    }

    fn not_connected(&self) -> ClientError {
        ClientError::NotConnected {
            name: self.name().to_string(),
        }
    }

    fn publish(&self, signal: SessionSignal) {
        self.inner.publish(signal);
    }
}

impl ClientInner {
    fn publish(&self, signal: SessionSignal) {
        // No receivers is fine.
        let _ = self.signals.send(signal);
    }

    fn release_transport(&self) -> bool {
        self.outbound.lock().take().is_some()
    }
}

type ReadySender = oneshot::Sender<ClientResult<()>>;

fn resolve(ready: &mut Option<ReadySender>, outcome: ClientResult<()>) {
    if let Some(sender) = ready.take() {
        let _ = sender.send(outcome);
    }
}

/// Applies inbound records strictly one after another. Each record is fully
/// decoded, applied and fanned out before the next one is pulled.
async fn session_loop(
    inner: Arc<ClientInner>,
    mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ready: ReadySender,
) {
    let mut ready = Some(ready);
    let name = inner.config.name.clone();

    while let Some(event) = inbound.recv().await {
        let raw = match event {
            TransportEvent::Text(raw) => raw,
            TransportEvent::Closed => break,
            TransportEvent::Failed(err) => {
                error!(client = %name, error = %err, "head session transport failed");
                inner.release_transport();
                inner.publish(SessionSignal::TransportFailed {
                    reason: err.to_string(),
                });
                resolve(&mut ready, Err(ClientError::Transport(err)));
                return;
            }
        };

        match inner.dispatcher.dispatch_raw(&raw) {
            Ok(dispatched) => {
                if let Fanout::Delivered { failures } = dispatched.fanout {
                    for failure in failures {
                        inner.publish(SessionSignal::ListenerFailed(failure));
                    }
                }
                if dispatched.history_complete {
                    inner.publish(SessionSignal::HistoryComplete);
                    resolve(&mut ready, Ok(()));
                }
            }
            Err(err) if !err.is_fatal() => {
                warn!(client = %name, error = %err, "rejected server event");
                inner.publish(SessionSignal::EventRejected {
                    reason: err.to_string(),
                });
            }
            Err(err) => {
                error!(client = %name, error = %err, "protocol violation, tearing down session");
                inner.release_transport();
                inner.publish(SessionSignal::ProtocolViolation {
                    reason: err.to_string(),
                });
                resolve(&mut ready, Err(err));
                return;
            }
        }
    }

    warn!(client = %name, "head node closed the connection");
    inner.release_transport();
    inner.publish(SessionSignal::Disconnected);
    resolve(&mut ready, Err(ClientError::SessionClosed { name }));
}
