//! Client-side mirror of a remote head node.
//!
//! A [`client::HeadClient`] connects to the node's event stream, replays the
//! node's history into a local [`state::MirrorState`] without notifying
//! anyone, and switches to live fan-out once the server greets it. From then
//! on every event is applied to the mirror and delivered to the registered
//! listeners in arrival order. Commands go back over the same connection; the
//! commit exchange in [`commit`] is a separate HTTP request.
//!
//! The lifecycle rules live in [`state`], the history/live split in
//! [`replay`], listener bookkeeping in [`listeners`] and the glue between them
//! in [`dispatch`]. [`transport`] hides the websocket behind channels so the
//! session can run over an in-memory link in tests.

pub mod client;
pub mod commands;
pub mod commit;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod listeners;
pub mod replay;
pub mod state;
pub mod transport;
pub mod types;

pub use client::{HeadClient, SessionSignal};
pub use commands::ClientCommand;
pub use config::ClientConfig;
pub use errors::{ClientError, ClientResult};
pub use events::{EventTag, ServerEvent, ServerMessage};
pub use listeners::SubscriptionId;
pub use state::{HeadPhase, MirrorState};
