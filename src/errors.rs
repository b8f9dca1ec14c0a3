use std::io;

use reqwest::StatusCode;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::events::DecodeError;
use crate::state::HeadPhase;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("timed out after {timeout_ms}ms connecting to {host}")]
    ConnectTimeout { host: String, timeout_ms: u64 },
    #[error("head session of client {name} was closed by the server")]
    SessionClosed { name: String },
    #[error("protocol violation: {0}")]
    Decode(#[from] DecodeError),
    #[error("client {name} cannot send command before the websocket is initialized and healthy")]
    NotConnected { name: String },
    #[error("{trigger} is not a legal transition out of phase {from}")]
    IllegalTransition { from: HeadPhase, trigger: &'static str },
    #[error("commit request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("received non-success response from server when committing: {status}")]
    HttpStatus { status: StatusCode },
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ClientError {
    /// Whether the session loop must stop after observing this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_)
                | ClientError::Decode(_)
                | ClientError::SessionClosed { .. }
        )
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
