//! Server event decoding.
//!
//! Every record pushed by the head node carries a `tag` naming one of a fixed
//! set of events plus a small envelope (`seq`, `timestamp`, optional
//! `headId`). Decoding is strict about the tag: a record whose tag falls outside
//! [`EventTag::ALL`] means the client and server disagree about the protocol and
//! the session must not keep applying events against its mirror.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Party, Transaction, UtxoSet};

/// Discriminant of a [`ServerEvent`], with its wire name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventTag {
    Greetings,
    PeerConnected,
    PeerDisconnected,
    HeadIsInitializing,
    Committed,
    HeadIsOpen,
    HeadIsClosed,
    HeadIsContested,
    ReadyToFanout,
    HeadIsAborted,
    TxValid,
    TxInvalid,
    SnapshotConfirmed,
    GetUtxoResponse,
    InvalidInput,
    PostTxOnChainFailed,
    CommandFailed,
    HeadIsFinalized,
}

impl EventTag {
    pub const ALL: [EventTag; 18] = [
        EventTag::Greetings,
        EventTag::PeerConnected,
        EventTag::PeerDisconnected,
        EventTag::HeadIsInitializing,
        EventTag::Committed,
        EventTag::HeadIsOpen,
        EventTag::HeadIsClosed,
        EventTag::HeadIsContested,
        EventTag::ReadyToFanout,
        EventTag::HeadIsAborted,
        EventTag::TxValid,
        EventTag::TxInvalid,
        EventTag::SnapshotConfirmed,
        EventTag::GetUtxoResponse,
        EventTag::InvalidInput,
        EventTag::PostTxOnChainFailed,
        EventTag::CommandFailed,
        EventTag::HeadIsFinalized,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventTag::Greetings => "Greetings",
            EventTag::PeerConnected => "PeerConnected",
            EventTag::PeerDisconnected => "PeerDisconnected",
            EventTag::HeadIsInitializing => "HeadIsInitializing",
            EventTag::Committed => "Committed",
            EventTag::HeadIsOpen => "HeadIsOpen",
            EventTag::HeadIsClosed => "HeadIsClosed",
            EventTag::HeadIsContested => "HeadIsContested",
            EventTag::ReadyToFanout => "ReadyToFanout",
            EventTag::HeadIsAborted => "HeadIsAborted",
            EventTag::TxValid => "TxValid",
            EventTag::TxInvalid => "TxInvalid",
            EventTag::SnapshotConfirmed => "SnapshotConfirmed",
            EventTag::GetUtxoResponse => "GetUTxOResponse",
            EventTag::InvalidInput => "InvalidInput",
            EventTag::PostTxOnChainFailed => "PostTxOnChainFailed",
            EventTag::CommandFailed => "CommandFailed",
            EventTag::HeadIsFinalized => "HeadIsFinalized",
        }
    }

    pub fn from_wire(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|known| known.as_str() == tag)
    }

    /// Domain-level rejections reported by the node. They never mutate the
    /// mirror but must reach consumers.
    pub fn is_rejection(self) -> bool {
        matches!(
            self,
            EventTag::InvalidInput | EventTag::PostTxOnChainFailed | EventTag::CommandFailed
        )
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedSnapshot {
    pub snapshot_number: u64,
    pub utxo: UtxoSet,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadParameters {
    pub contestation_period: u64,
    pub parties: Vec<Party>,
}

/// Tagged payload the node echoes back verbatim (failed on-chain posts, post
/// errors, rejected client inputs).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedPayload {
    pub tag: String,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Closed set of events the head node publishes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Greetings {
        me: Party,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        head_status: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot_utxo: Option<UtxoSet>,
    },
    PeerConnected {
        peer: String,
    },
    PeerDisconnected {
        peer: String,
    },
    HeadIsInitializing {
        parties: Vec<Party>,
    },
    Committed {
        party: Party,
        utxo: UtxoSet,
    },
    HeadIsOpen {
        utxo: UtxoSet,
    },
    HeadIsClosed {
        snapshot_number: u64,
        contestation_deadline: DateTime<Utc>,
    },
    HeadIsContested {
        snapshot_number: u64,
    },
    ReadyToFanout,
    HeadIsAborted {
        utxo: UtxoSet,
    },
    TxValid {
        transaction: Transaction,
    },
    TxInvalid {
        transaction: Transaction,
        validation_error: ValidationError,
    },
    SnapshotConfirmed {
        snapshot: ConfirmedSnapshot,
        #[serde(default)]
        confirmed_transactions: Vec<String>,
    },
    #[serde(rename = "GetUTxOResponse")]
    GetUtxoResponse {
        utxo: UtxoSet,
    },
    InvalidInput {
        reason: String,
        input: String,
    },
    PostTxOnChainFailed {
        post_chain_tx: TaggedPayload,
        post_tx_error: TaggedPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        head_parameters: Option<HeadParameters>,
    },
    CommandFailed {
        client_input: TaggedPayload,
    },
    HeadIsFinalized {
        utxo: UtxoSet,
    },
}

impl ServerEvent {
    pub fn tag(&self) -> EventTag {
        match self {
            ServerEvent::Greetings { .. } => EventTag::Greetings,
            ServerEvent::PeerConnected { .. } => EventTag::PeerConnected,
            ServerEvent::PeerDisconnected { .. } => EventTag::PeerDisconnected,
            ServerEvent::HeadIsInitializing { .. } => EventTag::HeadIsInitializing,
            ServerEvent::Committed { .. } => EventTag::Committed,
            ServerEvent::HeadIsOpen { .. } => EventTag::HeadIsOpen,
            ServerEvent::HeadIsClosed { .. } => EventTag::HeadIsClosed,
            ServerEvent::HeadIsContested { .. } => EventTag::HeadIsContested,
            ServerEvent::ReadyToFanout => EventTag::ReadyToFanout,
            ServerEvent::HeadIsAborted { .. } => EventTag::HeadIsAborted,
            ServerEvent::TxValid { .. } => EventTag::TxValid,
            ServerEvent::TxInvalid { .. } => EventTag::TxInvalid,
            ServerEvent::SnapshotConfirmed { .. } => EventTag::SnapshotConfirmed,
            ServerEvent::GetUtxoResponse { .. } => EventTag::GetUtxoResponse,
            ServerEvent::InvalidInput { .. } => EventTag::InvalidInput,
            ServerEvent::PostTxOnChainFailed { .. } => EventTag::PostTxOnChainFailed,
            ServerEvent::CommandFailed { .. } => EventTag::CommandFailed,
            ServerEvent::HeadIsFinalized { .. } => EventTag::HeadIsFinalized,
        }
    }

    /// Human-readable reason carried by a rejection event.
    pub fn rejection_reason(&self) -> Option<String> {
        match self {
            ServerEvent::InvalidInput { reason, .. } => Some(reason.clone()),
            ServerEvent::PostTxOnChainFailed {
                post_chain_tx,
                post_tx_error,
                ..
            } => Some(format!("{} failed: {}", post_chain_tx.tag, post_tx_error.tag)),
            ServerEvent::CommandFailed { client_input } => {
                Some(format!("{} failed", client_input.tag))
            }
            _ => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    seq: u64,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    head_id: Option<String>,
}

/// A decoded record: envelope fields plus the event itself.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_id: Option<String>,
    #[serde(flatten)]
    pub event: ServerEvent,
}

impl ServerMessage {
    /// Decodes one raw text record.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(DecodeError::InvalidJson)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self, DecodeError> {
        let wire_tag = value
            .get("tag")
            .and_then(serde_json::Value::as_str)
            .ok_or(DecodeError::MissingTag)?;
        let tag = EventTag::from_wire(wire_tag)
            .ok_or_else(|| DecodeError::UnknownTag(wire_tag.to_owned()))?;

        let malformed = |source: serde_json::Error| DecodeError::Malformed { tag, source };
        let envelope = Envelope::deserialize(value).map_err(malformed)?;
        let event = ServerEvent::deserialize(value).map_err(malformed)?;

        Ok(Self {
            seq: envelope.seq,
            timestamp: envelope.timestamp,
            head_id: envelope.head_id,
            event,
        })
    }

    pub fn tag(&self) -> EventTag {
        self.event.tag()
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("record is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("record carries no tag")]
    MissingTag,
    #[error("unexpected server response tag: {0}")]
    UnknownTag(String),
    #[error("malformed {tag} record: {source}")]
    Malformed {
        tag: EventTag,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tag_round_trips_through_its_wire_name() {
        for tag in EventTag::ALL {
            assert_eq!(EventTag::from_wire(tag.as_str()), Some(tag));
        }
        assert_eq!(EventTag::from_wire("GetUTxO"), None);
    }

    #[test]
    fn decodes_envelope_and_event() {
        let message = ServerMessage::decode(
            r#"{
                "tag": "HeadIsInitializing",
                "seq": 3,
                "timestamp": "2024-03-01T10:00:00.5Z",
                "headId": "h1",
                "parties": [{"vkey": "alice"}, {"vkey": "bob"}]
            }"#,
        )
        .expect("decode");

        assert_eq!(message.seq, 3);
        assert_eq!(message.head_id.as_deref(), Some("h1"));
        assert_eq!(
            message.event,
            ServerEvent::HeadIsInitializing {
                parties: vec![Party::new("alice"), Party::new("bob")],
            }
        );
    }

    #[test]
    fn greeting_without_head_id_decodes() {
        let message = ServerMessage::decode(
            r#"{"tag":"Greetings","seq":0,"timestamp":"2024-03-01T10:00:00Z",
                "me":{"vkey":"alice"},"headStatus":"Idle"}"#,
        )
        .expect("decode");

        assert_eq!(message.head_id, None);
        assert_eq!(message.tag(), EventTag::Greetings);
    }

    #[test]
    fn unit_event_decodes() {
        let message = ServerMessage::decode(
            r#"{"tag":"ReadyToFanout","seq":9,"timestamp":"2024-03-01T10:00:00Z","headId":"h1"}"#,
        )
        .expect("decode");
        assert_eq!(message.event, ServerEvent::ReadyToFanout);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = ServerMessage::decode(
            r#"{"tag":"Bogus","seq":1,"timestamp":"2024-03-01T10:00:00Z"}"#,
        )
        .expect_err("unknown tag");
        assert!(matches!(err, DecodeError::UnknownTag(ref tag) if tag == "Bogus"));
    }

    #[test]
    fn missing_fields_are_malformed() {
        let err = ServerMessage::decode(
            r#"{"tag":"Committed","seq":1,"timestamp":"2024-03-01T10:00:00Z","party":{"vkey":"a"}}"#,
        )
        .expect_err("missing utxo");
        assert!(matches!(
            err,
            DecodeError::Malformed {
                tag: EventTag::Committed,
                ..
            }
        ));

        let err = ServerMessage::decode(r#"{"seq":1}"#).expect_err("missing tag");
        assert!(matches!(err, DecodeError::MissingTag));
    }

    #[test]
    fn rejection_events_expose_a_reason() {
        let message = ServerMessage::decode(
            r#"{"tag":"CommandFailed","seq":4,"timestamp":"2024-03-01T10:00:00Z",
                "clientInput":{"tag":"Close"}}"#,
        )
        .expect("decode");

        assert!(message.tag().is_rejection());
        assert_eq!(
            message.event.rejection_reason().as_deref(),
            Some("Close failed")
        );
    }
}
