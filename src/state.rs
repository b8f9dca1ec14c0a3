//! Local mirror of the remote head and its lifecycle state machine.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::{ClientError, ClientResult};
use crate::events::{EventTag, ServerEvent, ServerMessage};
use crate::ledger::CommittedLedger;
use crate::types::{Party, UtxoSet};

/// Lifecycle phase of the head as last announced by the node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum HeadPhase {
    #[default]
    Idle,
    Initializing,
    Open,
    Closed,
    FanoutPossible,
    Final,
}

impl HeadPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            HeadPhase::Idle => "Idle",
            HeadPhase::Initializing => "Initializing",
            HeadPhase::Open => "Open",
            HeadPhase::Closed => "Closed",
            HeadPhase::FanoutPossible => "FanoutPossible",
            HeadPhase::Final => "Final",
        }
    }

    /// Row of the transition table triggered by `tag`, if any.
    pub fn transition_for(tag: EventTag) -> Option<Transition> {
        let (from, to) = match tag {
            EventTag::HeadIsInitializing => (None, HeadPhase::Initializing),
            EventTag::HeadIsAborted => (Some(HeadPhase::Initializing), HeadPhase::Idle),
            EventTag::HeadIsOpen => (Some(HeadPhase::Initializing), HeadPhase::Open),
            EventTag::HeadIsClosed => (Some(HeadPhase::Open), HeadPhase::Closed),
            EventTag::ReadyToFanout => (Some(HeadPhase::Closed), HeadPhase::FanoutPossible),
            EventTag::HeadIsFinalized => (Some(HeadPhase::FanoutPossible), HeadPhase::Final),
            _ => return None,
        };
        Some(Transition { from, to })
    }
}

impl fmt::Display for HeadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the lifecycle transition table. `from == None` means the trigger
/// is legal from every phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<HeadPhase>,
    pub to: HeadPhase,
}

impl Transition {
    pub fn is_legal_from(&self, phase: HeadPhase) -> bool {
        self.from.map_or(true, |from| from == phase)
    }
}

/// How the mirror treats a phase-changing event that arrives outside the
/// transition table's source phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransitionPolicy {
    /// Apply the event anyway and log a warning.
    #[default]
    Lenient,
    /// Reject the event, leaving the mirror untouched.
    Strict,
}

/// Result of applying a single event to the mirror.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Applied {
    /// `(previous, current)` when the event changed the phase.
    pub phase_change: Option<(HeadPhase, HeadPhase)>,
}

/// Client-side reflection of the head. Only the dispatcher mutates it; every
/// other reader works on a cloned snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MirrorState {
    pub phase: HeadPhase,
    pub peers: BTreeSet<String>,
    pub parties: Vec<Party>,
    pub head_id: Option<String>,
    /// Committed outputs per party; authoritative only while initializing.
    pub committed: CommittedLedger,
    /// Confirmed head balance; authoritative once the head is open.
    pub snapshot: UtxoSet,
    pub self_id: Option<String>,
    pub contestation_deadline: Option<DateTime<Utc>>,
    pub last_seq: Option<u64>,
}

impl MirrorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one decoded event. Under [`TransitionPolicy::Strict`] an
    /// out-of-table transition fails with [`ClientError::IllegalTransition`]
    /// before anything is touched.
    pub fn apply(
        &mut self,
        message: &ServerMessage,
        policy: TransitionPolicy,
    ) -> ClientResult<Applied> {
        let tag = message.tag();
        if let Some(transition) = HeadPhase::transition_for(tag) {
            if !transition.is_legal_from(self.phase) {
                if policy == TransitionPolicy::Strict {
                    return Err(ClientError::IllegalTransition {
                        from: self.phase,
                        trigger: tag.as_str(),
                    });
                }
                warn!(
                    %tag,
                    phase = %self.phase,
                    target = %transition.to,
                    "applying transition outside the lifecycle table"
                );
            }
        }

        self.observe_seq(message.seq, tag);
        let before = self.phase;

        match &message.event {
            ServerEvent::Greetings { me, .. } => self.on_greetings(me),
            ServerEvent::PeerConnected { peer } => self.on_peer_connected(peer),
            ServerEvent::PeerDisconnected { peer } => {
                self.peers.remove(peer);
            }
            ServerEvent::HeadIsInitializing { parties } => {
                self.on_head_initializing(message.head_id.clone(), parties)
            }
            ServerEvent::Committed { party, utxo } => self.committed.merge(&party.vkey, utxo),
            ServerEvent::HeadIsOpen { utxo } => {
                self.snapshot = utxo.clone();
                self.phase = HeadPhase::Open;
            }
            ServerEvent::HeadIsClosed {
                contestation_deadline,
                ..
            } => {
                self.contestation_deadline = Some(*contestation_deadline);
                self.phase = HeadPhase::Closed;
            }
            ServerEvent::ReadyToFanout => {
                self.contestation_deadline = None;
                self.phase = HeadPhase::FanoutPossible;
            }
            ServerEvent::HeadIsAborted { .. } => self.on_head_aborted(),
            ServerEvent::SnapshotConfirmed { snapshot, .. } => {
                self.snapshot = snapshot.utxo.clone();
            }
            ServerEvent::GetUtxoResponse { utxo } => self.snapshot = utxo.clone(),
            ServerEvent::HeadIsFinalized { utxo } => {
                // The fanned-out outputs are the last known balance of the head.
                self.snapshot = utxo.clone();
                self.phase = HeadPhase::Final;
            }
            ServerEvent::HeadIsContested { .. }
            | ServerEvent::TxValid { .. }
            | ServerEvent::TxInvalid { .. }
            | ServerEvent::InvalidInput { .. }
            | ServerEvent::PostTxOnChainFailed { .. }
            | ServerEvent::CommandFailed { .. } => {}
        }
        if tag.is_rejection() {
            warn!(
                %tag,
                seq = message.seq,
                reason = %message.event.rejection_reason().unwrap_or_default(),
                "head node rejected a request"
            );
        }

        let phase_change = (before != self.phase).then_some((before, self.phase));
        if let Some((from, to)) = phase_change {
            info!(%from, %to, head_id = ?self.head_id, "head phase changed");
        }
        debug!(%tag, seq = message.seq, phase = %self.phase, "applied server event");
        Ok(Applied { phase_change })
    }

    /// Total base-unit balance the client currently considers authoritative.
    pub fn balance(&self) -> u64 {
        match self.phase {
            HeadPhase::Initializing => self.committed.total_lovelace(),
            _ => self.snapshot.total_lovelace(),
        }
    }

    fn observe_seq(&mut self, seq: u64, tag: EventTag) {
        if let Some(last) = self.last_seq {
            if seq <= last {
                warn!(%tag, seq, last, "server sequence number did not advance");
            }
        }
        self.last_seq = Some(seq);
    }

    fn on_greetings(&mut self, me: &Party) {
        self.peers.remove(&me.vkey);
        self.self_id = Some(me.vkey.clone());
    }

    fn on_peer_connected(&mut self, peer: &str) {
        if self.self_id.as_deref() == Some(peer) {
            return;
        }
        self.peers.insert(peer.to_owned());
    }

    fn on_head_initializing(&mut self, head_id: Option<String>, parties: &[Party]) {
        self.committed.clear();
        self.snapshot.clear();
        self.head_id = head_id;
        self.parties = parties.to_vec();
        self.phase = HeadPhase::Initializing;
    }

    fn on_head_aborted(&mut self) {
        self.parties.clear();
        self.committed.clear();
        self.head_id = None;
        self.phase = HeadPhase::Idle;
    }
}
