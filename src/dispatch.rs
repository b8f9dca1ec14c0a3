//! Routes decoded server events into the mirror and fans live ones out.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::errors::ClientResult;
use crate::events::{EventTag, ServerMessage};
use crate::listeners::{ListenerFailure, ListenerRegistry};
use crate::replay::ReplayGate;
use crate::state::{HeadPhase, MirrorState, TransitionPolicy};

/// What happened to an event after it was applied to the mirror.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fanout {
    /// Replay still in progress; listeners were not told.
    Suppressed,
    /// Every subscriber was invoked; `failures` lists those that failed.
    Delivered { failures: Vec<ListenerFailure> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dispatched {
    pub tag: EventTag,
    pub seq: u64,
    /// Set on the single event that completed the history replay.
    pub history_complete: bool,
    pub phase_change: Option<(HeadPhase, HeadPhase)>,
    pub fanout: Fanout,
}

/// Single writer of the mirror. The session loop feeds it one record at a time
/// and waits for each call to return before pulling the next.
#[derive(Clone)]
pub struct EventDispatcher {
    mirror: Arc<RwLock<MirrorState>>,
    gate: Arc<Mutex<ReplayGate>>,
    listeners: Arc<ListenerRegistry>,
    policy: TransitionPolicy,
}

impl EventDispatcher {
    pub fn new(
        mirror: Arc<RwLock<MirrorState>>,
        gate: Arc<Mutex<ReplayGate>>,
        listeners: Arc<ListenerRegistry>,
        policy: TransitionPolicy,
    ) -> Self {
        Self {
            mirror,
            gate,
            listeners,
            policy,
        }
    }

    /// Decodes and dispatches one raw text record. Decoding failures surface
    /// before the mirror is touched.
    pub fn dispatch_raw(&self, raw: &str) -> ClientResult<Dispatched> {
        let message = ServerMessage::decode(raw)?;
        self.dispatch(&message)
    }

    pub fn dispatch(&self, message: &ServerMessage) -> ClientResult<Dispatched> {
        let tag = message.tag();
        let applied = self.mirror.write().apply(message, self.policy)?;

        // The gate is consulted after the handler ran, so the greeting that
        // ends the replay is forwarded as the first live event.
        let (history_complete, forward) = {
            let mut gate = self.gate.lock();
            let completed = gate.observe(tag);
            (completed, gate.should_forward())
        };
        if history_complete {
            let mirror = self.mirror.read();
            info!(
                seq = message.seq,
                phase = %mirror.phase,
                self_id = ?mirror.self_id,
                "history replay complete"
            );
        }

        let fanout = if forward {
            let failures = self.listeners.notify(message);
            for failure in &failures {
                warn!(
                    subscription = %failure.subscription,
                    %tag,
                    seq = failure.seq,
                    reason = %failure.reason,
                    "listener failed while handling event"
                );
            }
            Fanout::Delivered { failures }
        } else {
            Fanout::Suppressed
        };

        Ok(Dispatched {
            tag,
            seq: message.seq,
            history_complete,
            phase_change: applied.phase_change,
            fanout,
        })
    }

    pub fn is_live(&self) -> bool {
        self.gate.lock().is_live()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ClientError;
    use crate::events::DecodeError;

    struct Harness {
        dispatcher: EventDispatcher,
        mirror: Arc<RwLock<MirrorState>>,
        listeners: Arc<ListenerRegistry>,
    }

    fn harness(policy: TransitionPolicy) -> Harness {
        let mirror = Arc::new(RwLock::new(MirrorState::new()));
        let listeners = Arc::new(ListenerRegistry::new());
        let dispatcher = EventDispatcher::new(
            Arc::clone(&mirror),
            Arc::new(Mutex::new(ReplayGate::new())),
            Arc::clone(&listeners),
            policy,
        );
        Harness {
            dispatcher,
            mirror,
            listeners,
        }
    }

    fn record(seq: u64, body: &str) -> String {
        format!(r#"{{"seq":{seq},"timestamp":"2024-03-01T10:00:00Z","headId":"h1",{body}}}"#)
    }

    fn counting(listeners: &ListenerRegistry) -> Arc<Mutex<Vec<EventTag>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        listeners.subscribe(move |message| {
            sink.lock().push(message.tag());
            Ok(())
        });
        seen
    }

    #[test]
    fn replayed_events_apply_without_notifying() {
        let h = harness(TransitionPolicy::Lenient);
        let seen = counting(&h.listeners);

        let first = h
            .dispatcher
            .dispatch_raw(&record(
                1,
                r#""tag":"HeadIsInitializing","parties":[{"vkey":"alice"}]"#,
            ))
            .expect("dispatch");
        h.dispatcher
            .dispatch_raw(&record(2, r#""tag":"PeerConnected","peer":"node-b""#))
            .expect("dispatch");

        assert_eq!(first.fanout, Fanout::Suppressed);
        assert!(seen.lock().is_empty());
        assert_eq!(h.mirror.read().phase, HeadPhase::Initializing);
        assert!(h.mirror.read().peers.contains("node-b"));
        assert!(!h.dispatcher.is_live());
    }

    #[test]
    fn greeting_opens_the_gate_and_is_forwarded() {
        let h = harness(TransitionPolicy::Lenient);
        let seen = counting(&h.listeners);

        let greeting = h
            .dispatcher
            .dispatch_raw(&record(3, r#""tag":"Greetings","me":{"vkey":"alice"}"#))
            .expect("dispatch");
        let valid = h
            .dispatcher
            .dispatch_raw(&record(4, r#""tag":"TxValid","transaction":{"id":"tx1"}"#))
            .expect("dispatch");

        assert!(greeting.history_complete);
        assert!(!valid.history_complete);
        assert_eq!(*seen.lock(), vec![EventTag::Greetings, EventTag::TxValid]);
        assert!(h.dispatcher.is_live());
    }

    #[test]
    fn unknown_tag_never_reaches_the_mirror() {
        let h = harness(TransitionPolicy::Lenient);
        let before = h.mirror.read().clone();

        let err = h
            .dispatcher
            .dispatch_raw(&record(1, r#""tag":"Bogus""#))
            .expect_err("unknown tag");

        assert!(matches!(err, ClientError::Decode(DecodeError::UnknownTag(_))));
        assert!(err.is_fatal());
        assert_eq!(*h.mirror.read(), before);
    }

    #[test]
    fn strict_rejection_is_recoverable_and_not_forwarded() {
        let h = harness(TransitionPolicy::Strict);
        h.dispatcher
            .dispatch_raw(&record(1, r#""tag":"Greetings","me":{"vkey":"alice"}"#))
            .expect("dispatch");
        let seen = counting(&h.listeners);

        let err = h
            .dispatcher
            .dispatch_raw(&record(2, r#""tag":"ReadyToFanout""#))
            .expect_err("fanout while idle");

        assert!(!err.is_fatal());
        assert!(seen.lock().is_empty());
        assert_eq!(h.mirror.read().phase, HeadPhase::Idle);
    }

    #[test]
    fn listener_failures_are_reported() {
        let h = harness(TransitionPolicy::Lenient);
        h.listeners
            .subscribe(|_| Err(anyhow::anyhow!("downstream unavailable")));
        let seen = counting(&h.listeners);

        let dispatched = h
            .dispatcher
            .dispatch_raw(&record(1, r#""tag":"Greetings","me":{"vkey":"alice"}"#))
            .expect("dispatch");

        match dispatched.fanout {
            Fanout::Delivered { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].reason, "downstream unavailable");
            }
            Fanout::Suppressed => panic!("greeting must be forwarded"),
        }
        assert_eq!(*seen.lock(), vec![EventTag::Greetings]);
        assert_eq!(h.mirror.read().self_id.as_deref(), Some("alice"));
    }
}
