//! Gate separating the history replay sent on connect from live operation.

use crate::events::EventTag;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplayPhase {
    #[default]
    ReplayingHistory,
    Live,
}

/// On connect the node resends its whole event history before greeting the
/// client. The gate stays closed until that greeting, so listeners only ever
/// observe the converged stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReplayGate {
    phase: ReplayPhase,
}

impl ReplayGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ReplayPhase {
        self.phase
    }

    pub fn is_live(&self) -> bool {
        self.phase == ReplayPhase::Live
    }

    /// Records that an event with `tag` has been applied to the mirror.
    /// Returns `true` exactly once: when this event completed the replay.
    pub fn observe(&mut self, tag: EventTag) -> bool {
        if self.phase == ReplayPhase::ReplayingHistory && tag == EventTag::Greetings {
            self.phase = ReplayPhase::Live;
            return true;
        }
        false
    }

    /// Whether the event just observed should reach listeners. Consulted after
    /// [`observe`](Self::observe), so the greeting that opens the gate is
    /// itself forwarded.
    pub fn should_forward(&self) -> bool {
        self.is_live()
    }
}
