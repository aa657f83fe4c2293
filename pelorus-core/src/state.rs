//! Radar power state tracking
//!
//! The power state is driven by two inputs only: decoded status reports and
//! explicit operator requests. Transitions are validated so that a radar never
//! appears to jump straight from off to transmitting; magnetrons need a
//! standby or warm-up phase first, and a report claiming otherwise is either
//! stale or corrupt.

use serde::{Deserialize, Serialize};

/// Power state of the radar.
///
/// Not every vendor uses every state: solid-state radars never report
/// `WarmingUp`, and `WakingUp` only occurs on radars that support power-on
/// over the network from a sleeping scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadarState {
    #[default]
    Off,
    Standby,
    WarmingUp,
    Transmit,
    WakingUp,
}

impl RadarState {
    /// Whether a transition into `next` is plausible. Off never goes
    /// directly to Transmit; everything else is allowed, including
    /// self-transitions (reports repeat the current state continuously).
    pub fn can_transition_to(self, next: RadarState) -> bool {
        !(self == RadarState::Off && next == RadarState::Transmit)
    }

    pub fn is_transmitting(self) -> bool {
        self == RadarState::Transmit
    }
}

impl std::fmt::Display for RadarState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RadarState::Off => "off",
            RadarState::Standby => "standby",
            RadarState::WarmingUp => "warming up",
            RadarState::Transmit => "transmit",
            RadarState::WakingUp => "waking up",
        };
        f.write_str(s)
    }
}

/// Tracks the radar power state together with a generation counter, in the
/// same versioned-snapshot shape as a control item.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTracker {
    state: RadarState,
    generation: u64,
    #[serde(skip)]
    consumed: u64,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RadarState {
        self.state
    }

    /// Apply a state decoded from a report. An implausible transition is
    /// rejected and the current state kept; the next report will usually
    /// carry the intermediate state that was missed.
    pub fn observe(&mut self, next: RadarState) -> bool {
        if next == self.state {
            return false;
        }
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.generation += 1;
        true
    }

    /// Force the state, bypassing transition checks. Used when the receive
    /// loop loses the radar and regresses to off.
    pub fn reset(&mut self) {
        if self.state != RadarState::Off {
            self.state = RadarState::Off;
            self.generation += 1;
        }
    }

    /// Hand the newest state to the polling consumer, at most once per change.
    pub fn take_update(&mut self) -> Option<RadarState> {
        if self.generation == self.consumed {
            return None;
        }
        self.consumed = self.generation;
        Some(self.state)
    }
}
