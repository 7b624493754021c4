//! The line state machine: the authoritative operational mode, with
//! precedence-based arbitration of concurrent triggers.
//!
//! Per the Design Note in `spec.md` §9 ("State machine as ad-hoc
//! branches"), transition selection is a pure function over an
//! explicit precedence table, not a chain of if/else branches.

use crate::clock::VirtualInstant;

/// The nine operational modes of the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineState {
    Idle,
    Running,
    Microstop,
    Stopped,
    Fault,
    Changeover,
    Cip,
    Starved,
    Blocked,
}

/// Highest-precedence first, per `spec.md` §4.5.
pub const PRECEDENCE: [LineState; 9] = [
    LineState::Fault,
    LineState::Cip,
    LineState::Changeover,
    LineState::Blocked,
    LineState::Starved,
    LineState::Stopped,
    LineState::Microstop,
    LineState::Running,
    LineState::Idle,
];

impl LineState {
    pub fn precedence_rank(self) -> usize {
        PRECEDENCE
            .iter()
            .position(|&s| s == self)
            .expect("PRECEDENCE enumerates every LineState")
    }

    pub fn register_code(self) -> u16 {
        use crate::registers::line_state_code::*;
        match self {
            LineState::Idle => IDLE,
            LineState::Running => RUNNING,
            LineState::Microstop => MICROSTOP,
            // STARVED/BLOCKED fold into STOPPED on the register
            // surface, distinguished via the `starved_or_blocked`
            // register; see SPEC_FULL.md's resolution of this Open
            // Question.
            LineState::Stopped | LineState::Starved | LineState::Blocked => STOPPED,
            LineState::Fault => FAULT,
            LineState::Changeover => CHANGEOVER,
            LineState::Cip => CIP,
        }
    }
}

/// Select the highest-precedence state among the currently active
/// triggers. Returns `None` when the selected state equals `current`
/// (per `spec.md` §4.5: "if the selected state equals the current
/// state no transition is emitted") or when no trigger is active.
pub fn select(candidates: &[LineState], current: LineState) -> Option<LineState> {
    let target = candidates
        .iter()
        .copied()
        .min_by_key(|s| s.precedence_rank())?;
    if target == current {
        None
    } else {
        Some(target)
    }
}

/// An open or closed stop/microstop/fault episode.
#[derive(Debug, Clone)]
pub struct StopEpisode {
    pub stop_code: String,
    pub start_ts: VirtualInstant,
    pub end_ts: Option<VirtualInstant>,
}

impl StopEpisode {
    pub fn open(stop_code: impl Into<String>, start_ts: VirtualInstant) -> Self {
        Self {
            stop_code: stop_code.into(),
            start_ts,
            end_ts: None,
        }
    }

    /// Close the episode and return its exact duration in milliseconds.
    pub fn close(&mut self, end_ts: VirtualInstant) -> u64 {
        self.end_ts = Some(end_ts);
        end_ts.saturating_duration_since(self.start_ts).as_millis() as u64
    }
}
