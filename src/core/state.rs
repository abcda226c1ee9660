//! Scheduler lifecycle states.
//!
//! Every public operation on the scheduler dispatches through the current
//! state, so operations that are invalid in a state are silently ignored
//! instead of being checked at every call site.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// The lifecycle states gating every public scheduler operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StateId {
    /// Engine is being initialized; operations are deferred.
    InConstruction = 0,
    /// Normal operation: enqueue admits work, workers execute.
    WorkingHard = 1,
    /// Suspension requested: running jobs continue, nothing new is handed
    /// out; becomes `Suspended` when the active count reaches zero.
    Suspending = 2,
    /// The queue accepts jobs but hands out none.
    Suspended = 3,
    /// Workers wake only to observe this state and exit.
    ShuttingDown = 4,
    /// Terminal: every queue operation is a silent no-op.
    Destructed = 5,
}

impl StateId {
    /// Stable lowercase name, used in logs and events.
    pub fn name(self) -> &'static str {
        match self {
            Self::InConstruction => "in_construction",
            Self::WorkingHard => "working_hard",
            Self::Suspending => "suspending",
            Self::Suspended => "suspended",
            Self::ShuttingDown => "shutting_down",
            Self::Destructed => "destructed",
        }
    }

    /// Whether `enqueue` admits new jobs in this state.
    pub(crate) fn accepts_jobs(self) -> bool {
        matches!(self, Self::WorkingHard | Self::Suspending | Self::Suspended)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::InConstruction,
            1 => Self::WorkingHard,
            2 => Self::Suspending,
            3 => Self::Suspended,
            4 => Self::ShuttingDown,
            _ => Self::Destructed,
        }
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lock-free cell holding the current state.
///
/// Transitions happen only while the engine mutex is held; reads may come
/// from any thread.
#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub fn new(id: StateId) -> Self {
        Self(AtomicU8::new(id as u8))
    }

    pub fn load(&self) -> StateId {
        StateId::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Store a new state, returning the previous one.
    pub fn swap(&self, id: StateId) -> StateId {
        StateId::from_u8(self.0.swap(id as u8, Ordering::AcqRel))
    }
}
