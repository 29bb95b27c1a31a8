use serde::{Deserialize, Serialize};

use crate::kernel::error::ErrorKind;
use crate::kernel::intent::{IntentLabel, SlotName};
use crate::kernel::state::{OutcomeKind, PhaseKind};

// Allowed: enums, durations, counts
// Forbidden: utterance text, entity values, conversation or sender ids

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    PhaseTransition {
        from: PhaseKind,
        to: PhaseKind,
    },

    Clarification {
        intent: IntentLabel,
        slot: SlotName,
        attempts: u8,
    },

    Unhandled {
        reason: ErrorKind,
    },

    Dispatch {
        intent: IntentLabel,
        outcome: DispatchOutcome,
        attempts: u32,
        latency_ms: u64,
    },

    StateReset {
        cause: StateResetCause,
    },

    Evicted {
        count: usize,
    },

    TurnCompleted {
        outcome: OutcomeKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchOutcome {
    Success,
    Failed(ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateResetCause {
    /// Stored state failed validation at the start of a turn.
    Corrupt,
    /// Explicit session reset from the transport.
    Requested,
}
