use std::collections::{BTreeMap, VecDeque};

use super::event::{DispatchOutcome, StateResetCause, TelemetryEvent};
use crate::kernel::error::ErrorKind;
use crate::kernel::state::{OutcomeKind, PhaseKind};

#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    pub turn_stats: TurnStats,
    pub dialogue_stats: DialogueStats,
    pub dispatch_stats: DispatchStats,
    pub unhandled_stats: UnhandledStats,
}

#[derive(Debug, Clone, Default)]
pub struct TurnStats {
    pub total: u64,
    pub dispatched: u64,
    pub clarified: u64,
    pub unhandled: u64,
    pub cancelled: u64,
    pub abandoned: u64,
}

#[derive(Debug, Clone, Default)]
pub struct DialogueStats {
    pub clarifications: u64,
    /// Clarifications that were a repeat ask for the same slot.
    pub repeated_asks: u64,
    pub entered_awaiting: u64,
    pub corrupt_resets: u64,
    pub requested_resets: u64,
    pub evicted: u64,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    pub count: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Calls that needed more than one attempt.
    pub retried: u64,
    pub total_latency_ms: u64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: u64,
    pub failures: BTreeMap<ErrorKind, u64>,
}

#[derive(Debug, Clone, Default)]
pub struct UnhandledStats {
    pub parse_empty: u64,
    pub low_confidence: u64,
}

pub fn compute_snapshot(events: &VecDeque<TelemetryEvent>) -> TelemetrySnapshot {
    let mut snap = TelemetrySnapshot::default();

    for event in events {
        match event {
            TelemetryEvent::TurnCompleted { outcome } => {
                snap.turn_stats.total += 1;
                match outcome {
                    OutcomeKind::Dispatched => snap.turn_stats.dispatched += 1,
                    OutcomeKind::Clarified => snap.turn_stats.clarified += 1,
                    OutcomeKind::Unhandled => snap.turn_stats.unhandled += 1,
                    OutcomeKind::Cancelled => snap.turn_stats.cancelled += 1,
                    OutcomeKind::Abandoned => snap.turn_stats.abandoned += 1,
                }
            }
            TelemetryEvent::PhaseTransition { to, .. } => {
                if *to == PhaseKind::AwaitingClarification {
                    snap.dialogue_stats.entered_awaiting += 1;
                }
            }
            TelemetryEvent::Clarification { attempts, .. } => {
                snap.dialogue_stats.clarifications += 1;
                if *attempts > 0 {
                    snap.dialogue_stats.repeated_asks += 1;
                }
            }
            TelemetryEvent::Unhandled { reason } => match reason {
                ErrorKind::ParseEmpty => snap.unhandled_stats.parse_empty += 1,
                ErrorKind::LowConfidence => snap.unhandled_stats.low_confidence += 1,
                _ => {}
            },
            TelemetryEvent::Dispatch {
                outcome,
                attempts,
                latency_ms,
                ..
            } => {
                let stats = &mut snap.dispatch_stats;
                stats.count += 1;
                stats.total_latency_ms += latency_ms;
                stats.max_latency_ms = stats.max_latency_ms.max(*latency_ms);
                if *attempts > 1 {
                    stats.retried += 1;
                }
                match outcome {
                    DispatchOutcome::Success => stats.succeeded += 1,
                    DispatchOutcome::Failed(kind) => {
                        stats.failed += 1;
                        *stats.failures.entry(*kind).or_default() += 1;
                    }
                }
            }
            TelemetryEvent::StateReset { cause } => match cause {
                StateResetCause::Corrupt => snap.dialogue_stats.corrupt_resets += 1,
                StateResetCause::Requested => snap.dialogue_stats.requested_resets += 1,
            },
            TelemetryEvent::Evicted { count } => {
                snap.dialogue_stats.evicted += *count as u64;
            }
        }
    }

    if snap.dispatch_stats.count > 0 {
        snap.dispatch_stats.avg_latency_ms =
            snap.dispatch_stats.total_latency_ms as f64 / snap.dispatch_stats.count as f64;
    }

    snap
}
