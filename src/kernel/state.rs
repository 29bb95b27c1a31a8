use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use super::entity::Entity;
use super::error::ResolveError;
use super::event::ConversationId;
use super::intent::{IntentLabel, SlotName};

/// Per-conversation position in the slot-filling machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialoguePhase {
    Idle,
    SlotFilling { intent: IntentLabel },
    AwaitingClarification { intent: IntentLabel, slot: SlotName, attempts: u8 },
    /// Transient: entered and left inside one transition.
    Ready { intent: IntentLabel },
}

/// Content-free projection of `DialoguePhase`, used for telemetry and traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhaseKind {
    Idle,
    SlotFilling,
    AwaitingClarification,
    Ready,
}

impl DialoguePhase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            DialoguePhase::Idle => PhaseKind::Idle,
            DialoguePhase::SlotFilling { .. } => PhaseKind::SlotFilling,
            DialoguePhase::AwaitingClarification { .. } => PhaseKind::AwaitingClarification,
            DialoguePhase::Ready { .. } => PhaseKind::Ready,
        }
    }

    pub fn intent(&self) -> Option<IntentLabel> {
        match self {
            DialoguePhase::Idle => None,
            DialoguePhase::SlotFilling { intent }
            | DialoguePhase::AwaitingClarification { intent, .. }
            | DialoguePhase::Ready { intent } => Some(*intent),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeKind {
    Dispatched,
    Clarified,
    Unhandled,
    Cancelled,
    Abandoned,
}

/// One line of conversation history. No user text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn: u64,
    pub intent: Option<IntentLabel>,
    pub outcome: OutcomeKind,
    pub at: DateTime<Utc>,
}

/// Strict state delta. This is the ONLY way dialogue state mutates.
#[derive(Debug, Clone, PartialEq)]
pub enum StateDelta {
    TurnStarted { at: DateTime<Utc> },
    /// Fresh intent: slots from any previous intent are dropped.
    Begin { intent: IntentLabel },
    Fill { slot: SlotName, entity: Entity },
    Await { intent: IntentLabel, slot: SlotName, attempts: u8 },
    Ready { intent: IntentLabel },
    /// Back to IDLE, pending intent and slots dropped.
    Clear,
    /// An action request left the lock and is on its way to a collaborator.
    Dispatching,
    Completed { intent: IntentLabel, success: bool, at: DateTime<Utc> },
    Record(TurnRecord),
    /// Recovery from a corrupt state: IDLE with nothing carried over.
    Reset,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogueState {
    conversation_id: ConversationId,
    phase: DialoguePhase,
    slots: HashMap<SlotName, Entity>,
    outstanding: Vec<SlotName>,
    turn: u64,
    last_updated: DateTime<Utc>,
    last_resolved: Option<IntentLabel>,
    history: VecDeque<TurnRecord>,
    history_len: usize,
    in_flight: u32,
    // Monotonic, bumped by every reduction
    version: u64,
}

impl DialogueState {
    pub fn new(conversation_id: ConversationId, now: DateTime<Utc>, history_len: usize) -> Self {
        Self {
            conversation_id,
            phase: DialoguePhase::Idle,
            slots: HashMap::new(),
            outstanding: Vec::new(),
            turn: 0,
            last_updated: now,
            last_resolved: None,
            history: VecDeque::with_capacity(history_len),
            history_len,
            in_flight: 0,
            version: 0,
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn phase(&self) -> &DialoguePhase {
        &self.phase
    }

    pub fn pending_intent(&self) -> Option<IntentLabel> {
        self.phase.intent()
    }

    pub fn slots(&self) -> &HashMap<SlotName, Entity> {
        &self.slots
    }

    pub fn slot(&self, name: SlotName) -> Option<&Entity> {
        self.slots.get(&name)
    }

    /// Unfilled required slots, in prompt order.
    pub fn outstanding(&self) -> &[SlotName] {
        &self.outstanding
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn last_resolved(&self) -> Option<IntentLabel> {
        self.last_resolved
    }

    pub fn history(&self) -> impl Iterator<Item = &TurnRecord> {
        self.history.iter()
    }

    /// Dispatches that left the lock and have not folded back yet.
    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_updated
    }

    /// Untouched for strictly longer than `timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.idle_for(now) > timeout
    }

    /// Structural invariants that must hold after every transition.
    pub fn validate(&self) -> Result<(), ResolveError> {
        let corrupt = |msg: String| Err(ResolveError::StateCorrupt(msg));

        let Some(intent) = self.phase.intent() else {
            if !self.slots.is_empty() || !self.outstanding.is_empty() {
                return corrupt("idle conversation carries slots".into());
            }
            return Ok(());
        };

        if intent == IntentLabel::Unknown {
            return corrupt("UNKNOWN cannot be pending".into());
        }
        if let Some(slot) = self.slots.keys().find(|s| !intent.accepts(**s)) {
            return corrupt(format!("slot {slot} is not part of {intent}"));
        }
        let expected: Vec<SlotName> = intent
            .required_slots()
            .filter(|s| !self.slots.contains_key(s))
            .collect();
        if expected != self.outstanding {
            return corrupt(format!("outstanding slots out of sync for {intent}"));
        }

        match self.phase {
            DialoguePhase::AwaitingClarification { slot, .. } if self.outstanding.first() != Some(&slot) => {
                corrupt(format!("awaiting {slot}, which is not the next outstanding slot"))
            }
            DialoguePhase::Ready { .. } if !self.outstanding.is_empty() => {
                corrupt("ready with outstanding slots".into())
            }
            _ => Ok(()),
        }
    }

    /// `validate` plus the phases allowed between turns. SLOT_FILLING and READY
    /// never survive the transition that entered them.
    pub fn validate_at_rest(&self) -> Result<(), ResolveError> {
        self.validate()?;
        match self.phase {
            DialoguePhase::SlotFilling { intent } | DialoguePhase::Ready { intent } => Err(
                ResolveError::StateCorrupt(format!("{intent} left mid-transition")),
            ),
            _ => Ok(()),
        }
    }

    /// Pure reduction: State + Delta -> Mutated State
    pub fn reduce(&mut self, delta: StateDelta) {
        self.version += 1;

        match delta {
            StateDelta::TurnStarted { at } => {
                self.turn += 1;
                self.last_updated = at;
            }
            StateDelta::Begin { intent } => {
                self.phase = DialoguePhase::SlotFilling { intent };
                self.slots.clear();
                self.outstanding = intent.required_slots().collect();
            }
            StateDelta::Fill { slot, entity } => {
                self.slots.insert(slot, entity);
                self.outstanding.retain(|s| *s != slot);
            }
            StateDelta::Await { intent, slot, attempts } => {
                self.phase = DialoguePhase::AwaitingClarification { intent, slot, attempts };
            }
            StateDelta::Ready { intent } => {
                self.phase = DialoguePhase::Ready { intent };
                self.last_resolved = Some(intent);
            }
            StateDelta::Clear => self.clear(),
            StateDelta::Dispatching => {
                self.in_flight += 1;
            }
            StateDelta::Completed { intent, success, at } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                if success {
                    self.last_resolved = Some(intent);
                }
                if at > self.last_updated {
                    self.last_updated = at;
                }
            }
            StateDelta::Record(record) => {
                if self.history_len == 0 {
                    return;
                }
                while self.history.len() >= self.history_len {
                    self.history.pop_front();
                }
                self.history.push_back(record);
            }
            StateDelta::Reset => {
                self.clear();
                self.last_resolved = None;
            }
        }
    }

    fn clear(&mut self) {
        self.phase = DialoguePhase::Idle;
        self.slots.clear();
        self.outstanding.clear();
    }
}
