//! Slot resolver: the per-conversation state machine.
//!
//! `step` is a pure function of (state, turn input): it never touches the store,
//! the wall clock or a collaborator. It returns the deltas to fold into the
//! store plus the outcome the reactor acts on, so replaying a turn replays its
//! result exactly.

use chrono::{NaiveDate, NaiveTime};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, error, info};

use super::entity::{Entity, EntityExtractor, EntityKind, EntitySource, EntityValue, TravelMode};
use super::error::{ErrorKind, ResolveError};
use super::event::ConversationId;
use super::intent::{IntentCandidate, IntentLabel, SlotName};
use super::normalizer::{NormalizedText, Span};
use super::state::{DialoguePhase, DialogueState, OutcomeKind, PhaseKind, StateDelta, TurnRecord};
use super::time::ReferenceClock;

const CANCEL_PHRASES: &[&[&str]] = &[
    &["cancel"],
    &["never", "mind"],
    &["nevermind"],
    &["forget", "it"],
    &["start", "over"],
    &["reset"],
];

/// Everything the resolver needs about one turn. Extraction and classification
/// run before the store lock is taken.
#[derive(Debug, Clone, Copy)]
pub struct TurnInput<'a> {
    pub text: &'a NormalizedText,
    /// Unhinted extraction of `text`.
    pub entities: &'a [Entity],
    /// Ranked, as returned by the classifier.
    pub candidates: &'a [IntentCandidate],
    pub clock: &'a ReferenceClock,
    pub sender: &'a str,
}

/// Deterministic: the same conversation turn always yields the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId {
    pub conversation: ConversationId,
    pub turn: u64,
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.conversation, self.turn)
    }
}

/// Executable request. Can only be built with every required slot filled.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    id: RequestId,
    sender: String,
    intent: IntentLabel,
    slots: BTreeMap<SlotName, EntityValue>,
    clock: ReferenceClock,
}

impl ActionRequest {
    pub fn new(
        id: RequestId,
        sender: impl Into<String>,
        intent: IntentLabel,
        slots: BTreeMap<SlotName, EntityValue>,
        clock: ReferenceClock,
    ) -> Result<Self, ResolveError> {
        if intent == IntentLabel::Unknown {
            return Err(ResolveError::StateCorrupt("UNKNOWN is never dispatched".into()));
        }
        if let Some(missing) = intent.required_slots().find(|s| !slots.contains_key(s)) {
            return Err(ResolveError::MissingSlot(missing));
        }
        if let Some(stray) = slots.keys().find(|s| !intent.accepts(**s)) {
            return Err(ResolveError::StateCorrupt(format!("slot {stray} is not part of {intent}")));
        }
        Ok(Self {
            id,
            sender: sender.into(),
            intent,
            slots,
            clock,
        })
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.id.conversation
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn intent(&self) -> IntentLabel {
        self.intent
    }

    pub fn slots(&self) -> &BTreeMap<SlotName, EntityValue> {
        &self.slots
    }

    pub fn slot(&self, name: SlotName) -> Option<&EntityValue> {
        self.slots.get(&name)
    }

    pub fn text(&self, name: SlotName) -> Option<&str> {
        self.slot(name).and_then(EntityValue::as_text)
    }

    pub fn date(&self, name: SlotName) -> Option<NaiveDate> {
        self.slot(name).and_then(EntityValue::as_date)
    }

    /// First day and length of a multi-day slot.
    pub fn range(&self, name: SlotName) -> Option<(NaiveDate, u32)> {
        self.slot(name).and_then(EntityValue::as_range)
    }

    pub fn mode(&self, name: SlotName) -> Option<TravelMode> {
        self.slot(name).and_then(EntityValue::as_mode)
    }

    pub fn time(&self, name: SlotName) -> Option<NaiveTime> {
        self.slot(name).and_then(EntityValue::as_time)
    }

    pub fn minutes(&self, name: SlotName) -> Option<u32> {
        self.slot(name).and_then(EntityValue::as_minutes)
    }

    /// The turn's reference clock, carried so collaborators resolve dates the
    /// same way extraction did.
    pub fn clock(&self) -> &ReferenceClock {
        &self.clock
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Every required slot filled; the request goes to the dispatcher.
    Ready(ActionRequest),
    Clarify { intent: IntentLabel, slot: SlotName, attempts: u8 },
    /// Nothing actionable. Never reaches the dispatcher.
    Unhandled { reason: ErrorKind },
    Cancelled { intent: Option<IntentLabel> },
    /// Clarification ran out of attempts; the pending intent was dropped.
    Abandoned { intent: IntentLabel, slot: SlotName },
}

impl TurnOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            TurnOutcome::Ready(_) => OutcomeKind::Dispatched,
            TurnOutcome::Clarify { .. } => OutcomeKind::Clarified,
            TurnOutcome::Unhandled { .. } => OutcomeKind::Unhandled,
            TurnOutcome::Cancelled { .. } => OutcomeKind::Cancelled,
            TurnOutcome::Abandoned { .. } => OutcomeKind::Abandoned,
        }
    }

    pub fn intent(&self) -> Option<IntentLabel> {
        match self {
            TurnOutcome::Ready(request) => Some(request.intent()),
            TurnOutcome::Clarify { intent, .. } | TurnOutcome::Abandoned { intent, .. } => Some(*intent),
            TurnOutcome::Cancelled { intent } => *intent,
            TurnOutcome::Unhandled { .. } => None,
        }
    }
}

/// Result of one `step`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Apply in order with `DialogueState::reduce`.
    pub deltas: Vec<StateDelta>,
    pub outcome: TurnOutcome,
    /// Phases visited, starting with the phase the turn found.
    pub path: Vec<PhaseKind>,
    /// The stored state failed validation and was reset before the turn ran.
    pub reset: bool,
}

/// Scratch copy the transition is planned against; every delta is applied to it
/// as it is emitted so later decisions see earlier ones.
struct Plan {
    scratch: DialogueState,
    deltas: Vec<StateDelta>,
    path: Vec<PhaseKind>,
    reset: bool,
}

impl Plan {
    fn new(state: &DialogueState) -> Self {
        Self {
            scratch: state.clone(),
            deltas: Vec::new(),
            path: vec![state.phase().kind()],
            reset: false,
        }
    }

    fn apply(&mut self, delta: StateDelta) {
        self.scratch.reduce(delta.clone());
        self.deltas.push(delta);
        let kind = self.scratch.phase().kind();
        if self.path.last() != Some(&kind) {
            self.path.push(kind);
        }
    }

    fn finish(mut self, outcome: TurnOutcome, clock: &ReferenceClock) -> Transition {
        self.apply(StateDelta::Record(TurnRecord {
            turn: self.scratch.turn(),
            intent: outcome.intent(),
            outcome: outcome.kind(),
            at: clock.now,
        }));
        Transition {
            deltas: self.deltas,
            outcome,
            path: self.path,
            reset: self.reset,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resolver {
    extractor: EntityExtractor,
    threshold: f32,
    max_clarifications: u8,
}

impl Resolver {
    pub fn new(extractor: EntityExtractor, threshold: f32, max_clarifications: u8) -> Self {
        Self {
            extractor,
            threshold,
            max_clarifications,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn step(&self, state: &DialogueState, input: &TurnInput<'_>) -> Transition {
        let mut plan = Plan::new(state);
        plan.apply(StateDelta::TurnStarted { at: input.clock.now });

        // 1. A corrupt state is reset, never propagated
        if let Err(err) = plan.scratch.validate_at_rest() {
            error!(conversation = %state.conversation_id(), error = %err, "dialogue state corrupt, resetting to IDLE");
            plan.apply(StateDelta::Reset);
            plan.reset = true;
        }

        // 2. Nothing to interpret
        if input.text.is_empty() {
            return plan.finish(TurnOutcome::Unhandled { reason: ErrorKind::ParseEmpty }, input.clock);
        }

        // 3. Explicit reset, from any phase
        if is_cancel(input.text) {
            let intent = plan.scratch.pending_intent();
            plan.apply(StateDelta::Clear);
            return plan.finish(TurnOutcome::Cancelled { intent }, input.clock);
        }

        // 4. Interpret
        let phase = *plan.scratch.phase();
        let outcome = match phase {
            DialoguePhase::AwaitingClarification { intent, slot, attempts } => {
                self.answer(&mut plan, input, intent, slot, attempts)
            }
            _ => self.start(&mut plan, input),
        };
        plan.finish(outcome, input.clock)
    }

    /// IDLE: begin the top intent if it clears the threshold.
    fn start(&self, plan: &mut Plan, input: &TurnInput<'_>) -> TurnOutcome {
        let Some(top) = input.candidates.first().filter(|c| c.is_actionable(self.threshold)) else {
            debug!(
                conversation = %plan.scratch.conversation_id(),
                best = ?input.candidates.first().map(|c| (c.intent, c.confidence)),
                "no intent above threshold"
            );
            return TurnOutcome::Unhandled { reason: ErrorKind::LowConfidence };
        };

        let intent = top.intent;
        plan.apply(StateDelta::Begin { intent });
        self.fill(plan, intent, input.entities, None);
        self.settle(plan, input, intent, None)
    }

    /// AWAITING_CLARIFICATION: read the turn as an answer first, a new request second.
    fn answer(
        &self,
        plan: &mut Plan,
        input: &TurnInput<'_>,
        intent: IntentLabel,
        slot: SlotName,
        attempts: u8,
    ) -> TurnOutcome {
        let hinted = self
            .extractor
            .extract_with_hint(input.text, input.clock, Some(slot.kind()));
        let entities = adjudicate(&hinted);

        let rival = input
            .candidates
            .first()
            .filter(|c| c.is_actionable(self.threshold) && c.intent != intent)
            .map(|c| c.intent);

        // A whole-utterance guess does not count as an answer when the turn plainly asks for something else
        let reply = best_for(slot, &entities, |_| true)
            .filter(|e| !(e.source == EntitySource::Fallback && rival.is_some()))
            .cloned();

        match (reply, rival) {
            (Some(entity), _) => {
                let span = entity.span;
                let kind = entity.kind();
                plan.apply(StateDelta::Fill { slot, entity });
                self.fill(plan, intent, &entities, Some((slot, span, kind)));
                self.settle(plan, input, intent, Some((slot, attempts)))
            }
            (None, Some(next)) => {
                info!(
                    conversation = %plan.scratch.conversation_id(),
                    from = %intent,
                    to = %next,
                    "subject change during clarification"
                );
                plan.apply(StateDelta::Clear);
                self.start(plan, input)
            }
            (None, None) => {
                self.fill(plan, intent, &entities, None);
                self.settle(plan, input, intent, Some((slot, attempts)))
            }
        }
    }

    /// Routes entities into the intent's slots. Values from this turn overwrite
    /// whatever an earlier turn left in the same slot.
    fn fill(
        &self,
        plan: &mut Plan,
        intent: IntentLabel,
        entities: &[Entity],
        answered: Option<(SlotName, Span, EntityKind)>,
    ) {
        let entities = adjudicate(entities);
        let schema = intent.schema();
        let sibling_cues: Vec<&str> = schema.iter().filter_map(|s| s.name.cue()).collect();
        let mut taken: Vec<(Span, EntityKind)> = answered.map(|(_, span, kind)| vec![(span, kind)]).unwrap_or_default();

        // Cued slots claim their entities before uncued siblings of the same kind
        let order = schema
            .iter()
            .filter(|s| s.name.cue().is_some())
            .chain(schema.iter().filter(|s| s.name.cue().is_none()));

        for spec in order {
            let slot = spec.name;
            if answered.is_some_and(|(s, _, _)| s == slot) {
                continue;
            }
            let pick = best_for(slot, &entities, |e| {
                let free = !taken.iter().any(|(span, kind)| clashes(*span, *kind, e));
                let routed = match slot.cue() {
                    Some(cue) => e.cue.as_deref() == Some(cue),
                    None => !e.cue.as_deref().is_some_and(|c| sibling_cues.contains(&c)),
                };
                free && routed
            });
            if let Some(entity) = pick.cloned() {
                taken.push((entity.span, entity.kind()));
                plan.apply(StateDelta::Fill { slot, entity });
            }
        }
    }

    /// SLOT_FILLING -> READY or AWAITING_CLARIFICATION. `asked` is the slot the
    /// previous turn asked for, if any, with its attempt count.
    fn settle(
        &self,
        plan: &mut Plan,
        input: &TurnInput<'_>,
        intent: IntentLabel,
        asked: Option<(SlotName, u8)>,
    ) -> TurnOutcome {
        let Some(next) = plan.scratch.outstanding().first().copied() else {
            return self.complete(plan, input, intent);
        };

        let attempts = match asked {
            Some((slot, n)) if slot == next => n.saturating_add(1),
            _ => 0,
        };
        if attempts > self.max_clarifications {
            info!(conversation = %plan.scratch.conversation_id(), %intent, slot = %next, "clarification abandoned");
            plan.apply(StateDelta::Clear);
            return TurnOutcome::Abandoned { intent, slot: next };
        }

        plan.apply(StateDelta::Await { intent, slot: next, attempts });
        TurnOutcome::Clarify { intent, slot: next, attempts }
    }

    /// READY is entered and left in the same transition: the request is built,
    /// marked in flight and the conversation goes back to IDLE.
    fn complete(&self, plan: &mut Plan, input: &TurnInput<'_>, intent: IntentLabel) -> TurnOutcome {
        let slots = plan
            .scratch
            .slots()
            .iter()
            .map(|(name, entity)| (*name, entity.value.clone()))
            .collect();
        let id = RequestId {
            conversation: plan.scratch.conversation_id().clone(),
            turn: plan.scratch.turn(),
        };

        match ActionRequest::new(id, input.sender, intent, slots, *input.clock) {
            Ok(request) => {
                plan.apply(StateDelta::Ready { intent });
                plan.apply(StateDelta::Dispatching);
                plan.apply(StateDelta::Clear);
                TurnOutcome::Ready(request)
            }
            Err(err) => {
                error!(conversation = %plan.scratch.conversation_id(), error = %err, "refusing incomplete request");
                plan.apply(StateDelta::Reset);
                plan.reset = true;
                TurnOutcome::Unhandled { reason: err.kind() }
            }
        }
    }
}

/// Identical-span conflicts between kinds: the more specific kind wins, then the
/// stronger source, then the higher confidence. Date, time and duration on one
/// span ("in 20 minutes") complement each other and are all kept, as are
/// overlapping but non-identical spans.
pub fn adjudicate(entities: &[Entity]) -> Vec<Entity> {
    entities
        .iter()
        .filter(|e| !entities.iter().any(|other| beats(other, e)))
        .cloned()
        .collect()
}

fn beats(other: &Entity, entity: &Entity) -> bool {
    if other.span != entity.span || other.kind() == entity.kind() {
        return false;
    }
    if is_temporal(other.kind()) && is_temporal(entity.kind()) {
        return false;
    }
    other
        .kind()
        .specificity()
        .cmp(&entity.kind().specificity())
        .then(other.source.rank().cmp(&entity.source.rank()))
        .then(other.confidence.total_cmp(&entity.confidence))
        .then(entity.kind().cmp(&other.kind()))
        == Ordering::Greater
}

fn is_temporal(kind: EntityKind) -> bool {
    matches!(
        kind,
        EntityKind::Date | EntityKind::DateRange | EntityKind::Time | EntityKind::Duration
    )
}

fn clashes(span: Span, kind: EntityKind, entity: &Entity) -> bool {
    if !span.overlaps(&entity.span) {
        return false;
    }
    !(is_temporal(kind) && is_temporal(entity.kind()) && kind != entity.kind())
}

/// A course code names a room, so it may stand in for a place.
fn admissible(slot: SlotName, entity: &Entity) -> bool {
    let want = slot.kind();
    entity.kind() == want || (want == EntityKind::Location && entity.kind() == EntityKind::Course)
}

/// Exact kind first, then confidence, then the earliest span.
fn best_for<'e>(slot: SlotName, entities: &'e [Entity], keep: impl Fn(&Entity) -> bool) -> Option<&'e Entity> {
    let want = slot.kind();
    entities
        .iter()
        .filter(|e| admissible(slot, e) && keep(e))
        .max_by(|a, b| {
            (a.kind() == want)
                .cmp(&(b.kind() == want))
                .then(a.confidence.total_cmp(&b.confidence))
                .then(b.span.start.cmp(&a.span.start))
        })
}

fn is_cancel(text: &NormalizedText) -> bool {
    CANCEL_PHRASES
        .iter()
        .any(|phrase| text.matches_at(0, phrase) && text.len() <= phrase.len() + 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::normalizer::Span;

    fn entity(value: EntityValue, start: usize, end: usize, source: EntitySource) -> Entity {
        Entity::new(value, Span::new(start, end), 0.8, source)
    }

    #[test]
    fn specific_kind_wins_identical_span() {
        let entities = vec![
            entity(EntityValue::Text("library".into()), 0, 7, EntitySource::Fallback),
            entity(EntityValue::Location("Campus Library".into()), 0, 7, EntitySource::GazetteerExact),
        ];
        let kept = adjudicate(&entities);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].kind(), EntityKind::Location);
    }

    #[test]
    fn date_and_time_on_one_span_both_survive() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let time = NaiveTime::from_hms_opt(9, 20, 0).unwrap();
        let entities = vec![
            entity(EntityValue::Date(date), 0, 13, EntitySource::Temporal),
            entity(EntityValue::Time(time), 0, 13, EntitySource::Temporal),
        ];
        assert_eq!(adjudicate(&entities).len(), 2);
    }

    #[test]
    fn request_refuses_missing_required_slot() {
        let clock = ReferenceClock::new(chrono::Utc::now(), chrono_tz::UTC);
        let id = RequestId {
            conversation: ConversationId::from("c"),
            turn: 1,
        };
        let err = ActionRequest::new(id, "u", IntentLabel::CreateReminder, BTreeMap::new(), clock).unwrap_err();
        assert_eq!(err, ResolveError::MissingSlot(SlotName::Time));
    }
}
