use chrono::{Duration, NaiveDate, NaiveTime};
use copilot::kernel::entity::{EntityExtractor, EntityValue};
use copilot::kernel::error::ErrorKind;
use copilot::kernel::intent::{IntentClassifier, IntentLabel, RuleClassifier, SlotName};
use copilot::kernel::normalizer::normalize;
use copilot::kernel::resolver::{Resolver, Transition, TurnInput, TurnOutcome};
use copilot::kernel::state::{DialoguePhase, DialogueState, PhaseKind, StateDelta};
use copilot::{ConversationId, ReferenceClock};

// Sunday 2024-03-10, 09:00 New York
fn clock() -> ReferenceClock {
    let local = NaiveDate::from_ymd_opt(2024, 3, 10)
        .and_then(|d| d.and_hms_opt(9, 0, 0))
        .unwrap();
    ReferenceClock::from_local(chrono_tz::America::New_York, local).unwrap()
}

fn resolver() -> Resolver {
    Resolver::new(EntityExtractor::default(), 0.5, 2)
}

fn fresh() -> DialogueState {
    DialogueState::new(ConversationId::from("alice"), clock().now, 20)
}

/// Runs one turn against `state` and folds the deltas in, as the store would.
fn turn(resolver: &Resolver, state: &mut DialogueState, raw: &str, clock: &ReferenceClock) -> Transition {
    let text = normalize(raw);
    let entities = EntityExtractor::default().extract(&text, clock);
    let candidates = RuleClassifier::default().classify(&text);
    let input = TurnInput {
        text: &text,
        entities: &entities,
        candidates: &candidates,
        clock,
        sender: "alice",
    };
    let transition = resolver.step(state, &input);
    for delta in &transition.deltas {
        state.reduce(delta.clone());
    }
    transition
}

#[test]
fn test_complete_reminder_in_one_turn() {
    let resolver = resolver();
    let mut state = fresh();

    let t = turn(&resolver, &mut state, "remind me to submit the lab report tomorrow at 5pm", &clock());

    // 1. READY with every slot the utterance carried
    let TurnOutcome::Ready(request) = &t.outcome else {
        panic!("expected READY, got {:?}", t.outcome);
    };
    assert_eq!(request.intent(), IntentLabel::CreateReminder);
    assert_eq!(request.date(SlotName::Date), NaiveDate::from_ymd_opt(2024, 3, 11));
    assert_eq!(request.time(SlotName::Time), NaiveTime::from_hms_opt(17, 0, 0));
    assert_eq!(request.text(SlotName::Task), Some("submit the lab report"));
    assert_eq!(request.id().turn, 1);

    // 2. READY is transient: the conversation is back in IDLE with the dispatch in flight
    assert_eq!(
        t.path,
        vec![PhaseKind::Idle, PhaseKind::SlotFilling, PhaseKind::Ready, PhaseKind::Idle]
    );
    assert_eq!(*state.phase(), DialoguePhase::Idle);
    assert!(state.slots().is_empty());
    assert_eq!(state.in_flight(), 1);
    assert!(state.validate_at_rest().is_ok());
}

#[test]
fn test_missing_time_is_asked_for_then_filled() {
    let resolver = resolver();
    let mut state = fresh();

    // 1. Task known, time missing
    let t = turn(&resolver, &mut state, "remind me to submit something", &clock());
    assert_eq!(
        t.outcome,
        TurnOutcome::Clarify {
            intent: IntentLabel::CreateReminder,
            slot: SlotName::Time,
            attempts: 0,
        }
    );
    assert_eq!(state.outstanding(), &[SlotName::Time]);
    assert!(state.slot(SlotName::Task).is_some(), "task should survive into the clarification");

    // 2. Bare answer fills it
    let t = turn(&resolver, &mut state, "5pm", &clock());
    let TurnOutcome::Ready(request) = &t.outcome else {
        panic!("expected READY, got {:?}", t.outcome);
    };
    assert_eq!(request.time(SlotName::Time), NaiveTime::from_hms_opt(17, 0, 0));
    assert_eq!(request.text(SlotName::Task), Some("submit something"));
    assert_eq!(request.date(SlotName::Date), None);
    assert_eq!(*state.phase(), DialoguePhase::Idle);
}

#[test]
fn test_low_confidence_is_unhandled_and_stays_idle() {
    let resolver = resolver();
    let mut state = fresh();

    let t = turn(&resolver, &mut state, "lol ok", &clock());
    assert_eq!(t.outcome, TurnOutcome::Unhandled { reason: ErrorKind::LowConfidence });
    assert_eq!(t.path, vec![PhaseKind::Idle]);
    assert_eq!(*state.phase(), DialoguePhase::Idle);
    assert_eq!(state.in_flight(), 0);
}

#[test]
fn test_empty_utterance_is_parse_empty() {
    let resolver = resolver();
    let mut state = fresh();
    let t = turn(&resolver, &mut state, "  ", &clock());
    assert_eq!(t.outcome, TurnOutcome::Unhandled { reason: ErrorKind::ParseEmpty });
}

#[test]
fn test_step_is_pure() {
    let resolver = resolver();
    let state = fresh();
    let text = normalize("where is the gym");
    let entities = EntityExtractor::default().extract(&text, &clock());
    let candidates = RuleClassifier::default().classify(&text);
    let clock = clock();
    let input = TurnInput {
        text: &text,
        entities: &entities,
        candidates: &candidates,
        clock: &clock,
        sender: "alice",
    };

    let before = state.clone();
    let first = resolver.step(&state, &input);
    let second = resolver.step(&state, &input);

    assert_eq!(first, second, "same state and input must replay identically");
    assert_eq!(state, before, "step must not mutate the stored state");
}

#[test]
fn test_cancel_from_clarification() {
    let resolver = resolver();
    let mut state = fresh();
    turn(&resolver, &mut state, "remind me to call mom", &clock());
    assert_eq!(state.phase().kind(), PhaseKind::AwaitingClarification);

    let t = turn(&resolver, &mut state, "never mind", &clock());
    assert_eq!(
        t.outcome,
        TurnOutcome::Cancelled {
            intent: Some(IntentLabel::CreateReminder)
        }
    );
    assert_eq!(*state.phase(), DialoguePhase::Idle);
    assert!(state.slots().is_empty());
}

#[test]
fn test_abandon_after_max_clarifications() {
    let resolver = resolver();
    let mut state = fresh();
    turn(&resolver, &mut state, "remind me to call mom", &clock());

    // 1. Unusable answers re-ask with a rising attempt count
    for expected in 1..=2u8 {
        let t = turn(&resolver, &mut state, "hmm", &clock());
        assert_eq!(
            t.outcome,
            TurnOutcome::Clarify {
                intent: IntentLabel::CreateReminder,
                slot: SlotName::Time,
                attempts: expected,
            }
        );
    }

    // 2. One more and the intent is dropped
    let t = turn(&resolver, &mut state, "hmm", &clock());
    assert_eq!(
        t.outcome,
        TurnOutcome::Abandoned {
            intent: IntentLabel::CreateReminder,
            slot: SlotName::Time,
        }
    );
    assert_eq!(*state.phase(), DialoguePhase::Idle);
}

#[test]
fn test_subject_change_during_clarification() {
    let resolver = resolver();
    let mut state = fresh();
    turn(&resolver, &mut state, "remind me to call mom", &clock());

    let t = turn(&resolver, &mut state, "where is the library", &clock());
    let TurnOutcome::Ready(request) = &t.outcome else {
        panic!("expected the new request to run, got {:?}", t.outcome);
    };
    assert_eq!(request.intent(), IntentLabel::FindLocation);
    assert_eq!(
        request.slot(SlotName::Place),
        Some(&EntityValue::Location("Campus Library".into()))
    );
    // Old slots are gone
    assert!(request.slot(SlotName::Task).is_none());
}

#[test]
fn test_answer_can_carry_extra_slots() {
    let resolver = resolver();
    let mut state = fresh();
    turn(&resolver, &mut state, "remind me to call mom", &clock());

    let t = turn(&resolver, &mut state, "6pm on friday", &clock());
    let TurnOutcome::Ready(request) = &t.outcome else {
        panic!("expected READY, got {:?}", t.outcome);
    };
    assert_eq!(request.time(SlotName::Time), NaiveTime::from_hms_opt(18, 0, 0));
    assert_eq!(request.date(SlotName::Date), NaiveDate::from_ymd_opt(2024, 3, 15));
    assert_eq!(request.text(SlotName::Task), Some("call mom"));
}

#[test]
fn test_unknown_place_falls_back_to_reply() {
    let resolver = resolver();
    let mut state = fresh();

    let t = turn(&resolver, &mut state, "where is it", &clock());
    assert_eq!(
        t.outcome,
        TurnOutcome::Clarify {
            intent: IntentLabel::FindLocation,
            slot: SlotName::Place,
            attempts: 0,
        }
    );

    let t = turn(&resolver, &mut state, "the observatory", &clock());
    let TurnOutcome::Ready(request) = &t.outcome else {
        panic!("expected READY, got {:?}", t.outcome);
    };
    assert_eq!(
        request.slot(SlotName::Place),
        Some(&EntityValue::Location("observatory".into()))
    );
}

#[test]
fn test_origin_and_destination_follow_cues() {
    let resolver = resolver();
    let mut state = fresh();

    let t = turn(&resolver, &mut state, "how do i get to the gym from the library", &clock());
    let TurnOutcome::Ready(request) = &t.outcome else {
        panic!("expected READY, got {:?}", t.outcome);
    };
    assert_eq!(
        request.slot(SlotName::Destination),
        Some(&EntityValue::Location("Campus Gymnasium".into()))
    );
    assert_eq!(
        request.slot(SlotName::Origin),
        Some(&EntityValue::Location("Campus Library".into()))
    );
}

#[test]
fn test_course_code_stands_in_for_place() {
    let resolver = resolver();
    let mut state = fresh();

    let t = turn(&resolver, &mut state, "where is cs101", &clock());
    let TurnOutcome::Ready(request) = &t.outcome else {
        panic!("expected READY, got {:?}", t.outcome);
    };
    assert_eq!(request.slot(SlotName::Place), Some(&EntityValue::Course("CS101".into())));
}

#[test]
fn test_corrupt_state_is_reset_not_propagated() {
    let resolver = resolver();
    let mut state = fresh();
    // SLOT_FILLING never survives a transition; finding it at rest means corruption
    state.reduce(StateDelta::Begin { intent: IntentLabel::FindLocation });
    assert!(state.validate_at_rest().is_err());

    let t = turn(&resolver, &mut state, "lol ok", &clock());
    assert!(t.reset, "corrupt state should be flagged");
    assert_eq!(t.outcome, TurnOutcome::Unhandled { reason: ErrorKind::LowConfidence });
    assert_eq!(*state.phase(), DialoguePhase::Idle);
    assert!(state.validate_at_rest().is_ok());
}

#[test]
fn test_history_records_each_turn_without_text() {
    let resolver = resolver();
    let mut state = fresh();
    let later = ReferenceClock::new(clock().now + Duration::minutes(1), clock().tz);

    turn(&resolver, &mut state, "hello", &clock());
    turn(&resolver, &mut state, "lol ok", &later);

    let records: Vec<_> = state.history().collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].intent, Some(IntentLabel::Smalltalk));
    assert_eq!(records[1].intent, None);
    assert_eq!(state.turn(), 2);
}
