use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use copilot::kernel::dispatcher::{ActionPayload, ActionResult};
use copilot::kernel::entity::TravelMode;
use copilot::kernel::error::{CollaboratorError, ErrorKind};
use copilot::kernel::intent::{IntentLabel, SlotName};
use copilot::kernel::resolver::TurnOutcome;
use copilot::kernel::state::{DialoguePhase, PhaseKind};
use copilot::kernel::sweeper::EvictionSweeper;
use copilot::services::calendar::InMemoryCalendar;
use copilot::services::{Collaborators, MapsService, Place, Route};
use copilot::{ConversationId, Copilot, CopilotConfig, ReplyKind, TurnReport, Utterance};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// 2024-03-10 09:00 America/New_York (EDT, after the switch)
fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 13, 0, 0).unwrap()
}

fn copilot() -> Copilot {
    let config = CopilotConfig::default();
    Copilot::new(&config, Collaborators::campus_defaults(&config)).unwrap()
}

/// Accepts every call and never answers.
struct StalledMaps;

#[async_trait]
impl MapsService for StalledMaps {
    async fn find_location(&self, _query: &str) -> Result<Place, CollaboratorError> {
        std::future::pending().await
    }

    async fn directions(&self, _from: &str, _to: &str, _mode: TravelMode) -> Result<Route, CollaboratorError> {
        std::future::pending().await
    }
}

async fn say(copilot: &Copilot, conversation: &str, text: &str, at: DateTime<Utc>) -> TurnReport {
    copilot
        .respond(&Utterance::new(conversation, "alice", text, at))
        .await
}

#[tokio::test]
async fn test_reminder_in_one_turn() {
    let copilot = copilot();

    let report = say(&copilot, "c1", "remind me to submit the lab report tomorrow at 5pm", t0()).await;

    // 1. Resolved and dispatched in the same turn
    let TurnOutcome::Ready(request) = &report.outcome else {
        panic!("expected READY, got {:?}", report.outcome);
    };
    assert_eq!(request.intent(), IntentLabel::CreateReminder);
    assert_eq!(request.text(SlotName::Task), Some("submit the lab report"));
    assert_eq!(report.path.last(), Some(&PhaseKind::Idle));
    assert!(report.path.contains(&PhaseKind::Ready));

    // 2. The calendar accepted it and the user hears about it
    let dispatch = report.dispatch.as_ref().expect("READY turns are dispatched");
    assert!(matches!(
        dispatch.result,
        ActionResult::Success(ActionPayload::ReminderCreated { .. })
    ));
    assert_eq!(report.reply.kind, ReplyKind::Answer);
    assert!(report.reply.text.contains("submit the lab report"), "{}", report.reply.text);
    assert!(report.reply.text.contains("5:00 PM"), "{}", report.reply.text);

    // 3. State is back to IDLE with nothing in flight
    let state = copilot.store().get(&ConversationId::from("c1")).unwrap();
    assert_eq!(*state.phase(), DialoguePhase::Idle);
    assert_eq!(state.in_flight(), 0);
    assert_eq!(state.last_resolved(), Some(IntentLabel::CreateReminder));
}

#[tokio::test]
async fn test_clarification_round_trip() {
    let copilot = copilot();

    // 1. Missing time: asked for, nothing dispatched
    let report = say(&copilot, "c2", "remind me to submit something", t0()).await;
    assert_eq!(
        report.outcome,
        TurnOutcome::Clarify {
            intent: IntentLabel::CreateReminder,
            slot: SlotName::Time,
            attempts: 0,
        }
    );
    assert!(report.dispatch.is_none());
    assert_eq!(report.reply.kind, ReplyKind::Clarification);
    assert_eq!(report.reply.text, "What time should I remind you?");

    // 2. The answer completes it
    let report = say(&copilot, "c2", "5pm", t0() + Duration::minutes(1)).await;
    assert!(matches!(report.outcome, TurnOutcome::Ready(_)), "{:?}", report.outcome);
    assert_eq!(report.reply.kind, ReplyKind::Answer);
}

#[tokio::test]
async fn test_gibberish_is_unhandled_without_dispatch() {
    let copilot = copilot();

    let report = say(&copilot, "c3", "lol ok", t0()).await;
    assert_eq!(report.outcome, TurnOutcome::Unhandled { reason: ErrorKind::LowConfidence });
    assert!(report.dispatch.is_none());
    assert_eq!(report.reply.kind, ReplyKind::Unhandled);
    assert!(report.reply.text.contains("remind me"), "help text should offer an example");
}

#[tokio::test]
async fn test_cancel_mid_clarification() {
    let copilot = copilot();
    say(&copilot, "c4", "remind me to call mom", t0()).await;

    let report = say(&copilot, "c4", "cancel", t0() + Duration::minutes(1)).await;
    assert_eq!(report.reply.kind, ReplyKind::Acknowledgement);
    let state = copilot.store().get(&ConversationId::from("c4")).unwrap();
    assert_eq!(*state.phase(), DialoguePhase::Idle);
}

#[tokio::test]
async fn test_repeat_ask_then_abandon() {
    let copilot = copilot();
    say(&copilot, "c5", "remind me to call mom", t0()).await;

    let report = say(&copilot, "c5", "hmm", t0()).await;
    assert!(report.reply.text.starts_with("Sorry, I didn't catch that."));

    say(&copilot, "c5", "hmm", t0()).await;
    let report = say(&copilot, "c5", "hmm", t0()).await;
    assert!(matches!(report.outcome, TurnOutcome::Abandoned { .. }), "{:?}", report.outcome);
    assert_eq!(report.reply.kind, ReplyKind::Acknowledgement);
}

#[tokio::test]
async fn test_collaborator_failure_becomes_apology() {
    let mut config = CopilotConfig::default();
    config.dispatcher.max_retries = 0;
    let mut collaborators = Collaborators::campus_defaults(&config);
    collaborators.calendar = Arc::new(InMemoryCalendar::restricted());
    let copilot = Copilot::new(&config, collaborators).unwrap();

    let report = say(&copilot, "c6", "what's on my schedule tomorrow", t0()).await;
    assert_eq!(report.reply.kind, ReplyKind::Apology);
    assert!(report.reply.text.contains("permission"), "{}", report.reply.text);

    // A failed action still leaves a clean IDLE state
    let state = copilot.store().get(&ConversationId::from("c6")).unwrap();
    assert_eq!(*state.phase(), DialoguePhase::Idle);
    assert_eq!(state.in_flight(), 0);
}

#[tokio::test]
async fn test_each_request_family_end_to_end() {
    let copilot = copilot();

    let cases = [
        ("where is cs101", "Computer Science Building"),
        ("how do i get to the gym from the library", "From Campus Library to Campus Gymnasium"),
        (
            "summarize: The career fair moves to the main hall this year. Important: the registration deadline is Friday.",
            "registration deadline",
        ),
        (
            "make a poster for the spring festival on april 20 at 6pm in the student center",
            "EVENT DETAILS",
        ),
        ("hello", "How can I help"),
    ];

    for (i, (text, expected)) in cases.iter().enumerate() {
        let conversation = format!("family-{i}");
        let report = say(&copilot, &conversation, text, t0()).await;
        assert_eq!(report.reply.kind, ReplyKind::Answer, "{text:?} -> {:?}", report.outcome);
        assert!(
            report.reply.text.contains(expected),
            "{text:?} reply missing {expected:?}: {}",
            report.reply.text
        );
    }
}

#[tokio::test]
async fn test_unknown_place_is_answered_not_apologised() {
    let copilot = copilot();

    // 1. No recognizable place: ask for one
    let report = say(&copilot, "lost", "where is it", t0()).await;
    assert_eq!(report.reply.text, "Which place are you looking for?");

    // 2. The reply is taken as the place; the map does not know it
    let report = say(&copilot, "lost", "the observatory", t0()).await;
    assert_eq!(report.reply.kind, ReplyKind::Answer);
    assert!(report.reply.text.contains("couldn't find \"observatory\""), "{}", report.reply.text);
}

#[tokio::test]
async fn test_poster_details_flow_into_brief() {
    let copilot = copilot();
    let report = say(
        &copilot,
        "poster",
        "make a poster for the spring festival on april 20 at 6pm in the student center",
        t0(),
    )
    .await;

    let TurnOutcome::Ready(request) = &report.outcome else {
        panic!("expected READY, got {:?}", report.outcome);
    };
    assert_eq!(request.text(SlotName::Title), Some("the spring festival"));
    assert_eq!(request.text(SlotName::Place), Some("Student Center"));
    assert!(report.reply.text.contains("April 20, 2024"));
    assert!(report.reply.text.contains("6:00 PM"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_conversations_run_concurrently_and_stay_isolated() {
    let copilot = Arc::new(copilot());

    let mut handles = Vec::new();
    for i in 0..16 {
        let copilot = copilot.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("student-{i}");
            let first = say(&copilot, &id, "remind me to submit something", t0()).await;
            let second = say(&copilot, &id, &format!("{}pm", 1 + i % 7), t0()).await;
            (first, second)
        }));
    }

    for handle in handles {
        let (first, second) = handle.await.unwrap();
        assert!(matches!(first.outcome, TurnOutcome::Clarify { .. }));
        assert!(matches!(second.outcome, TurnOutcome::Ready(_)), "{:?}", second.outcome);
    }
    assert_eq!(copilot.store().len(), 16);
}

#[tokio::test]
async fn test_telemetry_counts_turns_without_content() {
    let copilot = copilot();
    say(&copilot, "t", "remind me to submit something", t0()).await;
    say(&copilot, "t", "5pm", t0()).await;
    say(&copilot, "t", "lol ok", t0()).await;
    say(&copilot, "t", "  ", t0()).await;

    let snap = copilot.telemetry_snapshot();
    assert_eq!(snap.turn_stats.total, 4);
    assert_eq!(snap.turn_stats.clarified, 1);
    assert_eq!(snap.turn_stats.dispatched, 1);
    assert_eq!(snap.turn_stats.unhandled, 2);
    assert_eq!(snap.unhandled_stats.low_confidence, 1);
    assert_eq!(snap.unhandled_stats.parse_empty, 1);
    assert_eq!(snap.dialogue_stats.entered_awaiting, 1);
    assert_eq!(snap.dispatch_stats.count, 1);
    assert_eq!(snap.dispatch_stats.succeeded, 1);

    // Events carry no user text
    let telemetry = copilot.telemetry();
    let recorder = telemetry.lock();
    let dump = format!("{:?}", recorder.events().collect::<Vec<_>>());
    assert!(!dump.contains("submit"), "telemetry leaked utterance text");
}

#[tokio::test]
async fn test_reset_forgets_conversation() {
    let copilot = copilot();
    let id = ConversationId::from("r");
    say(&copilot, "r", "remind me to call mom", t0()).await;

    assert!(copilot.reset(&id));
    assert!(copilot.store().get(&id).is_none());
    assert_eq!(copilot.telemetry_snapshot().dialogue_stats.requested_resets, 1);

    // The old question is gone: "5pm" alone means nothing now
    let report = say(&copilot, "r", "5pm", t0()).await;
    assert!(matches!(report.outcome, TurnOutcome::Unhandled { .. }));
}

#[tokio::test]
async fn test_idle_conversation_expires() {
    let copilot = copilot();
    let id = ConversationId::from("sleepy");
    say(&copilot, "sleepy", "remind me to call mom", t0()).await;

    // 1. A sweep past the timeout removes it
    let sweeper = EvictionSweeper::new(
        copilot.store().clone(),
        std::time::Duration::from_secs(30 * 60),
        std::time::Duration::from_secs(60),
    )
    .with_telemetry(copilot.telemetry());
    assert_eq!(sweeper.sweep(t0() + Duration::minutes(31)), 1);
    assert!(copilot.store().get(&id).is_none(), "expired conversation must be absent");
    assert_eq!(copilot.telemetry_snapshot().dialogue_stats.evicted, 1);

    // 2. Returning later starts from scratch
    let report = say(&copilot, "sleepy", "5pm", t0() + Duration::minutes(32)).await;
    assert!(matches!(report.outcome, TurnOutcome::Unhandled { .. }));
}

#[tokio::test]
async fn test_sweeper_task_runs_until_cancelled() {
    let copilot = copilot();
    // Last touched an hour before now
    say(&copilot, "old", "remind me to call mom", Utc::now() - Duration::hours(1)).await;
    assert_eq!(copilot.store().len(), 1);

    let shutdown = CancellationToken::new();
    let handle = EvictionSweeper::new(
        copilot.store().clone(),
        std::time::Duration::from_secs(60),
        std::time::Duration::from_millis(10),
    )
    .spawn(shutdown.clone());

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(copilot.store().is_empty(), "sweeper should have evicted the stale conversation");

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_abandoned_turn_does_not_pin_the_conversation() {
    let config = CopilotConfig::default();
    let mut collab = Collaborators::campus_defaults(&config);
    collab.maps = Arc::new(StalledMaps);
    let copilot = Arc::new(Copilot::new(&config, collab).unwrap());
    let id = ConversationId::from("gone");

    let turn = tokio::spawn({
        let copilot = copilot.clone();
        async move { say(&copilot, "gone", "where is the library", t0()).await }
    });

    // 1. Wait for the dispatch to be in flight, then drop the turn
    let in_flight = || copilot.store().get(&id).map(|s| s.in_flight());
    for _ in 0..200 {
        if in_flight() == Some(1) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(in_flight(), Some(1));
    turn.abort();
    assert!(turn.await.unwrap_err().is_cancelled());

    // 2. The dropped turn settled its dispatch, so the conversation can expire
    assert_eq!(in_flight(), Some(0));
    let evicted = copilot
        .store()
        .evict_idle(t0() + Duration::minutes(31), copilot.store().idle_timeout());
    assert_eq!(evicted, 1);
}

#[tokio::test]
async fn test_week_schedule_end_to_end() {
    let calendar = Arc::new(InMemoryCalendar::open());
    for (day, title) in [(12, "Lab section"), (20, "Midterm")] {
        calendar.insert(
            "alice",
            copilot::services::CalendarEvent {
                id: None,
                title: title.to_string(),
                start: Utc.with_ymd_and_hms(2024, 3, day, 15, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2024, 3, day, 16, 0, 0).unwrap(),
                location: None,
            },
        );
    }
    let config = CopilotConfig::default();
    let mut collab = Collaborators::campus_defaults(&config);
    collab.calendar = calendar;
    let copilot = Copilot::new(&config, collab).unwrap();

    let report = say(&copilot, "week", "what's on my schedule this week", t0()).await;
    let Some(ActionResult::Success(ActionPayload::Schedule { days, events, .. })) =
        report.dispatch.as_ref().map(|d| &d.result)
    else {
        panic!("expected a schedule, got {:?}", report.outcome);
    };
    assert_eq!(*days, 7);
    assert_eq!(events.len(), 1);
    assert!(report.reply.text.contains("Sunday, March 10 to Saturday, March 16"), "{}", report.reply.text);
    assert!(report.reply.text.contains("Tue Mar 12"), "{}", report.reply.text);
}
