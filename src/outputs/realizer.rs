use chrono::{DateTime, Days, NaiveDate};
use chrono_tz::Tz;

use crate::kernel::dispatcher::{ActionPayload, ActionResult};
use crate::kernel::entity::{EntityKind, TravelMode};
use crate::kernel::error::ErrorKind;
use crate::kernel::event::{ConversationId, Reply, ReplyKind};
use crate::kernel::intent::{IntentLabel, SlotName};
use crate::kernel::resolver::TurnOutcome;
use crate::services::{Artifact, CalendarEvent};

const HELP: &str = "I can check your schedule, set reminders, find campus places, give directions, \
                    summarize a notice or draft a poster. Try \"remind me to submit the lab report tomorrow at 5pm\".";

/// PURE FUNCTION: turn outcome (+ dispatch result) -> reply text.
///
/// `tz` is only used to print instants in the user's local time.
pub fn realize(conversation_id: ConversationId, outcome: &TurnOutcome, result: Option<&ActionResult>, tz: Tz) -> Reply {
    let (kind, text) = match (outcome, result) {
        (TurnOutcome::Ready(_), Some(ActionResult::Success(payload))) => (ReplyKind::Answer, answer(payload, tz)),
        (TurnOutcome::Ready(request), Some(ActionResult::Failure { kind })) => {
            (ReplyKind::Apology, apology(request.intent(), *kind))
        }
        // Dispatch was skipped; nothing to report beyond the acknowledgement
        (TurnOutcome::Ready(request), None) => (
            ReplyKind::Acknowledgement,
            format!("Working on your {} request.", describe(request.intent())),
        ),
        (TurnOutcome::Clarify { intent, slot, attempts }, _) => {
            (ReplyKind::Clarification, prompt(*intent, *slot, *attempts))
        }
        (TurnOutcome::Unhandled { reason }, _) => (ReplyKind::Unhandled, unhandled(*reason)),
        (TurnOutcome::Cancelled { intent: Some(intent) }, _) => (
            ReplyKind::Acknowledgement,
            format!("Okay, I've dropped the {} request.", describe(*intent)),
        ),
        (TurnOutcome::Cancelled { intent: None }, _) => {
            (ReplyKind::Acknowledgement, "Okay, starting fresh.".to_string())
        }
        (TurnOutcome::Abandoned { intent, slot }, _) => (
            ReplyKind::Acknowledgement,
            format!(
                "I still don't have the {} for your {} request, so I've set it aside. Ask again whenever you're ready.",
                slot,
                describe(*intent)
            ),
        ),
    };
    Reply::new(conversation_id, kind, text)
}

fn describe(intent: IntentLabel) -> &'static str {
    match intent {
        IntentLabel::QuerySchedule => "schedule",
        IntentLabel::CreateReminder => "reminder",
        IntentLabel::FindLocation => "location",
        IntentLabel::GetDirections => "directions",
        IntentLabel::SummarizeText => "summary",
        IntentLabel::GeneratePoster => "poster",
        IntentLabel::Smalltalk => "chat",
        IntentLabel::Unknown => "unknown",
    }
}

/// Names the first unfilled slot. A repeat ask is phrased differently.
pub fn prompt(intent: IntentLabel, slot: SlotName, attempts: u8) -> String {
    let question = match (intent, slot) {
        (IntentLabel::CreateReminder, SlotName::Time) => "What time should I remind you?",
        (IntentLabel::CreateReminder, SlotName::Task) => "What should I remind you about?",
        (IntentLabel::FindLocation, SlotName::Place) => "Which place are you looking for?",
        (IntentLabel::GetDirections, SlotName::Destination) => "Where do you want to go?",
        (IntentLabel::SummarizeText, SlotName::Text) => "Paste the text you want summarized.",
        (IntentLabel::GeneratePoster, SlotName::Title) => "What's the event called?",
        (_, SlotName::Date) => "Which day?",
        (_, SlotName::Range) => "Which week?",
        (_, SlotName::Time) => "What time?",
        (_, SlotName::Length) => "How long should it last?",
        (_, SlotName::Mode) => "How are you getting there?",
        (_, SlotName::Place | SlotName::Origin | SlotName::Destination) => "Which place?",
        (_, SlotName::Task | SlotName::Text | SlotName::Title) => "Could you give me a bit more detail?",
    };
    if attempts == 0 {
        return question.to_string();
    }
    let example = match slot.kind() {
        EntityKind::Time => " (for example \"5pm\" or \"17:30\")",
        EntityKind::Date => " (for example \"tomorrow\" or \"march 14\")",
        EntityKind::Location => " (for example \"the library\")",
        _ => "",
    };
    format!("Sorry, I didn't catch that. {question}{example}")
}

fn unhandled(reason: ErrorKind) -> String {
    match reason {
        ErrorKind::ParseEmpty => format!("I didn't get any text. {HELP}"),
        _ => format!("I'm not sure what you mean. {HELP}"),
    }
}

fn apology(intent: IntentLabel, kind: ErrorKind) -> String {
    let what = describe(intent);
    match kind {
        ErrorKind::CollaboratorAuthRequired => format!(
            "Sorry, I need permission to access your account before I can handle the {what} request. \
             Please connect it and try again."
        ),
        ErrorKind::CollaboratorTimeout => {
            format!("Sorry, the {what} service took too long to answer. Please try again in a moment.")
        }
        _ => format!("Sorry, the {what} service isn't available right now. Please try again in a little while."),
    }
}

fn local(at: DateTime<chrono::Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%a %b %-d, %-I:%M %p").to_string()
}

/// `with_day` prefixes the weekday, for listings spanning several days.
fn event_line(event: &CalendarEvent, tz: Tz, with_day: bool) -> String {
    let format = if with_day { "%a %b %-d, %-I:%M %p" } else { "%-I:%M %p" };
    let start = event.start.with_timezone(&tz).format(format);
    let end = event.end.with_timezone(&tz).format("%-I:%M %p");
    match &event.location {
        Some(place) => format!("- {start}-{end} {} ({place})", event.title),
        None => format!("- {start}-{end} {}", event.title),
    }
}

fn artifact_text(artifact: &Artifact) -> String {
    let mut out = artifact.body.clone();
    if !artifact.highlights.is_empty() {
        out.push_str("\nKey points:");
        for h in &artifact.highlights {
            out.push_str("\n- ");
            out.push_str(h);
        }
    }
    if !artifact.actions.is_empty() {
        out.push_str("\nTo do:");
        for a in &artifact.actions {
            out.push_str("\n- ");
            out.push_str(a);
        }
    }
    if let Some(priority) = artifact.metadata.get("priority") {
        out.push_str(&format!("\nPriority: {priority}"));
    }
    out
}

fn travelling(mode: TravelMode) -> &'static str {
    match mode {
        TravelMode::Walking => "on foot",
        TravelMode::Bicycling => "by bike",
        TravelMode::Transit => "by transit",
        TravelMode::Driving => "by car",
    }
}

fn period(date: NaiveDate, days: u32) -> String {
    let first = date.format("%A, %B %-d");
    match date.checked_add_days(Days::new(u64::from(days.saturating_sub(1)))) {
        Some(last) if days > 1 => format!("{first} to {}", last.format("%A, %B %-d")),
        _ => first.to_string(),
    }
}

fn answer(payload: &ActionPayload, tz: Tz) -> String {
    match payload {
        ActionPayload::Schedule { date, days, events } if events.is_empty() => {
            format!("Nothing on your calendar for {}.", period(*date, *days))
        }
        ActionPayload::Schedule { date, days, events } => {
            let mut out = format!("Your schedule for {}:", period(*date, *days));
            for event in events {
                out.push('\n');
                out.push_str(&event_line(event, tz, *days > 1));
            }
            out
        }
        ActionPayload::ReminderCreated { event, .. } => {
            format!("Reminder set: \"{}\" on {}.", event.title, local(event.start, tz))
        }
        ActionPayload::Location(place) => {
            let mut out = format!(
                "{} is at {} ({:.4}, {:.4}).",
                place.name, place.address, place.latitude, place.longitude
            );
            if let Some(url) = &place.maps_url {
                out.push_str(&format!("\nMap: {url}"));
            }
            out
        }
        ActionPayload::LocationNotFound { query } => {
            format!("I couldn't find \"{query}\" on the campus map. Could you give another name for it?")
        }
        ActionPayload::Directions(route) => {
            let mut out = format!(
                "From {} to {}: about {} m, {} min {}.",
                route.origin,
                route.destination,
                route.distance_m,
                route.minutes,
                travelling(route.mode)
            );
            for (i, step) in route.steps.iter().enumerate() {
                out.push_str(&format!("\n{}. {}", i + 1, step.instruction));
            }
            if let Some(url) = &route.maps_url {
                out.push_str(&format!("\nMap: {url}"));
            }
            out
        }
        ActionPayload::Summary(artifact) => artifact_text(artifact),
        ActionPayload::Poster(artifact) => format!("Poster brief for \"{}\":\n{}", artifact.title, artifact.body),
        ActionPayload::Smalltalk => "Hi! How can I help with your day on campus?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_prompt_adds_an_example() {
        let first = prompt(IntentLabel::CreateReminder, SlotName::Time, 0);
        let again = prompt(IntentLabel::CreateReminder, SlotName::Time, 1);
        assert_eq!(first, "What time should I remind you?");
        assert!(again.starts_with("Sorry"));
        assert!(again.contains("5pm"));
    }

    #[test]
    fn failures_apologise_and_suggest_retry() {
        let text = apology(IntentLabel::QuerySchedule, ErrorKind::CollaboratorUnavailable);
        assert!(text.starts_with("Sorry"));
        assert!(text.contains("try again"));
    }

    #[test]
    fn unhandled_turn_offers_help() {
        let reply = realize(
            ConversationId::from("c"),
            &TurnOutcome::Unhandled { reason: ErrorKind::LowConfidence },
            None,
            chrono_tz::America::New_York,
        );
        assert_eq!(reply.kind, ReplyKind::Unhandled);
        assert!(reply.text.contains("remind me"));
    }

    #[test]
    fn period_spans_a_week_and_survives_the_calendar_edge() {
        let sunday = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        assert_eq!(period(sunday, 7), "Sunday, March 10 to Saturday, March 16");
        assert_eq!(period(sunday, 1), "Sunday, March 10");
        // No day after MAX: the label collapses to the first day
        assert!(!period(NaiveDate::MAX, 7).contains(" to "));
    }
}
