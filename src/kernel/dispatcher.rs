//! Action dispatcher: routes a completed `ActionRequest` to its collaborator.
//!
//! **KERNEL LAW**: nothing raises past `dispatch`. Every collaborator failure is
//! caught here, retried when the taxonomy says it may be, and returned as an
//! `ActionResult::Failure` carrying its `ErrorKind`.

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::error::{CollaboratorError, ErrorKind};
use super::intent::{IntentLabel, SlotName};
use super::resolver::ActionRequest;
use crate::config::DispatcherConfig;
use crate::services::{Artifact, CalendarEvent, Collaborators, GenerationInput, Place, Route};

pub const REMINDER_COLLECTION: &str = "reminders";
const DEFAULT_REMINDER_MINUTES: u32 = 30;

/// Per-call timeout plus bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub call_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl DispatchPolicy {
    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self {
            call_timeout: config.call_timeout(),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor).min(self.backoff_cap)
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from_config(&DispatcherConfig::default())
    }
}

/// Normalized success payloads, one shape per intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionPayload {
    /// Events from local midnight of `date` through the following `days` days.
    Schedule {
        date: chrono::NaiveDate,
        days: u32,
        events: Vec<CalendarEvent>,
    },
    ReminderCreated {
        reminder_id: String,
        event: CalendarEvent,
    },
    Location(Place),
    /// The maps service answered, but knows no such place.
    LocationNotFound {
        query: String,
    },
    Directions(Route),
    Summary(Artifact),
    Poster(Artifact),
    Smalltalk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionResult {
    Success(ActionPayload),
    Failure { kind: ErrorKind },
}

impl ActionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionResult::Success(_))
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            ActionResult::Failure { kind } => Some(*kind),
            ActionResult::Success(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub result: ActionResult,
    /// Collaborator calls made for the primary operation, retries included.
    pub attempts: u32,
    pub latency: Duration,
}

#[derive(Clone)]
pub struct ActionDispatcher {
    collaborators: Collaborators,
    policy: DispatchPolicy,
    default_origin: String,
}

impl ActionDispatcher {
    pub fn new(collaborators: Collaborators, policy: DispatchPolicy, default_origin: impl Into<String>) -> Self {
        Self {
            collaborators,
            policy,
            default_origin: default_origin.into(),
        }
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub async fn dispatch(&self, request: &ActionRequest) -> DispatchReport {
        let started = Instant::now();
        let (outcome, attempts) = self.route(request).await;

        let result = match outcome {
            Ok(payload) => ActionResult::Success(payload),
            Err(err) => {
                warn!(
                    request = %request.id(),
                    intent = %request.intent(),
                    error = %err,
                    attempts,
                    "action failed"
                );
                ActionResult::Failure { kind: err.kind() }
            }
        };
        let latency = started.elapsed();
        info!(
            request = %request.id(),
            intent = %request.intent(),
            success = result.is_success(),
            attempts,
            latency_ms = latency.as_millis() as u64,
            "action dispatched"
        );
        DispatchReport {
            result,
            attempts,
            latency,
        }
    }

    async fn route(&self, request: &ActionRequest) -> (Result<ActionPayload, CollaboratorError>, u32) {
        match request.intent() {
            IntentLabel::QuerySchedule => self.schedule(request).await,
            IntentLabel::CreateReminder => self.reminder(request).await,
            IntentLabel::FindLocation => self.locate(request).await,
            IntentLabel::GetDirections => self.directions(request).await,
            IntentLabel::SummarizeText => {
                let input = GenerationInput::Summary {
                    text: request.text(SlotName::Text).unwrap_or_default().to_string(),
                };
                let (res, n) = self.generate(Which::Summarizer, &input).await;
                (res.map(ActionPayload::Summary), n)
            }
            IntentLabel::GeneratePoster => {
                let input = GenerationInput::Poster {
                    title: request.text(SlotName::Title).unwrap_or_default().to_string(),
                    date: request.date(SlotName::Date),
                    time: request.time(SlotName::Time),
                    place: request.text(SlotName::Place).map(str::to_string),
                };
                let (res, n) = self.generate(Which::Poster, &input).await;
                (res.map(ActionPayload::Poster), n)
            }
            IntentLabel::Smalltalk => (Ok(ActionPayload::Smalltalk), 0),
            // ActionRequest::new refuses UNKNOWN
            IntentLabel::Unknown => (
                Err(CollaboratorError::Unavailable("no collaborator for UNKNOWN".into())),
                0,
            ),
        }
    }

    async fn schedule(&self, request: &ActionRequest) -> (Result<ActionPayload, CollaboratorError>, u32) {
        let clock = *request.clock();
        // A week beats a single day when the utterance carried both ("next week")
        let (date, days) = request
            .range(SlotName::Range)
            .or_else(|| request.date(SlotName::Date).map(|d| (d, 1)))
            .unwrap_or_else(|| (clock.today(), 1));
        let Some((start, end)) = clock.days_bounds(date, days) else {
            return (Err(CollaboratorError::Unavailable(format!("no local days from {date}"))), 0);
        };

        let calendar = &self.collaborators.calendar;
        let user = request.sender();
        let (res, n) = self
            .call("calendar.list_events", move || async move { calendar.list_events(user, start, end).await })
            .await;
        (res.map(|events| ActionPayload::Schedule { date, days, events }), n)
    }

    async fn reminder(&self, request: &ActionRequest) -> (Result<ActionPayload, CollaboratorError>, u32) {
        let clock = *request.clock();
        let Some(time) = request.time(SlotName::Time) else {
            return (Err(CollaboratorError::Unavailable("reminder without a time".into())), 0);
        };
        let start = match request.date(SlotName::Date) {
            Some(date) => clock.resolve(date, time),
            None => clock.next_occurrence(time),
        };
        let Some(start) = start else {
            return (Err(CollaboratorError::Unavailable("reminder time does not exist locally".into())), 0);
        };
        let minutes = request.minutes(SlotName::Length).unwrap_or(DEFAULT_REMINDER_MINUTES);
        let event = CalendarEvent {
            id: None,
            title: request.text(SlotName::Task).unwrap_or("Reminder").to_string(),
            start,
            end: start + ChronoDuration::minutes(i64::from(minutes)),
            location: None,
        };

        let calendar = &self.collaborators.calendar;
        let user = request.sender();
        let event = &event;
        let (res, n) = self
            .call("calendar.create_event", move || async move { calendar.create_event(user, event.clone()).await })
            .await;
        let created = match res {
            Ok(created) => created,
            Err(err) => return (Err(err), n),
        };

        let reminder_id = request.id().to_string();
        let record = json!({
            "user": request.sender(),
            "event_id": created.id,
            "title": created.title,
            "start": created.start,
            "end": created.end,
        });
        // The calendar already holds the reminder; a missing record is not a failed action
        let put = self.collaborators.records.put(REMINDER_COLLECTION, &reminder_id, record);
        let written = match tokio::time::timeout(self.policy.call_timeout, put).await {
            Ok(written) => written,
            Err(_) => Err(CollaboratorError::Timeout),
        };
        if let Err(err) = written {
            warn!(request = %reminder_id, error = %err, "reminder not recorded");
        }

        (
            Ok(ActionPayload::ReminderCreated {
                reminder_id,
                event: created,
            }),
            n,
        )
    }

    async fn locate(&self, request: &ActionRequest) -> (Result<ActionPayload, CollaboratorError>, u32) {
        let query = request.text(SlotName::Place).unwrap_or_default();
        let maps = &self.collaborators.maps;
        let (res, n) = self
            .call("maps.find_location", move || async move { maps.find_location(query).await })
            .await;
        let res = match res {
            Ok(place) => Ok(ActionPayload::Location(place)),
            Err(CollaboratorError::NotFound(query)) => Ok(ActionPayload::LocationNotFound { query }),
            Err(err) => Err(err),
        };
        (res, n)
    }

    async fn directions(&self, request: &ActionRequest) -> (Result<ActionPayload, CollaboratorError>, u32) {
        let to = request.text(SlotName::Destination).unwrap_or_default();
        let from = request.text(SlotName::Origin).unwrap_or(&self.default_origin);
        let mode = request.mode(SlotName::Mode).unwrap_or_default();
        let maps = &self.collaborators.maps;
        let (res, n) = self
            .call("maps.directions", move || async move { maps.directions(from, to, mode).await })
            .await;
        let res = match res {
            Ok(route) => Ok(ActionPayload::Directions(route)),
            Err(CollaboratorError::NotFound(query)) => Ok(ActionPayload::LocationNotFound { query }),
            Err(err) => Err(err),
        };
        (res, n)
    }

    async fn generate(&self, which: Which, input: &GenerationInput) -> (Result<Artifact, CollaboratorError>, u32) {
        let (op, generator) = match which {
            Which::Summarizer => ("summarizer.generate", &self.collaborators.summarizer),
            Which::Poster => ("poster.generate", &self.collaborators.poster),
        };
        self.call(op, move || async move { generator.generate(input).await }).await
    }

    /// Runs `op` under the call timeout, retrying timeouts and rate limits with
    /// backoff. Returns the last outcome and the number of attempts made.
    async fn call<T, F, Fut>(&self, op: &'static str, mut f: F) -> (Result<T, CollaboratorError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let outcome = match tokio::time::timeout(self.policy.call_timeout, f()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(CollaboratorError::Timeout),
            };

            match outcome {
                Err(err) if err.is_retryable() && attempts <= self.policy.max_retries => {
                    let delay = self.policy.backoff(attempts - 1);
                    warn!(
                        op,
                        attempt = attempts,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "collaborator call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => {
                    debug!(op, attempts, ok = other.is_ok(), "collaborator call finished");
                    return (other, attempts);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Which {
    Summarizer,
    Poster,
}
