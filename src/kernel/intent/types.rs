use serde::{Deserialize, Serialize};
use std::fmt;

use crate::kernel::entity::types::EntityKind;

/// Closed taxonomy. Slot requirements are keyed by this label, so the set is
/// fixed at compile time rather than open-vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentLabel {
    QuerySchedule,
    CreateReminder,
    FindLocation,
    GetDirections,
    SummarizeText,
    GeneratePoster,
    Smalltalk,
    Unknown,
}

/// Named piece of information an intent needs before it can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotName {
    Date,
    Range,
    Time,
    Length,
    Task,
    Place,
    Origin,
    Destination,
    Mode,
    Text,
    Title,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSpec {
    pub name: SlotName,
    pub required: bool,
}

impl SlotSpec {
    const fn required(name: SlotName) -> Self {
        Self { name, required: true }
    }

    const fn optional(name: SlotName) -> Self {
        Self { name, required: false }
    }
}

// Required slots are listed first, in the order they are asked for.
const SCHEDULE: &[SlotSpec] = &[SlotSpec::optional(SlotName::Date), SlotSpec::optional(SlotName::Range)];
const REMINDER: &[SlotSpec] = &[
    SlotSpec::required(SlotName::Time),
    SlotSpec::required(SlotName::Task),
    SlotSpec::optional(SlotName::Date),
    SlotSpec::optional(SlotName::Length),
];
const LOCATION: &[SlotSpec] = &[SlotSpec::required(SlotName::Place)];
const DIRECTIONS: &[SlotSpec] = &[
    SlotSpec::required(SlotName::Destination),
    SlotSpec::optional(SlotName::Origin),
    SlotSpec::optional(SlotName::Mode),
];
const SUMMARY: &[SlotSpec] = &[SlotSpec::required(SlotName::Text)];
const POSTER: &[SlotSpec] = &[
    SlotSpec::required(SlotName::Title),
    SlotSpec::optional(SlotName::Date),
    SlotSpec::optional(SlotName::Time),
    SlotSpec::optional(SlotName::Place),
];
const NONE: &[SlotSpec] = &[];

impl IntentLabel {
    pub const ALL: [IntentLabel; 8] = [
        IntentLabel::QuerySchedule,
        IntentLabel::CreateReminder,
        IntentLabel::FindLocation,
        IntentLabel::GetDirections,
        IntentLabel::SummarizeText,
        IntentLabel::GeneratePoster,
        IntentLabel::Smalltalk,
        IntentLabel::Unknown,
    ];

    /// Tie-break rank, lower wins. More specific intents rank above UNKNOWN.
    pub fn priority(self) -> u8 {
        match self {
            IntentLabel::CreateReminder => 0,
            IntentLabel::GetDirections => 1,
            IntentLabel::FindLocation => 2,
            IntentLabel::QuerySchedule => 3,
            IntentLabel::SummarizeText => 4,
            IntentLabel::GeneratePoster => 5,
            IntentLabel::Smalltalk => 6,
            IntentLabel::Unknown => 7,
        }
    }

    pub fn schema(self) -> &'static [SlotSpec] {
        match self {
            IntentLabel::QuerySchedule => SCHEDULE,
            IntentLabel::CreateReminder => REMINDER,
            IntentLabel::FindLocation => LOCATION,
            IntentLabel::GetDirections => DIRECTIONS,
            IntentLabel::SummarizeText => SUMMARY,
            IntentLabel::GeneratePoster => POSTER,
            IntentLabel::Smalltalk | IntentLabel::Unknown => NONE,
        }
    }

    pub fn required_slots(self) -> impl Iterator<Item = SlotName> {
        self.schema().iter().filter(|s| s.required).map(|s| s.name)
    }

    pub fn accepts(self, slot: SlotName) -> bool {
        self.schema().iter().any(|s| s.name == slot)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IntentLabel::QuerySchedule => "QUERY_SCHEDULE",
            IntentLabel::CreateReminder => "CREATE_REMINDER",
            IntentLabel::FindLocation => "FIND_LOCATION",
            IntentLabel::GetDirections => "GET_DIRECTIONS",
            IntentLabel::SummarizeText => "SUMMARIZE_TEXT",
            IntentLabel::GeneratePoster => "GENERATE_POSTER",
            IntentLabel::Smalltalk => "SMALLTALK",
            IntentLabel::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SlotName {
    /// Entity kind expected for this slot; used as the extraction hint during clarification.
    pub fn kind(self) -> EntityKind {
        match self {
            SlotName::Date => EntityKind::Date,
            SlotName::Range => EntityKind::DateRange,
            SlotName::Time => EntityKind::Time,
            SlotName::Length => EntityKind::Duration,
            SlotName::Place | SlotName::Origin | SlotName::Destination => EntityKind::Location,
            SlotName::Mode => EntityKind::TravelMode,
            SlotName::Task | SlotName::Text | SlotName::Title => EntityKind::FreeText,
        }
    }

    /// Preceding word that routes an entity into this slot rather than a sibling of
    /// the same kind ("from the library" is an origin).
    pub fn cue(self) -> Option<&'static str> {
        match self {
            SlotName::Origin => Some("from"),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SlotName::Date => "date",
            SlotName::Range => "range",
            SlotName::Time => "time",
            SlotName::Length => "length",
            SlotName::Task => "task",
            SlotName::Place => "place",
            SlotName::Origin => "origin",
            SlotName::Destination => "destination",
            SlotName::Mode => "mode",
            SlotName::Text => "text",
            SlotName::Title => "title",
        }
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scored hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentCandidate {
    pub intent: IntentLabel,
    pub confidence: f32, // 0.0 to 1.0
    pub required_slots: Vec<SlotName>,
}

impl IntentCandidate {
    pub fn new(intent: IntentLabel, confidence: f32) -> Self {
        Self {
            intent,
            confidence: confidence.clamp(0.0, 1.0),
            required_slots: intent.required_slots().collect(),
        }
    }

    /// Below threshold is indistinguishable from UNKNOWN.
    pub fn is_actionable(&self, threshold: f32) -> bool {
        self.intent != IntentLabel::Unknown && self.confidence >= threshold
    }
}
