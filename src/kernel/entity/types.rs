use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::kernel::normalizer::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Date,
    /// A run of consecutive days ("this week").
    DateRange,
    Time,
    Duration,
    Location,
    Course,
    FreeText,
    Person,
    TravelMode,
}

impl EntityKind {
    /// Higher is more specific. Used to adjudicate identical-span conflicts.
    pub fn specificity(self) -> u8 {
        match self {
            EntityKind::Date | EntityKind::DateRange | EntityKind::Time | EntityKind::Duration => 5,
            EntityKind::Course | EntityKind::TravelMode => 4,
            EntityKind::Location => 3,
            EntityKind::Person => 2,
            EntityKind::FreeText => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum EntityValue {
    Date(NaiveDate),
    DateRange { start: NaiveDate, days: u32 },
    Time(NaiveTime),
    Duration { minutes: u32 },
    /// Canonical place name.
    Location(String),
    /// Canonical course code, e.g. "CS101".
    Course(String),
    Text(String),
    Person(String),
    Mode(TravelMode),
}

impl EntityValue {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityValue::Date(_) => EntityKind::Date,
            EntityValue::DateRange { .. } => EntityKind::DateRange,
            EntityValue::Time(_) => EntityKind::Time,
            EntityValue::Duration { .. } => EntityKind::Duration,
            EntityValue::Location(_) => EntityKind::Location,
            EntityValue::Course(_) => EntityKind::Course,
            EntityValue::Text(_) => EntityKind::FreeText,
            EntityValue::Person(_) => EntityKind::Person,
            EntityValue::Mode(_) => EntityKind::TravelMode,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            EntityValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_range(&self) -> Option<(NaiveDate, u32)> {
        match self {
            EntityValue::DateRange { start, days } => Some((*start, *days)),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<NaiveTime> {
        match self {
            EntityValue::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_minutes(&self) -> Option<u32> {
        match self {
            EntityValue::Duration { minutes } => Some(*minutes),
            _ => None,
        }
    }

    pub fn as_mode(&self) -> Option<TravelMode> {
        match self {
            EntityValue::Mode(m) => Some(*m),
            _ => None,
        }
    }

    /// Textual payload of the string-valued kinds.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EntityValue::Location(s)
            | EntityValue::Course(s)
            | EntityValue::Text(s)
            | EntityValue::Person(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for EntityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            EntityValue::DateRange { start, days } => write!(f, "{}+{days}d", start.format("%Y-%m-%d")),
            EntityValue::Time(t) => write!(f, "{}", t.format("%H:%M")),
            EntityValue::Duration { minutes } => write!(f, "{minutes}min"),
            EntityValue::Location(s)
            | EntityValue::Course(s)
            | EntityValue::Text(s)
            | EntityValue::Person(s) => f.write_str(s),
            EntityValue::Mode(m) => f.write_str(m.as_str()),
        }
    }
}

/// How the user means to travel. Walking unless they say otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelMode {
    #[default]
    Walking,
    Bicycling,
    Transit,
    Driving,
}

impl TravelMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TravelMode::Walking => "walking",
            TravelMode::Bicycling => "bicycling",
            TravelMode::Transit => "transit",
            TravelMode::Driving => "driving",
        }
    }

    /// Rough on-campus pace.
    pub fn meters_per_minute(self) -> f64 {
        match self {
            TravelMode::Walking => 80.0,
            TravelMode::Bicycling => 250.0,
            TravelMode::Transit => 300.0,
            TravelMode::Driving => 400.0,
        }
    }
}

/// Which matcher layer produced an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntitySource {
    /// Date/time/duration grammar.
    Temporal,
    GazetteerExact,
    GazetteerFuzzy,
    /// Shape rule, e.g. a course code.
    Pattern,
    /// Residual capture inside a syntactic template ("remind me to ...").
    Template,
    /// Whole-utterance capture under a clarification hint.
    Fallback,
}

impl EntitySource {
    /// Gazetteer beats template beats fallback at equal kind specificity.
    pub fn rank(self) -> u8 {
        match self {
            EntitySource::Temporal | EntitySource::GazetteerExact => 5,
            EntitySource::GazetteerFuzzy => 4,
            EntitySource::Pattern => 3,
            EntitySource::Template => 2,
            EntitySource::Fallback => 1,
        }
    }
}

/// Typed span. Entities may overlap; the resolver, not the extractor, adjudicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub value: EntityValue,
    pub span: Span,
    pub confidence: f32, // 0.0 to 1.0
    pub source: EntitySource,
    /// Lower-cased word before the span, articles skipped ("at", "from", ...).
    pub cue: Option<String>,
}

impl Entity {
    pub fn new(value: EntityValue, span: Span, confidence: f32, source: EntitySource) -> Self {
        Self {
            value,
            span,
            confidence: confidence.clamp(0.0, 1.0),
            source,
            cue: None,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.value.kind()
    }
}
