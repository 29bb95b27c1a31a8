use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use super::gazetteer::Gazetteer;
use super::temporal;
use super::types::{Entity, EntityKind, EntitySource, EntityValue, TravelMode};
use crate::kernel::normalizer::{NormalizedText, Span};
use crate::kernel::time::ReferenceClock;

static COURSE_GLUED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z]{2,4})(\d{3}[a-z]?)$").expect("course code regex"));
static COURSE_DEPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]{2,4}$").expect("course dept regex"));
static COURSE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{3}[a-z]?$").expect("course number regex"));

const COURSE_PATTERN: f32 = 0.75;
const MODE_PATTERN: f32 = 0.85;
const TEMPLATE: f32 = 0.8;
const FALLBACK_TEXT: f32 = 0.5;
const FALLBACK_LOCATION: f32 = 0.4;

/// Short words that look like a department code in front of a number ("at 230").
const NOT_A_DEPARTMENT: &[&str] = &[
    "a", "an", "am", "and", "at", "by", "do", "for", "from", "go", "in", "is", "it", "me", "my", "no",
    "of", "on", "or", "pm", "rm", "room", "the", "to",
];

/// Dropped from the tail of a template capture ("submit the report by").
const TRAILING_CONNECTIVES: &[&str] = &[
    "at", "on", "by", "in", "for", "this", "next", "the", "from", "to", "and", "please", "before",
    "after", "around", "until",
];

/// A short capture opening with one of these points at text the user has not given yet.
const DEICTIC: &[&str] = &["this", "that", "it", "these", "those", "the"];

const ARTICLES: &[&str] = &["the", "a", "an"];

/// Dropped from the head of a whole-utterance location capture ("to the library").
const LOCATION_LEAD: &[&str] = &["the", "to", "at", "in", "from", "near", "its", "it's", "is"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    /// Capture runs until the first date/time/duration.
    Temporal,
    /// Capture runs until any other entity.
    AnyEntity,
    /// Capture runs to the end of the utterance.
    Never,
}

struct Template {
    trigger: &'static [&'static str],
    stop: Stop,
}

// Longer triggers first; the first template that matches wins.
const TEMPLATES: &[Template] = &[
    Template { trigger: &["don't", "let", "me", "forget", "to"], stop: Stop::Temporal },
    Template { trigger: &["dont", "let", "me", "forget", "to"], stop: Stop::Temporal },
    Template { trigger: &["don't", "let", "me", "forget"], stop: Stop::Temporal },
    Template { trigger: &["dont", "let", "me", "forget"], stop: Stop::Temporal },
    Template { trigger: &["set", "a", "reminder", "to"], stop: Stop::Temporal },
    Template { trigger: &["remind", "me", "to"], stop: Stop::Temporal },
    Template { trigger: &["remind", "me", "about"], stop: Stop::Temporal },
    Template { trigger: &["reminder", "to"], stop: Stop::Temporal },
    Template { trigger: &["poster", "for"], stop: Stop::AnyEntity },
    Template { trigger: &["poster", "about"], stop: Stop::AnyEntity },
    Template { trigger: &["flyer", "for"], stop: Stop::AnyEntity },
    Template { trigger: &["flyer", "about"], stop: Stop::AnyEntity },
    Template { trigger: &["summary", "of"], stop: Stop::Never },
    Template { trigger: &["summarize"], stop: Stop::Never },
    Template { trigger: &["summarise"], stop: Stop::Never },
    Template { trigger: &["tl;dr"], stop: Stop::Never },
    Template { trigger: &["tldr"], stop: Stop::Never },
];

/// Layered entity extraction: temporal grammar, gazetteer, shape patterns, then
/// template captures for free text. Returns every candidate span, overlaps
/// included, sorted by position.
#[derive(Debug, Clone)]
pub struct EntityExtractor {
    gazetteer: Arc<Gazetteer>,
    max_edits: usize,
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new(Arc::new(Gazetteer::campus_default()), 2)
    }
}

impl EntityExtractor {
    pub fn new(gazetteer: Arc<Gazetteer>, max_edits: usize) -> Self {
        Self { gazetteer, max_edits }
    }

    pub fn gazetteer(&self) -> &Gazetteer {
        &self.gazetteer
    }

    pub fn extract(&self, text: &NormalizedText, clock: &ReferenceClock) -> Vec<Entity> {
        self.extract_with_hint(text, clock, None)
    }

    /// `hint` is the kind the user was just asked for. It loosens the grammar
    /// ("5" alone is an hour) and, when nothing of that kind is found, falls back
    /// to treating the whole reply as the answer.
    pub fn extract_with_hint(
        &self,
        text: &NormalizedText,
        clock: &ReferenceClock,
        hint: Option<EntityKind>,
    ) -> Vec<Entity> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut entities = temporal::scan(text, clock, hint == Some(EntityKind::Time));
        entities.extend(self.gazetteer.lookup(text, self.max_edits));
        entities.extend(course_codes(text));
        entities.extend(travel_modes(text));

        if let Some(capture) = template_capture(text, &entities) {
            entities.push(capture);
        }

        if let Some(kind) = hint {
            if !entities.iter().any(|e| e.kind() == kind) {
                entities.extend(fallback(text, kind, &entities));
            }
        }

        for entity in &mut entities {
            entity.cue = cue_before(text, entity.span.start);
        }

        // One entity per (span, kind): the strongest source, then the highest confidence.
        entities.sort_by(|a, b| {
            a.span
                .cmp(&b.span)
                .then(a.kind().cmp(&b.kind()))
                .then(b.source.rank().cmp(&a.source.rank()))
                .then(b.confidence.total_cmp(&a.confidence))
        });
        entities.dedup_by(|later, kept| later.span == kept.span && later.kind() == kept.kind());
        entities
    }
}

/// Nearest word before `offset`, looking through articles ("from the library").
fn cue_before(text: &NormalizedText, offset: usize) -> Option<String> {
    let mut k = text.token_before(offset)?;
    loop {
        let word = text.word(k)?;
        if !ARTICLES.contains(&word) {
            return Some(word.to_string());
        }
        k = k.checked_sub(1)?;
    }
}

/// "cs101", "CS 101", "phys210a"
fn course_codes(text: &NormalizedText) -> Vec<Entity> {
    let mut found = Vec::new();
    let mut i = 0;

    while i < text.len() {
        let Some(word) = text.word(i) else { break };

        if let Some(caps) = COURSE_GLUED.captures(word) {
            if let Some(span) = text.span_of(i, i) {
                let code = format!("{}{}", &caps[1], &caps[2]).to_uppercase();
                found.push(Entity::new(EntityValue::Course(code), span, COURSE_PATTERN, EntitySource::Pattern));
            }
            i += 1;
            continue;
        }

        let next = text.word(i + 1);
        if COURSE_DEPT.is_match(word) && !NOT_A_DEPARTMENT.contains(&word) {
            if let Some(number) = next.filter(|n| COURSE_NUMBER.is_match(n)) {
                if let Some(span) = text.span_of(i, i + 1) {
                    let code = format!("{word}{number}").to_uppercase();
                    found.push(Entity::new(EntityValue::Course(code), span, COURSE_PATTERN, EntitySource::Pattern));
                }
                i += 2;
                continue;
            }
        }
        i += 1;
    }
    found
}

struct ModePhrase {
    words: &'static [&'static str],
    mode: TravelMode,
}

// Phrases, not bare nouns: "bike rally" is an event, "by bike" is a mode.
const MODE_PHRASES: &[ModePhrase] = &[
    ModePhrase { words: &["on", "foot"], mode: TravelMode::Walking },
    ModePhrase { words: &["walking"], mode: TravelMode::Walking },
    ModePhrase { words: &["by", "bike"], mode: TravelMode::Bicycling },
    ModePhrase { words: &["by", "bicycle"], mode: TravelMode::Bicycling },
    ModePhrase { words: &["cycling"], mode: TravelMode::Bicycling },
    ModePhrase { words: &["biking"], mode: TravelMode::Bicycling },
    ModePhrase { words: &["by", "bus"], mode: TravelMode::Transit },
    ModePhrase { words: &["by", "shuttle"], mode: TravelMode::Transit },
    ModePhrase { words: &["by", "train"], mode: TravelMode::Transit },
    ModePhrase { words: &["by", "transit"], mode: TravelMode::Transit },
    ModePhrase { words: &["by", "car"], mode: TravelMode::Driving },
    ModePhrase { words: &["driving"], mode: TravelMode::Driving },
];

/// "by bike", "on foot", "driving"
fn travel_modes(text: &NormalizedText) -> Vec<Entity> {
    (0..text.len())
        .filter_map(|i| {
            let phrase = MODE_PHRASES.iter().find(|p| text.matches_at(i, p.words))?;
            let span = text.span_of(i, i + phrase.words.len() - 1)?;
            Some(Entity::new(EntityValue::Mode(phrase.mode), span, MODE_PATTERN, EntitySource::Pattern))
        })
        .collect()
}

/// Residual free text inside the first matching template.
fn template_capture(text: &NormalizedText, entities: &[Entity]) -> Option<Entity> {
    let (at, template) = TEMPLATES
        .iter()
        .find_map(|t| text.find_phrase(t.trigger).map(|at| (at, t)))?;

    let mut start = at + template.trigger.len();
    let mut end = text.len();

    if template.stop != Stop::Never {
        let tokens = text.tokens();
        for (j, token) in tokens.iter().enumerate().skip(start) {
            let blocked = entities.iter().any(|e| {
                let stops = match template.stop {
                    Stop::Temporal => e.source == EntitySource::Temporal,
                    Stop::AnyEntity => true,
                    Stop::Never => false,
                };
                stops && e.span.contains(token.span.start)
            });
            if blocked {
                end = j;
                break;
            }
        }
    } else {
        // "summarize this notice: the library closes ..." keeps what follows the colon.
        let tokens = text.tokens();
        let look = (start + 6).min(end);
        for j in start..look {
            let Some(next) = tokens.get(j + 1) else { break };
            let gap = &text.original()[tokens[j].span.end..next.span.start];
            if gap.contains(':') {
                start = j + 1;
                break;
            }
        }
    }

    loop {
        if end >= start + 2 && text.matches_at(end - 2, &["for", "me"]) {
            end -= 2;
            continue;
        }
        match end.checked_sub(1).and_then(|k| text.word(k)) {
            Some(w) if end > start && TRAILING_CONNECTIVES.contains(&w) => end -= 1,
            _ => break,
        }
    }
    if end <= start {
        return None;
    }

    if template.stop == Stop::Never && end - start <= 5 {
        if let Some(first) = text.word(start) {
            if DEICTIC.contains(&first) {
                return None;
            }
        }
    }

    let span = text.span_of(start, end - 1)?;
    let value = EntityValue::Text(text.slice(span).to_string());
    Some(Entity::new(value, span, TEMPLATE, EntitySource::Template))
}

/// Whole utterance as the answer to a clarification question. Free text stops
/// short of a trailing date or time ("call mom at 6"), which is merged separately.
fn fallback(text: &NormalizedText, kind: EntityKind, found: &[Entity]) -> Option<Entity> {
    match kind {
        EntityKind::FreeText => {
            let mut end = text
                .tokens()
                .iter()
                .enumerate()
                .skip(1)
                .find(|(_, t)| {
                    found
                        .iter()
                        .any(|e| e.source == EntitySource::Temporal && e.span.contains(t.span.start))
                })
                .map(|(j, _)| j)
                .unwrap_or(text.len());
            while end > 1 && text.word(end - 1).is_some_and(|w| TRAILING_CONNECTIVES.contains(&w)) {
                end -= 1;
            }
            let span = text.span_of(0, end - 1)?;
            let value = EntityValue::Text(text.slice(span).to_string());
            Some(Entity::new(value, span, FALLBACK_TEXT, EntitySource::Fallback))
        }
        EntityKind::Location | EntityKind::Person | EntityKind::Course => {
            let first = (0..text.len()).find(|&i| {
                text.word(i)
                    .map(|w| !LOCATION_LEAD.contains(&w))
                    .unwrap_or(false)
            })?;
            let span: Span = text.span_of(first, text.len() - 1)?;
            let raw = text.slice(span).to_string();
            let value = match kind {
                EntityKind::Person => EntityValue::Person(raw),
                EntityKind::Course => EntityValue::Course(raw.replace(' ', "").to_uppercase()),
                _ => EntityValue::Location(raw),
            };
            Some(Entity::new(value, span, FALLBACK_LOCATION, EntitySource::Fallback))
        }
        EntityKind::Date
        | EntityKind::DateRange
        | EntityKind::Time
        | EntityKind::Duration
        | EntityKind::TravelMode => None,
    }
}
