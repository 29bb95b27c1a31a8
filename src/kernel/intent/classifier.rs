use std::cmp::Ordering;

use super::types::{IntentCandidate, IntentLabel};
use crate::kernel::normalizer::NormalizedText;

/// Capability interface for intent scoring backends (rules today, a learned model
/// later). The resolver only ever sees ranked candidates.
///
/// Implementations must be stateless: the same text always scores the same, and
/// utterances may be classified out of conversation order.
pub trait IntentClassifier: Send + Sync {
    /// Ranked, non-empty list sorted by descending confidence.
    fn classify(&self, text: &NormalizedText) -> Vec<IntentCandidate>;

    fn classify_batch(&self, texts: &[NormalizedText]) -> Vec<Vec<IntentCandidate>> {
        texts.iter().map(|t| self.classify(t)).collect()
    }
}

/// Sort by confidence, ties broken by taxonomy priority.
pub fn rank(candidates: &mut [IntentCandidate]) {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.intent.priority().cmp(&b.intent.priority()))
    });
}

#[derive(Debug, Clone)]
struct Cue {
    words: Vec<String>,
    weight: f32,
}

/// Weighted cue-phrase scorer.
///
/// score = sum of matched cue weights, confidence = score / (score + 1).
/// UNKNOWN is always present with confidence 1 - best.
#[derive(Debug, Clone)]
pub struct RuleClassifier {
    cues: Vec<(IntentLabel, Cue)>,
}

const DEFAULT_CUES: &[(IntentLabel, &str, f32)] = &[
    // Schedule
    (IntentLabel::QuerySchedule, "schedule", 1.5),
    (IntentLabel::QuerySchedule, "timetable", 1.5),
    (IntentLabel::QuerySchedule, "my classes", 1.5),
    (IntentLabel::QuerySchedule, "next class", 1.5),
    (IntentLabel::QuerySchedule, "what do i have", 1.2),
    (IntentLabel::QuerySchedule, "what am i doing", 1.2),
    (IntentLabel::QuerySchedule, "calendar", 1.0),
    (IntentLabel::QuerySchedule, "classes", 0.8),
    (IntentLabel::QuerySchedule, "events", 0.8),
    (IntentLabel::QuerySchedule, "deadlines", 0.8),
    (IntentLabel::QuerySchedule, "upcoming", 0.6),
    (IntentLabel::QuerySchedule, "this week", 0.4),
    // Reminders
    (IntentLabel::CreateReminder, "remind me", 2.5),
    (IntentLabel::CreateReminder, "set a reminder", 2.5),
    (IntentLabel::CreateReminder, "don't let me forget", 2.5),
    (IntentLabel::CreateReminder, "dont let me forget", 2.5),
    (IntentLabel::CreateReminder, "alert me", 1.5),
    (IntentLabel::CreateReminder, "reminder", 1.2),
    // Locations
    (IntentLabel::FindLocation, "where is", 2.0),
    (IntentLabel::FindLocation, "where's", 2.0),
    (IntentLabel::FindLocation, "location of", 1.5),
    (IntentLabel::FindLocation, "locate", 1.5),
    (IntentLabel::FindLocation, "find", 1.0),
    // Directions
    (IntentLabel::GetDirections, "how do i get to", 2.5),
    (IntentLabel::GetDirections, "how to get to", 2.5),
    (IntentLabel::GetDirections, "directions", 2.0),
    (IntentLabel::GetDirections, "route to", 1.5),
    (IntentLabel::GetDirections, "take me to", 1.5),
    (IntentLabel::GetDirections, "navigate", 1.5),
    (IntentLabel::GetDirections, "walk to", 1.0),
    // Summaries
    (IntentLabel::SummarizeText, "summarize", 2.5),
    (IntentLabel::SummarizeText, "summarise", 2.5),
    (IntentLabel::SummarizeText, "tl;dr", 2.0),
    (IntentLabel::SummarizeText, "tldr", 2.0),
    (IntentLabel::SummarizeText, "summary", 1.5),
    (IntentLabel::SummarizeText, "condense", 1.5),
    (IntentLabel::SummarizeText, "shorten", 1.2),
    // Posters
    (IntentLabel::GeneratePoster, "poster", 2.5),
    (IntentLabel::GeneratePoster, "flyer", 2.0),
    (IntentLabel::GeneratePoster, "banner", 1.2),
    // Smalltalk
    (IntentLabel::Smalltalk, "thank you", 1.5),
    (IntentLabel::Smalltalk, "hello", 1.2),
    (IntentLabel::Smalltalk, "hi", 1.2),
    (IntentLabel::Smalltalk, "thanks", 1.2),
    (IntentLabel::Smalltalk, "good morning", 1.2),
    (IntentLabel::Smalltalk, "hey", 1.0),
    (IntentLabel::Smalltalk, "what can you do", 1.0),
    (IntentLabel::Smalltalk, "help", 0.6),
];

impl Default for RuleClassifier {
    fn default() -> Self {
        let mut classifier = Self { cues: Vec::new() };
        for (intent, phrase, weight) in DEFAULT_CUES {
            classifier = classifier.with_cue(*intent, phrase, *weight);
        }
        classifier
    }
}

impl RuleClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extra cue phrase. UNKNOWN cannot be cued.
    pub fn with_cue(mut self, intent: IntentLabel, phrase: &str, weight: f32) -> Self {
        let words: Vec<String> = phrase.split_whitespace().map(str::to_lowercase).collect();
        if intent != IntentLabel::Unknown && !words.is_empty() && weight > 0.0 {
            self.cues.push((intent, Cue { words, weight }));
        }
        self
    }

    fn score(&self, text: &NormalizedText, intent: IntentLabel) -> f32 {
        self.cues
            .iter()
            .filter(|(label, _)| *label == intent)
            .filter(|(_, cue)| {
                let words: Vec<&str> = cue.words.iter().map(String::as_str).collect();
                text.find_phrase(&words).is_some()
            })
            .map(|(_, cue)| cue.weight)
            .sum()
    }
}

impl IntentClassifier for RuleClassifier {
    fn classify(&self, text: &NormalizedText) -> Vec<IntentCandidate> {
        let mut candidates: Vec<IntentCandidate> = IntentLabel::ALL
            .iter()
            .filter(|label| **label != IntentLabel::Unknown)
            .filter_map(|label| {
                let score = self.score(text, *label);
                (score > 0.0).then(|| IntentCandidate::new(*label, score / (score + 1.0)))
            })
            .collect();

        let best = candidates.iter().map(|c| c.confidence).fold(0.0_f32, f32::max);
        candidates.push(IntentCandidate::new(IntentLabel::Unknown, 1.0 - best));

        rank(&mut candidates);
        candidates
    }
}
