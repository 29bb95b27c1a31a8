use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use super::{Artifact, ArtifactKind, ContentGenerator, GenerationInput};
use crate::kernel::error::CollaboratorError;

const KEY_TERMS: &[&str] = &[
    "important",
    "deadline",
    "action required",
    "urgent",
    "reminder",
    "announcement",
    "notice",
    "update",
];
const HIGH_PRIORITY: &[&str] = &[
    "urgent",
    "immediate",
    "asap",
    "deadline",
    "important",
    "critical",
    "emergency",
    "action required",
];
const MEDIUM_PRIORITY: &[&str] = &["reminder", "notice", "update", "announcement", "please"];

const EMPTY_SUMMARY: &str = "No substantial content to summarize.";

static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+").expect("static regex"));
static ACTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(please \w+|you must|required to|need to|should|submit|complete|register|attend)\b")
        .expect("static regex")
});

/// Extractive summary: lead sentence plus the sentences carrying key terms.
#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    pub max_sentences: usize,
    pub max_words: usize,
    pub max_key_points: usize,
    pub max_actions: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self {
            max_sentences: 3,
            max_words: 200,
            max_key_points: 5,
            max_actions: 3,
        }
    }
}

fn sentences(text: &str) -> Vec<&str> {
    SENTENCE_END
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn has_any(sentence: &str, terms: &[&str]) -> bool {
    let lower = sentence.to_lowercase();
    terms.iter().any(|t| lower.contains(t))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn of(text: &str) -> Self {
        if has_any(text, HIGH_PRIORITY) {
            Priority::High
        } else if has_any(text, MEDIUM_PRIORITY) {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl ExtractiveSummarizer {
    pub fn summarize(&self, text: &str) -> Artifact {
        let all = sentences(text);
        let substantial: Vec<&str> = all.iter().copied().filter(|s| s.len() > 20).collect();

        let body = if substantial.is_empty() {
            EMPTY_SUMMARY.to_string()
        } else {
            let mut picked: Vec<&str> = vec![substantial[0]];
            for s in &substantial[1..] {
                if picked.len() >= self.max_sentences {
                    break;
                }
                if has_any(s, KEY_TERMS) {
                    picked.push(s);
                }
            }
            let flat = picked.join(". ");
            let mut words: Vec<&str> = flat.split_whitespace().collect();
            words.truncate(self.max_words);
            let mut joined = words.join(" ");
            if !joined.ends_with(['.', '!', '?']) {
                joined.push('.');
            }
            joined
        };

        let highlights: Vec<String> = all
            .iter()
            .filter(|s| s.len() > 10 && has_any(s, KEY_TERMS))
            .take(self.max_key_points)
            .map(|s| s.to_string())
            .collect();

        let mut actions: Vec<String> = Vec::new();
        for s in &all {
            if actions.len() >= self.max_actions {
                break;
            }
            if ACTION.is_match(s) && !actions.iter().any(|a| a == s) {
                actions.push(s.to_string());
            }
        }

        let priority = Priority::of(text);
        let mut metadata = BTreeMap::new();
        metadata.insert("priority".to_string(), priority.as_str().to_string());
        metadata.insert("sentences".to_string(), all.len().to_string());

        Artifact {
            kind: ArtifactKind::Summary,
            title: "Summary".to_string(),
            body,
            highlights,
            actions,
            metadata,
        }
    }
}

#[async_trait]
impl ContentGenerator for ExtractiveSummarizer {
    async fn generate(&self, input: &GenerationInput) -> Result<Artifact, CollaboratorError> {
        match input {
            GenerationInput::Summary { text } => Ok(self.summarize(text)),
            GenerationInput::Poster { .. } => Err(CollaboratorError::Unavailable(
                "summarizer cannot render posters".into(),
            )),
        }
    }
}

/// Renders a poster brief: the design prompt an image model would receive.
#[derive(Debug, Clone)]
pub struct PosterGenerator {
    pub theme: String,
    pub colors: String,
}

impl Default for PosterGenerator {
    fn default() -> Self {
        Self {
            theme: "modern campus event".to_string(),
            colors: "university blue and white".to_string(),
        }
    }
}

/// Filename-safe form of a title.
pub fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("poster");
    }
    out
}

impl PosterGenerator {
    pub fn render(&self, title: &str, date: Option<&str>, time: Option<&str>, place: Option<&str>) -> Artifact {
        let title = match title.trim() {
            "" => "Campus Event",
            t => t,
        };
        let date = date.unwrap_or("Date TBA");
        let time = time.unwrap_or("Time TBA");
        let place = place.unwrap_or("Location TBA");

        let body = format!(
            "Create a poster for \"{title}\".\n\
             \n\
             EVENT DETAILS:\n\
             - Date: {date}\n\
             - Time: {time}\n\
             - Location: {place}\n\
             \n\
             DESIGN STYLE: {theme}, colors {colors}, clean and legible from a distance.\n\
             LAYOUT: title across the top third, details grouped below, campus logo in a corner.\n\
             VISUAL ELEMENTS: simple iconography matching the theme, high contrast text, no clutter.",
            theme = self.theme,
            colors = self.colors,
        );

        let mut metadata = BTreeMap::new();
        metadata.insert("slug".to_string(), slug(title));
        metadata.insert("theme".to_string(), self.theme.clone());

        Artifact {
            kind: ArtifactKind::Poster,
            title: title.to_string(),
            body,
            highlights: vec![date.to_string(), time.to_string(), place.to_string()],
            actions: Vec::new(),
            metadata,
        }
    }
}

#[async_trait]
impl ContentGenerator for PosterGenerator {
    async fn generate(&self, input: &GenerationInput) -> Result<Artifact, CollaboratorError> {
        match input {
            GenerationInput::Poster { title, date, time, place } => {
                let date = date.map(|d| d.format("%B %-d, %Y").to_string());
                let time = time.map(|t| t.format("%-I:%M %p").to_string());
                Ok(self.render(title, date.as_deref(), time.as_deref(), place.as_deref()))
            }
            GenerationInput::Summary { .. } => Err(CollaboratorError::Unavailable(
                "poster generator cannot summarize".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_keeps_lead_and_key_term_sentences() {
        let text = "The career fair moves to the main hall this year. Lunch is served at noon. \
                    Important: the registration deadline is Friday. Please register online before then.";
        let art = ExtractiveSummarizer::default().summarize(text);
        assert!(art.body.starts_with("The career fair moves"));
        assert!(art.body.contains("registration deadline"));
        assert!(!art.body.contains("Lunch"));
        assert_eq!(art.metadata["priority"], "high");
        assert!(art.actions.iter().any(|a| a.contains("Please register")));
    }

    #[test]
    fn short_text_has_nothing_to_summarize() {
        let art = ExtractiveSummarizer::default().summarize("ok. thanks!");
        assert_eq!(art.body, EMPTY_SUMMARY);
        assert_eq!(art.metadata["priority"], "low");
    }

    #[test]
    fn poster_brief_carries_details_and_design_sections() {
        let art = PosterGenerator::default().render("Spring Festival", Some("April 20, 2024"), None, Some("Campus Quad"));
        for needle in ["Spring Festival", "April 20, 2024", "Campus Quad", "DESIGN STYLE", "LAYOUT", "VISUAL ELEMENTS"] {
            assert!(art.body.contains(needle), "missing {needle}");
        }
        assert!(art.body.contains("Time TBA"));
    }

    #[test]
    fn slug_drops_special_characters() {
        assert_eq!(slug("Event with Special Characters!@#$%^&*()"), "event_with_special_characters");
        assert_eq!(slug("!!!"), "poster");
    }
}
