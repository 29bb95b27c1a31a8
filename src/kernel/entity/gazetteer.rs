use serde::{Deserialize, Serialize};
use std::path::Path;

use super::types::{Entity, EntityKind, EntitySource, EntityValue};
use crate::config::ConfigError;
use crate::kernel::normalizer::NormalizedText;

/// Known value: a campus building, a course, a member of faculty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GazetteerEntry {
    pub canonical: String,
    pub kind: EntityKind,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl GazetteerEntry {
    pub fn new(canonical: &str, kind: EntityKind, aliases: &[&str]) -> Self {
        Self {
            canonical: canonical.to_string(),
            kind,
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Lower-cased surface forms, canonical name included.
    fn forms(&self) -> impl Iterator<Item = String> + '_ {
        std::iter::once(self.canonical.as_str())
            .chain(self.aliases.iter().map(String::as_str))
            .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
    }
}

#[derive(Debug, Clone)]
struct Form {
    text: String,
    words: usize,
    entry: usize,
}

/// Exact and edit-distance-bounded lookup over known entities.
#[derive(Debug, Clone, Default)]
pub struct Gazetteer {
    entries: Vec<GazetteerEntry>,
    forms: Vec<Form>,
    longest: usize,
}

#[derive(Debug, Deserialize)]
struct GazetteerFile {
    #[serde(default, rename = "entry")]
    entries: Vec<GazetteerEntry>,
}

impl Gazetteer {
    pub fn new(entries: Vec<GazetteerEntry>) -> Self {
        let mut gazetteer = Self::default();
        for entry in entries {
            gazetteer.insert(entry);
        }
        gazetteer
    }

    /// The campus places and courses the copilot knows without any configuration.
    pub fn campus_default() -> Self {
        Self::new(vec![
            GazetteerEntry::new("Campus Library", EntityKind::Location, &["library", "main library"]),
            GazetteerEntry::new(
                "Student Cafeteria",
                EntityKind::Location,
                &["cafeteria", "canteen", "dining hall"],
            ),
            GazetteerEntry::new("Campus Gymnasium", EntityKind::Location, &["gym", "gymnasium"]),
            GazetteerEntry::new(
                "Computer Science Building",
                EntityKind::Location,
                &["cs building", "cs block", "computer science block"],
            ),
            GazetteerEntry::new("Main Hall", EntityKind::Location, &[]),
            GazetteerEntry::new("Student Center", EntityKind::Location, &["student centre"]),
            GazetteerEntry::new("Main Gate", EntityKind::Location, &["front gate"]),
            GazetteerEntry::new("CS101", EntityKind::Course, &["cs 101", "intro to programming"]),
            GazetteerEntry::new("MA201", EntityKind::Course, &["ma 201", "linear algebra"]),
        ])
    }

    /// TOML file with `[[entry]]` tables (`canonical`, `kind`, `aliases`).
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: GazetteerFile = toml::from_str(raw)?;
        Ok(Self::new(file.entries))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn insert(&mut self, entry: GazetteerEntry) {
        let index = self.entries.len();
        for text in entry.forms() {
            let words = text.split(' ').count();
            if text.is_empty() || self.forms.iter().any(|f| f.text == text && f.entry == index) {
                continue;
            }
            self.longest = self.longest.max(words);
            self.forms.push(Form { text, words, entry: index });
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[GazetteerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Greedy longest-match over token n-grams. Exact matches score 1.0; fuzzy matches
    /// lose 0.1 per edit and are only tried for forms long enough that a typo is
    /// distinguishable from a different word.
    pub fn lookup(&self, text: &NormalizedText, max_edits: usize) -> Vec<Entity> {
        let mut found = Vec::new();
        let tokens = text.tokens();

        let mut i = 0;
        while i < tokens.len() {
            let mut consumed = 1;
            let longest = self.longest.min(tokens.len() - i);

            for n in (1..=longest).rev() {
                let gram = tokens[i..i + n]
                    .iter()
                    .map(|t| t.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                let hits = self.match_gram(&gram, n, max_edits);
                if hits.is_empty() {
                    continue;
                }
                let Some(span) = text.span_of(i, i + n - 1) else {
                    break;
                };
                for (entry, edits) in hits {
                    let (confidence, source) = if edits == 0 {
                        (1.0, EntitySource::GazetteerExact)
                    } else {
                        (0.9 - 0.1 * edits as f32, EntitySource::GazetteerFuzzy)
                    };
                    found.push(Entity::new(entry_value(entry), span, confidence, source));
                }
                consumed = n;
                break;
            }
            i += consumed;
        }
        found
    }

    /// Best hit per kind for one n-gram, as (entry, edit distance).
    fn match_gram(&self, gram: &str, words: usize, max_edits: usize) -> Vec<(&GazetteerEntry, usize)> {
        let mut best: Vec<(&GazetteerEntry, usize)> = Vec::new();

        for form in self.forms.iter().filter(|f| f.words == words) {
            let edits = if form.text == gram {
                0
            } else {
                let allowed = allowed_edits(&form.text, max_edits);
                if allowed == 0 {
                    continue;
                }
                let distance = strsim::levenshtein(&form.text, gram);
                if distance > allowed {
                    continue;
                }
                distance
            };

            let entry = &self.entries[form.entry];
            match best.iter_mut().find(|(e, _)| e.kind == entry.kind) {
                Some(slot) if edits < slot.1 => *slot = (entry, edits),
                Some(_) => {}
                None => best.push((entry, edits)),
            }
        }
        best
    }
}

/// Codes ("cs 101") must match exactly: one edit there is a different course.
fn allowed_edits(form: &str, max_edits: usize) -> usize {
    if form.chars().any(|c| c.is_ascii_digit()) {
        return 0;
    }
    match form.chars().count() {
        0..=4 => 0,
        5..=8 => max_edits.min(1),
        _ => max_edits,
    }
}

fn entry_value(entry: &GazetteerEntry) -> EntityValue {
    let canonical = entry.canonical.clone();
    match entry.kind {
        EntityKind::Course => EntityValue::Course(canonical),
        EntityKind::Person => EntityValue::Person(canonical),
        _ => EntityValue::Location(canonical),
    }
}
