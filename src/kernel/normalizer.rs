//! Lexical normalizer.
//!
//! Pure function of the raw text. Tokens are lower-cased but keep byte spans into
//! the *original* string so extracted entities can quote the user back verbatim.

use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, end)` into the original utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Smallest span covering both.
    pub fn cover(&self, other: &Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Lower-cased token text.
    pub text: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    original: String,
    normalized: String,
    tokens: Vec<Token>,
}

impl NormalizedText {
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Lower-cased text with whitespace runs collapsed to one space.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn word(&self, index: usize) -> Option<&str> {
        self.tokens.get(index).map(|t| t.text.as_str())
    }

    /// Original text under `span`.
    pub fn slice(&self, span: Span) -> &str {
        self.original.get(span.start..span.end).unwrap_or("")
    }

    /// Span covering tokens `first..=last`.
    pub fn span_of(&self, first: usize, last: usize) -> Option<Span> {
        let a = self.tokens.get(first)?;
        let b = self.tokens.get(last)?;
        Some(a.span.cover(&b.span))
    }

    /// Span covering every token, i.e. the utterance minus edge punctuation.
    pub fn full_span(&self) -> Option<Span> {
        if self.tokens.is_empty() {
            return None;
        }
        self.span_of(0, self.tokens.len() - 1)
    }

    /// True when the words of `phrase` appear as consecutive tokens starting at `at`.
    pub fn matches_at(&self, at: usize, phrase: &[&str]) -> bool {
        if phrase.is_empty() || at + phrase.len() > self.tokens.len() {
            return false;
        }
        phrase
            .iter()
            .zip(&self.tokens[at..])
            .all(|(word, token)| token.text == *word)
    }

    /// Index of the first occurrence of `phrase` on token boundaries.
    pub fn find_phrase(&self, phrase: &[&str]) -> Option<usize> {
        (0..self.tokens.len()).find(|&i| self.matches_at(i, phrase))
    }

    /// Index of the last token ending at or before `offset`.
    pub fn token_before(&self, offset: usize) -> Option<usize> {
        self.tokens.iter().rposition(|t| t.span.end <= offset)
    }

    /// Index of the token starting exactly at `offset`.
    pub fn token_at(&self, offset: usize) -> Option<usize> {
        self.tokens.iter().position(|t| t.span.start == offset)
    }
}

/// Never fails: empty or whitespace-only input yields no tokens.
pub fn normalize(raw: &str) -> NormalizedText {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    for (i, c) in raw.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                push_word(raw, s, i, &mut tokens);
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        push_word(raw, s, raw.len(), &mut tokens);
    }

    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();

    NormalizedText {
        original: raw.to_string(),
        normalized,
        tokens,
    }
}

/// Trims edge punctuation off a whitespace-delimited word. Inner punctuation stays
/// ("5:30", "3/14", "don't", "p.m"); a word made only of punctuation is dropped.
fn push_word(raw: &str, start: usize, end: usize, tokens: &mut Vec<Token>) {
    let word = &raw[start..end];
    let Some(lead) = word.char_indices().find(|(_, c)| c.is_alphanumeric()).map(|(i, _)| i) else {
        return;
    };
    let trail = word
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_alphanumeric())
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(word.len());

    let span = Span::new(start + lead, start + trail);
    tokens.push(Token {
        text: raw[span.start..span.end].to_lowercase(),
        span,
    });
}
