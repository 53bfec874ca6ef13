//! Static question/answer data used when no live answer is available.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::Path;

use super::similarity::similarity;

/// Minimum similarity for a corpus question to count as a match.
pub const FUZZY_THRESHOLD: f64 = 0.7;

/// Bundled corpus, parsed once at startup.
const BUNDLED_CORPUS: &str = include_str!("../../data/qa_corpus.json");

/// Keyword fallbacks, checked in order. Matching is a case-insensitive
/// substring test against the whole question.
pub const KEYWORD_ANSWERS: &[(&str, &str)] = &[
  (
    "espresso",
    "Espresso is brewed by forcing hot water (about 93°C) through finely ground coffee at around 9 bar. \
     Aim for roughly 18 g in and 36 g out in 25-30 seconds.",
  ),
  (
    "cold brew",
    "For cold brew, steep coarse grounds in cold water at about 1:8 for 12-18 hours, then filter \
     and dilute to taste.",
  ),
  (
    "french press",
    "Use a coarse grind at about 1:15, steep for 4 minutes, break the crust, then press slowly.",
  ),
  (
    "pour over",
    "For pour over, use a medium-fine grind at about 1:16, bloom for 30-45 seconds, then pour in \
     slow circles to finish around 3 minutes.",
  ),
  (
    "grind",
    "Match grind to contact time: fine for espresso, medium for drip and pour over, coarse for \
     French press and cold brew.",
  ),
  (
    "ratio",
    "A good starting ratio is 1:16 coffee to water for filter methods and 1:2 for espresso.",
  ),
  (
    "temperature",
    "Brew with water between 90°C and 96°C. Lighter roasts like the hotter end.",
  ),
  (
    "decaf",
    "Decaf brews like regular coffee but often extracts faster; try a slightly coarser grind.",
  ),
];

/// One question and its answer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QaEntry {
  pub question: String,
  pub answer: String,
}

/// Read-only set of known questions.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
  entries: Vec<QaEntry>,
}

impl Corpus {
  pub fn new(entries: Vec<QaEntry>) -> Self {
    Self { entries }
  }

  /// The corpus shipped with the crate.
  pub fn bundled() -> Result<Self> {
    Self::from_json(BUNDLED_CORPUS)
  }

  /// Parse a JSON array of `{question, answer}` objects.
  pub fn from_json(json: &str) -> Result<Self> {
    let entries: Vec<QaEntry> =
      serde_json::from_str(json).map_err(|e| eyre!("Failed to parse Q&A corpus: {}", e))?;
    Ok(Self::new(entries))
  }

  /// Load a corpus file from disk.
  pub fn load(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read Q&A corpus {}: {}", path.display(), e))?;
    Self::from_json(&contents)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Highest-scoring entry for `question`. The first entry wins ties.
  pub fn best_match(&self, question: &str) -> Option<(&QaEntry, f64)> {
    let mut best: Option<(&QaEntry, f64)> = None;

    for entry in &self.entries {
      let score = similarity(question, &entry.question);
      if best.map_or(true, |(_, top)| score > top) {
        best = Some((entry, score));
      }
    }

    best
  }

  /// Best entry if it clears [`FUZZY_THRESHOLD`].
  pub fn fuzzy_answer(&self, question: &str) -> Option<&QaEntry> {
    self
      .best_match(question)
      .filter(|(_, score)| *score >= FUZZY_THRESHOLD)
      .map(|(entry, _)| entry)
  }
}

/// First keyword answer whose keyword appears in `question`.
pub fn keyword_answer(question: &str) -> Option<&'static str> {
  let question = question.to_lowercase();
  KEYWORD_ANSWERS
    .iter()
    .find(|(keyword, _)| question.contains(keyword))
    .map(|(_, answer)| *answer)
}
