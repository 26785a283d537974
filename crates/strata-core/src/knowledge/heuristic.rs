//! Phrase-based fact extraction.
//!
//! A keyless extractor used when no model-backed extractor is configured.
//! It recognizes first-person preference and habit phrases in user (and
//! system) messages, and entity mentions (inline code spans and capitalized
//! names that do not start a sentence) in any message.

use std::collections::HashSet;

use strata_types::archive::{Message, MessageRole};
use strata_types::error::ExtractionError;
use strata_types::knowledge::{CandidateFact, FactKind};

use super::extractor::FactExtractor;

const PREFERENCE_TRIGGERS: &[&str] = &[
    "i would prefer ",
    "i'd prefer ",
    "i prefer ",
    "prefers ",
    "i would rather ",
    "i'd rather ",
    "i really like ",
    "i like ",
    "i love ",
    "i always use ",
];

const PATTERN_TRIGGERS: &[&str] = &[
    "i usually ",
    "i tend to ",
    "i often ",
    "i typically ",
    "i normally ",
];

const RECURRENCE_MARKERS: &[&str] = &[
    "every morning",
    "every day",
    "every week",
    "every night",
    "each morning",
    "each week",
];

const NOT_ENTITIES: &[&str] = &[
    "I", "I'm", "I've", "I'd", "I'll", "OK", "Ok", "Yes", "No", "Thanks", "Please",
];

const PREFERENCE_CONFIDENCE: f64 = 0.8;
const PATTERN_CONFIDENCE: f64 = 0.6;
const CODE_ENTITY_CONFIDENCE: f64 = 0.7;
const NAME_ENTITY_CONFIDENCE: f64 = 0.5;

/// Keyless extractor driven by phrase triggers.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicExtractor;

impl HeuristicExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous extraction; the trait impl delegates here.
    pub fn extract_sync(&self, message: &Message) -> Vec<CandidateFact> {
        let mut out = Vec::new();
        let first_person = matches!(message.role, MessageRole::User | MessageRole::System);

        for sentence in sentences(&message.content) {
            let lower = sentence.to_lowercase();

            if first_person {
                if let Some(value) = after_trigger(&lower, PREFERENCE_TRIGGERS) {
                    out.push(CandidateFact::new(
                        FactKind::Preference,
                        value,
                        PREFERENCE_CONFIDENCE,
                    ));
                }

                if let Some(value) = after_trigger(&lower, PATTERN_TRIGGERS) {
                    out.push(CandidateFact::new(FactKind::Pattern, value, PATTERN_CONFIDENCE));
                } else if RECURRENCE_MARKERS.iter().any(|m| lower.contains(m)) {
                    let value = lower.strip_prefix("i ").unwrap_or(&lower);
                    out.push(CandidateFact::new(FactKind::Pattern, value, PATTERN_CONFIDENCE));
                }
            }

            for span in code_spans(sentence) {
                out.push(CandidateFact::new(FactKind::Entity, span, CODE_ENTITY_CONFIDENCE));
            }
            for name in capitalized_names(sentence) {
                out.push(CandidateFact::new(FactKind::Entity, name, NAME_ENTITY_CONFIDENCE));
            }
        }

        let mut seen = HashSet::new();
        out.retain(|c| !c.value.is_empty() && seen.insert((c.kind, c.value.to_lowercase())));
        out
    }
}

impl FactExtractor for HeuristicExtractor {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn extract(&self, message: &Message) -> Result<Vec<CandidateFact>, ExtractionError> {
        Ok(self.extract_sync(message))
    }
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Text following the earliest trigger, up to the next clause break.
///
/// Triggers only match at a word boundary.
fn after_trigger(lower: &str, triggers: &[&str]) -> Option<String> {
    let (start, trigger) = triggers
        .iter()
        .filter_map(|t| lower.find(t).map(|i| (i, *t)))
        .min_by_key(|(i, _)| *i)?;
    if start > 0 && !lower[..start].ends_with(' ') {
        return None;
    }
    let rest = &lower[start + trigger.len()..];
    let clause = rest.split([',', ';']).next().unwrap_or("").trim();
    if clause.is_empty() {
        None
    } else {
        Some(clause.to_string())
    }
}

fn code_spans(sentence: &str) -> Vec<String> {
    sentence
        .split('`')
        .skip(1)
        .step_by(2)
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.len() <= 64)
        .map(str::to_string)
        .collect()
}

fn capitalized_names(sentence: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for (i, raw) in sentence.split_whitespace().enumerate() {
        if raw.contains('`') {
            flush(&mut current, &mut names);
            continue;
        }
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
        let capitalized = word.chars().next().is_some_and(|c| c.is_uppercase());
        let candidate = i > 0 && capitalized && word.len() > 1 && !NOT_ENTITIES.contains(&word);

        if candidate {
            current.push(word);
            if raw.ends_with([',', ';', ':']) {
                flush(&mut current, &mut names);
            }
        } else {
            flush(&mut current, &mut names);
        }
    }
    flush(&mut current, &mut names);
    names
}

fn flush(current: &mut Vec<&str>, names: &mut Vec<String>) {
    if !current.is_empty() {
        names.push(current.join(" "));
        current.clear();
    }
}
