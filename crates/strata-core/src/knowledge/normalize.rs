//! Per-kind value normalization.
//!
//! Two candidate values are the same fact when their kinds match and their
//! normalized values are equal. Each kind has its own rules: preferences
//! drop articles and trailing qualifiers, entities keep their words but
//! fold case, patterns drop punctuation entirely.

use strata_types::knowledge::FactKind;

/// Normalization and equivalence for one fact kind.
pub trait ValueNormalizer: Send + Sync {
    fn normalize(&self, value: &str) -> String;

    fn equivalent(&self, a: &str, b: &str) -> bool {
        self.normalize(a) == self.normalize(b)
    }
}

const EDGE_PUNCTUATION: &[char] = &[
    '.', ',', '!', '?', ';', ':', '"', '\'', '`', '(', ')', '[', ']', '-', '*',
];

const LEADING_WORDS: &[&str] = &["the", "a", "an", "to", "using", "use", "my", "that", "for"];

/// Phrases that start a qualifier rather than the preferred thing itself.
const TRAILING_QUALIFIERS: &[&str] = &[
    " in ", " for ", " on ", " at ", " when ", " whenever ", " over ", " instead of ",
    " rather than ", " because ", " since ", " if ", " so ", " but ", " as ",
];

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_leading_words(mut value: String) -> String {
    loop {
        let Some(first) = value.split(' ').next() else {
            return value;
        };
        if LEADING_WORDS.contains(&first) && value.len() > first.len() {
            value = value[first.len()..].trim_start().to_string();
        } else {
            return value;
        }
    }
}

/// Preferences: "the Dark Mode in every editor." -> "dark mode".
#[derive(Debug, Default, Clone, Copy)]
pub struct PreferenceNormalizer;

impl ValueNormalizer for PreferenceNormalizer {
    fn normalize(&self, value: &str) -> String {
        let mut v = collapse_whitespace(&value.to_lowercase());
        v = v.trim_matches(EDGE_PUNCTUATION).trim().to_string();
        v = strip_leading_words(v);

        let padded = format!("{v} ");
        let cut = TRAILING_QUALIFIERS
            .iter()
            .filter_map(|q| padded.find(q))
            .filter(|&i| i > 0)
            .min();
        if let Some(i) = cut {
            v.truncate(i);
        }
        v.trim_matches(EDGE_PUNCTUATION).trim().to_string()
    }
}

/// Entities: case-folded, whitespace-collapsed, edge punctuation removed.
#[derive(Debug, Default, Clone, Copy)]
pub struct EntityNormalizer;

impl ValueNormalizer for EntityNormalizer {
    fn normalize(&self, value: &str) -> String {
        collapse_whitespace(value.trim_matches(EDGE_PUNCTUATION))
            .trim_matches(EDGE_PUNCTUATION)
            .to_lowercase()
    }
}

/// Patterns: lowercase words only.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternNormalizer;

impl ValueNormalizer for PatternNormalizer {
    fn normalize(&self, value: &str) -> String {
        let cleaned: String = value
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
            .collect();
        strip_leading_words(collapse_whitespace(&cleaned))
    }
}

/// The normalizer for each fact kind.
pub struct FactNormalizer {
    preference: Box<dyn ValueNormalizer>,
    entity: Box<dyn ValueNormalizer>,
    pattern: Box<dyn ValueNormalizer>,
}

impl Default for FactNormalizer {
    fn default() -> Self {
        Self {
            preference: Box::new(PreferenceNormalizer),
            entity: Box::new(EntityNormalizer),
            pattern: Box::new(PatternNormalizer),
        }
    }
}

impl FactNormalizer {
    /// Replace the normalizer used for one kind.
    pub fn with(mut self, kind: FactKind, normalizer: impl ValueNormalizer + 'static) -> Self {
        let boxed: Box<dyn ValueNormalizer> = Box::new(normalizer);
        match kind {
            FactKind::Preference => self.preference = boxed,
            FactKind::Entity => self.entity = boxed,
            FactKind::Pattern => self.pattern = boxed,
        }
        self
    }

    pub fn for_kind(&self, kind: FactKind) -> &dyn ValueNormalizer {
        match kind {
            FactKind::Preference => self.preference.as_ref(),
            FactKind::Entity => self.entity.as_ref(),
            FactKind::Pattern => self.pattern.as_ref(),
        }
    }

    pub fn normalize(&self, kind: FactKind, value: &str) -> String {
        self.for_kind(kind).normalize(value)
    }
}
