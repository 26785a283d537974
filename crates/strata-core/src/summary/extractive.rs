//! Keyless extractive summarizer.
//!
//! Picks the most informative transcript lines (decisions, plans,
//! preferences, questions) in their original order and appends a
//! `Highlights:` line with the most frequent content words. Deterministic,
//! so digests produced without a model are reproducible.

use std::collections::{BTreeMap, HashSet};

use strata_types::error::SummarizeError;

use super::summarizer::{Summarizer, SummaryStage};

const MAX_LINES: usize = 8;
const MAX_LINE_CHARS: usize = 240;
const MAX_HIGHLIGHTS: usize = 5;

const SIGNAL_WORDS: &[&str] = &[
    "prefer", "decided", "decide", "agreed", "plan", "will", "need", "should", "must",
    "remember", "always", "never", "important", "todo", "deadline", "because",
];

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "also", "been", "before", "being", "could", "does", "doing",
    "from", "have", "having", "here", "into", "just", "like", "more", "most", "much", "only",
    "other", "over", "same", "should", "some", "such", "than", "that", "their", "them", "then",
    "there", "these", "they", "this", "those", "through", "very", "want", "what", "when",
    "where", "which", "while", "will", "with", "would", "your", "assistant", "user", "system",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractiveSummarizer;

impl ExtractiveSummarizer {
    pub fn new() -> Self {
        Self
    }

    pub fn summarize_sync(&self, text: &str, stage: SummaryStage) -> Result<String, SummarizeError> {
        let lines: Vec<&str> = match stage {
            // Partial summaries: keep their bullets, drop their highlight lines.
            SummaryStage::Combine => text
                .lines()
                .map(str::trim)
                .filter(|l| l.starts_with("- "))
                .map(|l| l.trim_start_matches("- "))
                .collect(),
            _ => text.lines().map(strip_timestamp).collect(),
        };
        let lines: Vec<&str> = lines.into_iter().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() {
            return Err(SummarizeError::EmptyInput);
        }

        let selected = select_lines(&lines);
        let mut seen = HashSet::new();
        let mut out: Vec<String> = selected
            .into_iter()
            .filter(|l| seen.insert(l.to_lowercase()))
            .map(|l| format!("- {}", truncate(l, MAX_LINE_CHARS)))
            .collect();

        let highlights = top_terms(&lines, MAX_HIGHLIGHTS);
        if !highlights.is_empty() {
            out.push(format!("Highlights: {}", highlights.join(", ")));
        }
        Ok(out.join("\n"))
    }
}

impl Summarizer for ExtractiveSummarizer {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn summarize(&self, text: &str, stage: SummaryStage) -> Result<String, SummarizeError> {
        self.summarize_sync(text, stage)
    }
}

/// Drop a leading `[timestamp] ` prefix from a transcript line.
fn strip_timestamp(line: &str) -> &str {
    let line = line.trim();
    match line.strip_prefix('[').and_then(|rest| rest.split_once("] ")) {
        Some((_, body)) => body,
        None => line,
    }
}

fn score(line: &str) -> u32 {
    let lower = line.to_lowercase();
    let mut score = 0;
    if lower.starts_with("user:") {
        score += 1;
    }
    if lower.contains('?') {
        score += 1;
    }
    score += SIGNAL_WORDS
        .iter()
        .filter(|w| lower.split(|c: char| !c.is_alphanumeric()).any(|t| t == **w))
        .count() as u32
        * 2;
    score
}

/// First and last line plus the highest scoring lines, in original order.
fn select_lines<'a>(lines: &[&'a str]) -> Vec<&'a str> {
    if lines.len() <= MAX_LINES {
        return lines.to_vec();
    }

    let last = lines.len() - 1;
    let mut ranked: Vec<usize> = (1..last).collect();
    // Stable sort keeps earlier lines first among equal scores.
    ranked.sort_by_key(|&i| std::cmp::Reverse(score(lines[i])));

    let mut keep: Vec<usize> = vec![0, last];
    keep.extend(ranked.into_iter().take(MAX_LINES - 2));
    keep.sort_unstable();
    keep.into_iter().map(|i| lines[i]).collect()
}

fn truncate(line: &str, max: usize) -> String {
    if line.chars().count() <= max {
        return line.to_string();
    }
    let mut out: String = line.chars().take(max - 1).collect();
    out.push('…');
    out
}

/// Most frequent content words; ties break alphabetically.
fn top_terms(lines: &[&str], n: usize) -> Vec<String> {
    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
    for line in lines {
        let body = line.split_once(": ").map_or(*line, |(_, b)| b);
        for token in body.split(|c: char| !c.is_alphanumeric()) {
            let token = token.to_lowercase();
            if token.chars().count() >= 4
                && !token.chars().all(|c| c.is_ascii_digit())
                && !STOPWORDS.contains(&token.as_str())
            {
                *counts.entry(token).or_default() += 1;
            }
        }
    }
    let mut terms: Vec<(String, u32)> = counts.into_iter().collect();
    terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    terms.into_iter().take(n).map(|(t, _)| t).collect()
}
