//! Transcript rendering, chunking and summary header parsing.

use strata_types::archive::Message;
use strata_types::error::SummarizeError;

use super::summarizer::{BoxSummarizer, SummaryStage};

const PARTIAL_SEPARATOR: &str = "\n\n---\n\n";

/// Headers whose comma-separated values become digest highlights.
const HIGHLIGHT_HEADERS: &[&str] = &["Highlights", "Projects active", "Ideas mentioned"];

/// One line per message, in conversation order.
pub fn render_transcript(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .map(|m| {
            format!(
                "[{}] {}: {}",
                m.created_at.format("%Y-%m-%d %H:%M"),
                m.role,
                m.content.replace('\n', " ")
            )
        })
        .collect()
}

/// Group lines into chunks of at most `chunk_chars` characters.
///
/// A single line longer than the limit becomes its own chunk.
pub fn chunk_lines(lines: &[String], chunk_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buf: Vec<&str> = Vec::new();
    let mut buf_len = 0;

    for line in lines {
        let len = line.chars().count() + 1;
        if !buf.is_empty() && buf_len + len > chunk_chars {
            chunks.push(buf.join("\n"));
            buf.clear();
            buf_len = 0;
        }
        buf.push(line);
        buf_len += len;
    }
    if !buf.is_empty() {
        chunks.push(buf.join("\n"));
    }
    chunks
}

/// Summarize a transcript, splitting it into map-reduce stages when it is
/// longer than `chunk_chars`.
pub async fn summarize_transcript(
    summarizer: &BoxSummarizer,
    lines: &[String],
    chunk_chars: usize,
) -> Result<String, SummarizeError> {
    let chunks = chunk_lines(lines, chunk_chars.max(1));
    match chunks.len() {
        0 => Err(SummarizeError::EmptyInput),
        1 => summarizer.summarize(&chunks[0], SummaryStage::Single).await,
        total => {
            let mut partials = Vec::with_capacity(total);
            for (i, chunk) in chunks.iter().enumerate() {
                let stage = SummaryStage::Chunk {
                    index: i + 1,
                    total,
                };
                partials.push(summarizer.summarize(chunk, stage).await?);
            }
            tracing::debug!(chunks = total, "Combining partial summaries");
            summarizer
                .summarize(&partials.join(PARTIAL_SEPARATOR), SummaryStage::Combine)
                .await
        }
    }
}

/// Comma-separated values after `header:` on the first matching line.
pub fn parse_header_list(text: &str, header: &str) -> Option<Vec<String>> {
    let prefix = header.to_lowercase();
    for line in text.lines() {
        let trimmed = line.trim().trim_start_matches(['-', '*', ' ']);
        if trimmed.to_lowercase().starts_with(&prefix) {
            let rest = trimmed.split_once(':').map(|(_, r)| r.trim())?;
            let items: Vec<String> = rest
                .split(',')
                .map(|x| x.trim().to_string())
                .filter(|x| !x.is_empty())
                .collect();
            return if items.is_empty() { None } else { Some(items) };
        }
    }
    None
}

/// Highlights from any of the recognized headers, deduplicated in order.
pub fn parse_highlights(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for header in HIGHLIGHT_HEADERS {
        for item in parse_header_list(text, header).unwrap_or_default() {
            if !out.iter().any(|h| h.eq_ignore_ascii_case(&item)) {
                out.push(item);
            }
        }
    }
    out
}
