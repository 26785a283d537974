//! Model-backed fact extraction.
//!
//! `LlmFactExtractor` asks a chat-completion model for strict JSON. Unlike
//! the heuristic extractor it can fail: provider errors and unparsable
//! output are returned as errors so the sweep retries the message later.

use serde::Deserialize;

use strata_types::archive::Message;
use strata_types::error::ExtractionError;
use strata_types::knowledge::{CandidateFact, FactKind};
use strata_types::llm::CompletionRequest;

use super::extractor::FactExtractor;
use crate::llm::BoxLlmProvider;

const EXTRACTION_SYSTEM_PROMPT: &str = r#"Extract structured memory items from a single conversation message.

Return STRICT JSON with shape:
{"facts": [{"kind": "preference|entity|pattern", "value": "...", "confidence": 0.0}]}

Rules:
- 0 to 5 facts.
- "preference": something the author likes, dislikes, or wants (value is the thing, e.g. "dark mode").
- "entity": a named person, place, project, product, or tool.
- "pattern": a recurring habit or workflow of the author.
- Only include high-signal items that will matter in later conversations.
- If there is nothing worth extracting, return {"facts": []}"#;

const MAX_FACTS: usize = 5;

#[derive(Debug, Deserialize)]
struct RawFact {
    kind: String,
    value: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOutput {
    Wrapped { facts: Vec<RawFact> },
    Bare(Vec<RawFact>),
}

/// Extractor that delegates to a chat-completion model.
pub struct LlmFactExtractor {
    provider: BoxLlmProvider,
}

impl LlmFactExtractor {
    pub fn new(provider: BoxLlmProvider) -> Self {
        Self { provider }
    }
}

impl FactExtractor for LlmFactExtractor {
    fn name(&self) -> &str {
        "llm"
    }

    #[tracing::instrument(
        name = "knowledge.extract_llm",
        skip(self, message),
        fields(message_id = %message.id, provider = self.provider.name())
    )]
    async fn extract(&self, message: &Message) -> Result<Vec<CandidateFact>, ExtractionError> {
        let request = CompletionRequest::new(format!("{}: {}", message.role, message.content))
            .with_system(EXTRACTION_SYSTEM_PROMPT)
            .with_temperature(0.0);

        let response = self
            .provider
            .complete(&request)
            .await
            .map_err(|e| ExtractionError::Provider(e.to_string()))?;

        parse_facts(&response.content)
    }
}

/// Parse model output into candidates. Unknown kinds are skipped.
pub fn parse_facts(content: &str) -> Result<Vec<CandidateFact>, ExtractionError> {
    let trimmed = strip_code_fence(content.trim());

    let raw = match serde_json::from_str::<RawOutput>(trimmed) {
        Ok(RawOutput::Wrapped { facts }) | Ok(RawOutput::Bare(facts)) => facts,
        Err(e) => {
            tracing::warn!(
                error = %e,
                content_preview = %trimmed.chars().take(200).collect::<String>(),
                "Failed to parse fact extraction JSON"
            );
            return Err(ExtractionError::InvalidOutput(e.to_string()));
        }
    };

    let facts = raw
        .into_iter()
        .filter_map(|f| match f.kind.parse::<FactKind>() {
            Ok(kind) if !f.value.trim().is_empty() => {
                Some(CandidateFact::new(kind, f.value.trim(), f.confidence))
            }
            Ok(_) => None,
            Err(_) => {
                tracing::warn!(kind = %f.kind, "Unknown fact kind from model; skipping");
                None
            }
        })
        .take(MAX_FACTS)
        .collect();

    Ok(facts)
}

fn strip_code_fence(s: &str) -> &str {
    let Some(inner) = s.strip_prefix("```") else {
        return s;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wrapped_and_bare_output() {
        let wrapped = r#"{"facts":[{"kind":"preference","value":"dark mode","confidence":0.9}]}"#;
        let facts = parse_facts(wrapped).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].kind, FactKind::Preference);
        assert!((facts[0].confidence - 0.9).abs() < 1e-9);

        let bare = r#"[{"kind":"entity","value":"Postgres"}]"#;
        let facts = parse_facts(bare).unwrap();
        assert_eq!(facts[0].value, "Postgres");
        assert_eq!(facts[0].confidence, 1.0);
    }

    #[test]
    fn strips_code_fences() {
        let fenced = "```json\n{\"facts\": []}\n```";
        assert!(parse_facts(fenced).unwrap().is_empty());
    }

    #[test]
    fn skips_unknown_kinds_and_blank_values() {
        let out = r#"{"facts":[
            {"kind":"insight","value":"x"},
            {"kind":"entity","value":"  "},
            {"kind":"pattern","value":"ships on fridays","confidence":4.0}
        ]}"#;
        let facts = parse_facts(out).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].confidence, 1.0);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let err = parse_facts("Sure! Here are the facts").unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidOutput(_)));
    }

    #[test]
    fn caps_fact_count() {
        let items: Vec<String> = (0..8)
            .map(|i| format!(r#"{{"kind":"entity","value":"E{i}"}}"#))
            .collect();
        let out = format!("[{}]", items.join(","));
        assert_eq!(parse_facts(&out).unwrap().len(), MAX_FACTS);
    }
}
