//! Model-backed summarization through an [`LlmProvider`](crate::llm::LlmProvider).

use strata_types::error::SummarizeError;
use strata_types::llm::CompletionRequest;

use super::summarizer::{Summarizer, SummaryStage};
use crate::llm::BoxLlmProvider;

const SUMMARY_SYSTEM_PROMPT: &str = "You compress archived conversations into durable memory. \
Keep decisions, stated preferences, commitments, names, and open questions. \
Drop greetings, filler, and repeated content. Write in third person, past tense.";

const DIGEST_FORMAT: &str = "Respond with 3 to 8 short bullet lines starting with \"- \", \
then one final line of the form:\nHighlights: <comma-separated key topics, projects, or ideas>";

const CHUNK_FORMAT: &str = "This is one part of a longer conversation. \
Respond with short bullet lines starting with \"- \" covering only this part.";

const SUMMARY_MAX_TOKENS: u32 = 800;
const SUMMARY_TEMPERATURE: f32 = 0.2;

pub struct LlmSummarizer {
    provider: BoxLlmProvider,
}

impl LlmSummarizer {
    pub fn new(provider: BoxLlmProvider) -> Self {
        Self { provider }
    }

    fn prompt(text: &str, stage: SummaryStage) -> String {
        match stage {
            SummaryStage::Single => format!("{DIGEST_FORMAT}\n\nConversation:\n{text}"),
            SummaryStage::Chunk { index, total } => {
                format!("{CHUNK_FORMAT}\n\nPart {index} of {total}:\n{text}")
            }
            SummaryStage::Combine => format!(
                "Merge these partial summaries of one conversation into a single digest.\n\
                 {DIGEST_FORMAT}\n\nPartial summaries:\n{text}"
            ),
        }
    }
}

impl Summarizer for LlmSummarizer {
    fn name(&self) -> &str {
        "llm"
    }

    #[tracing::instrument(
        name = "summary.summarize_llm",
        skip(self, text),
        fields(provider = self.provider.name(), input_chars = text.len())
    )]
    async fn summarize(&self, text: &str, stage: SummaryStage) -> Result<String, SummarizeError> {
        if text.trim().is_empty() {
            return Err(SummarizeError::EmptyInput);
        }

        let mut request = CompletionRequest::new(Self::prompt(text, stage))
            .with_system(SUMMARY_SYSTEM_PROMPT)
            .with_temperature(SUMMARY_TEMPERATURE);
        request.max_tokens = SUMMARY_MAX_TOKENS;

        let response = self
            .provider
            .complete(&request)
            .await
            .map_err(|e| SummarizeError::Provider(e.to_string()))?;

        let summary = response.content.trim().to_string();
        if summary.is_empty() {
            return Err(SummarizeError::Provider("model returned an empty summary".into()));
        }
        Ok(summary)
    }
}
