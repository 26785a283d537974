//! Token counts for archived messages.
//!
//! Counted once at archive time with the tokenizer of the default chat
//! model, falling back to `cl100k_base` when the model is unknown.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

/// Model whose tokenizer sizes stored messages.
pub const TOKENIZER_MODEL: &str = "gpt-4o-mini";

static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn encoder() -> Option<&'static CoreBPE> {
    ENCODER
        .get_or_init(|| {
            tiktoken_rs::get_bpe_from_model(TOKENIZER_MODEL)
                .or_else(|_| tiktoken_rs::cl100k_base())
                .map_err(|e| tracing::warn!(error = %e, "tokenizer unavailable; counting words"))
                .ok()
        })
        .as_ref()
}

/// Number of tokens in `text`.
pub fn count_tokens(text: &str) -> u32 {
    match encoder() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len() as u32,
        None => text.split_whitespace().count() as u32,
    }
}
