//! Deterministic, keyless hash embedding.
//!
//! Text is tokenized into lowercase words; each word and each of its
//! character trigrams is hashed with SHA-256 into a signed bucket of a
//! fixed-width vector (feature hashing). Text with no word characters is
//! expanded from the SHA-256 of the whole input in counter mode. The result
//! is L2-normalized.
//!
//! The output depends only on the input bytes and the dimension, so the same
//! text yields a bit-identical vector in every process on every platform.

use sha2::{Digest, Sha256};
use strata_types::error::EmbeddingError;

use super::embedder::Embedder;
use super::vector::l2_normalize;

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.35;

/// Local embedder backed by feature hashing.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Embed a single text. Infallible and pure.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        let mut any_feature = false;

        for word in tokenize(text) {
            add_feature(&mut vector, b"w:", word.as_bytes(), WORD_WEIGHT);
            any_feature = true;

            let padded: Vec<char> = format!("^{word}$").chars().collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                add_feature(&mut vector, b"t:", trigram.as_bytes(), TRIGRAM_WEIGHT);
            }
        }

        if !any_feature {
            self.fill_counter_mode(&mut vector, text.as_bytes());
        }

        l2_normalize(&vector)
    }

    fn fill_counter_mode(&self, vector: &mut [f32], input: &[u8]) {
        let mut counter: u32 = 0;
        let mut filled = 0;
        while filled < vector.len() {
            let mut hasher = Sha256::new();
            hasher.update(counter.to_le_bytes());
            hasher.update(input);
            let block = hasher.finalize();
            for chunk in block.chunks_exact(4) {
                if filled == vector.len() {
                    break;
                }
                let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                vector[filled] = (raw as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32;
                filled += 1;
            }
            counter = counter.wrapping_add(1);
        }
    }
}

impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn model_name(&self) -> &str {
        "hash-fallback"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

fn add_feature(vector: &mut [f32], namespace: &[u8], feature: &[u8], weight: f32) {
    let mut hasher = Sha256::new();
    hasher.update(namespace);
    hasher.update(feature);
    let digest = hasher.finalize();

    let mut index_bytes = [0u8; 8];
    index_bytes.copy_from_slice(&digest[..8]);
    let index = (u64::from_le_bytes(index_bytes) % vector.len() as u64) as usize;
    let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
    vector[index] += sign * weight;
}
