//! Deterministic, hash-derived embedding provider. Test/fallback-only: the
//! vectors it produces carry no real semantic content and must never be
//! mixed into the same index as vectors from a real provider.

use crate::embedding::provider::{normalize_l2, EmbeddingProvider};
use crate::error::AppError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Letters used for the per-character-frequency features, ordered by English
/// frequency (most common first).
const FREQ_LETTERS: &[u8] = b"etaoinshrdlcumwfgypbvkjxqz";

const HASH_WEIGHT: f32 = 0.7;
const FEATURE_WEIGHT: f32 = 0.3;

pub struct DeterministicHashEmbeddingProvider {
    model: String,
    dimension: usize,
    normalize: bool,
}

impl DeterministicHashEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            model: "deterministic-hash-v1".to_string(),
            dimension,
            normalize: true,
        }
    }

    fn hash_embedding(&self, text: &str) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dimension);
        let mut counter: u32 = 0;
        while out.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for byte in digest.iter() {
                if out.len() >= self.dimension {
                    break;
                }
                out.push((*byte as f32 - 127.5) / 127.5);
            }
            counter += 1;
        }
        out
    }

    /// Word/char/sentence statistics (dims 0-4) followed by per-letter
    /// frequency for the most common English letters, tiled to fill the
    /// remaining dimensions.
    fn text_features(&self, text: &str) -> Vec<f32> {
        let words = text.split_whitespace().count() as f32;
        let chars = text.chars().count().max(1) as f32;
        let sentences = text.chars().filter(|c| *c == '.' || *c == '!' || *c == '?').count() as f32;
        let questions = text.chars().filter(|c| *c == '?').count() as f32;
        let exclamations = text.chars().filter(|c| *c == '!').count() as f32;

        let mut features = vec![
            (words / 100.0).min(1.0),
            (chars / 1000.0).min(1.0),
            (sentences / chars).min(1.0),
            (questions / chars).min(1.0),
            (exclamations / chars).min(1.0),
        ];

        let lower: Vec<char> = text.to_lowercase().chars().collect();
        let letter_freqs: Vec<f32> = FREQ_LETTERS
            .iter()
            .map(|&b| {
                let letter = b as char;
                let count = lower.iter().filter(|c| **c == letter).count() as f32;
                count / chars
            })
            .collect();

        while features.len() < self.dimension {
            let remaining = self.dimension - features.len();
            features.extend(letter_freqs.iter().copied().take(remaining));
        }
        features.truncate(self.dimension);
        features
    }
}

#[async_trait]
impl EmbeddingProvider for DeterministicHashEmbeddingProvider {
    fn name(&self) -> &str {
        "deterministic-hash"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn generate(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let hash = self.hash_embedding(text);
        let features = self.text_features(text);
        let mut blended: Vec<f32> = hash
            .iter()
            .zip(features.iter())
            .map(|(h, f)| HASH_WEIGHT * h + FEATURE_WEIGHT * f)
            .collect();
        if self.normalize {
            normalize_l2(&mut blended);
        }
        Ok(blended)
    }

    async fn generate_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.generate(text).await?);
        }
        Ok(out)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generate_is_deterministic_for_the_same_text() {
        let provider = DeterministicHashEmbeddingProvider::new(64);
        let a = provider.generate("hello world").await.unwrap();
        let b = provider.generate("hello world").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn generate_differs_across_distinct_inputs() {
        let provider = DeterministicHashEmbeddingProvider::new(64);
        let a = provider.generate("hello world").await.unwrap();
        let b = provider.generate("goodbye world").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn generate_respects_configured_dimension() {
        let provider = DeterministicHashEmbeddingProvider::new(32);
        let vector = provider.generate("some text here").await.unwrap();
        assert_eq!(vector.len(), 32);
    }
}
