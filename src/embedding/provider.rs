//! Embedding provider trait and the primitives shared by every concrete
//! provider: token estimation, L2 normalization, and the orchestrator hookup.

use crate::error::{AppError, EmbeddingError};
use crate::orchestrator::OrchestratedProvider;
use async_trait::async_trait;

/// Behavior every embedding provider implements. Mirrors
/// [`crate::llm::provider::LlmProvider`] but returns vectors rather than text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn dimension(&self) -> usize;

    async fn generate(&self, text: &str) -> Result<Vec<f32>, AppError>;
    async fn generate_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError>;

    async fn health_check(&self) -> bool {
        self.generate("healthcheck").await.is_ok()
    }

    /// Estimated USD cost of embedding `texts`. Providers with no metered
    /// cost (local, deterministic) return 0.0.
    fn estimate_cost(&self, _texts: &[String]) -> f64 {
        0.0
    }
}

#[async_trait]
impl OrchestratedProvider for dyn EmbeddingProvider {
    fn provider_name(&self) -> &str {
        self.name()
    }

    async fn is_healthy(&self) -> bool {
        self.health_check().await
    }

    async fn supports_model(&self, model: &str) -> bool {
        self.model() == model
    }
}

/// Word-count-based token estimate (`words * 1.3`); no real tokenizer vendored.
pub fn estimate_tokens(text: &str) -> usize {
    ((text.split_whitespace().count() as f64) * 1.3).ceil() as usize
}

pub(crate) fn check_token_limit(text: &str, limit: usize) -> Result<(), AppError> {
    let estimated = estimate_tokens(text);
    if estimated > limit {
        return Err(EmbeddingError::InputTooLarge { estimated, limit }.into());
    }
    Ok(())
}

/// L2-normalize a vector in place; a zero vector is left unchanged.
pub fn normalize_l2(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_scales_word_count() {
        assert_eq!(estimate_tokens("one two three four five"), 7);
    }

    #[test]
    fn normalize_l2_produces_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize_l2(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_l2_leaves_zero_vector_unchanged() {
        let mut v = vec![0.0, 0.0];
        normalize_l2(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn check_token_limit_rejects_oversized_input() {
        let text = (0..100).map(|_| "word").collect::<Vec<_>>().join(" ");
        let err = check_token_limit(&text, 50).unwrap_err();
        assert!(matches!(err, AppError::Embedding(EmbeddingError::InputTooLarge { .. })));
    }
}
