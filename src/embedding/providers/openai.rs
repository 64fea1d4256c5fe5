//! Hosted OpenAI embedding provider. Model table and cost-per-1k-tokens
//! mirror the known `text-embedding-*` family.

use crate::embedding::provider::{check_token_limit, normalize_l2, EmbeddingProvider};
use crate::embedding::providers::base::EmbeddingHttpClient;
use crate::error::{AppError, EmbeddingError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

const BATCH_SIZE: usize = 100;

fn model_config(model: &str) -> (usize, usize, f64) {
    match model {
        "text-embedding-3-large" => (3072, 8191, 0.00013),
        "text-embedding-ada-002" => (1536, 8191, 0.0001),
        _ => (1536, 8191, 0.00002), // text-embedding-3-small and unknown models
    }
}

pub struct OpenAIEmbeddingProvider {
    client: EmbeddingHttpClient,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    token_limit: usize,
    cost_per_1k_tokens: f64,
    normalize: bool,
}

impl OpenAIEmbeddingProvider {
    pub fn new(api_key: String, model: impl Into<String>, base_url: Option<String>) -> Self {
        let model = model.into();
        let (dimension, token_limit, cost_per_1k_tokens) = model_config(&model);
        Self {
            client: EmbeddingHttpClient::new(30),
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
            model,
            dimension,
            token_limit,
            cost_per_1k_tokens,
            normalize: true,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn generate(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let mut vectors = self.generate_batch(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()).into())
    }

    async fn generate_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            check_token_limit(text, self.token_limit)?;
        }

        let url = self.endpoint();
        let auth = self.auth_header();
        let mut out = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let body = EmbeddingsRequest {
                model: &self.model,
                input: chunk,
            };
            let headers = vec![("Authorization", auth.as_str())];
            let response: EmbeddingsResponse = self.client.post_json(&url, &body, headers).await?;
            if response.data.len() != chunk.len() {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "expected {} embeddings, got {}",
                    chunk.len(),
                    response.data.len()
                ))
                .into());
            }
            for mut item in response.data {
                if self.normalize {
                    normalize_l2(&mut item.embedding);
                }
                out.push(item.embedding);
            }
        }

        Ok(out)
    }

    fn estimate_cost(&self, texts: &[String]) -> f64 {
        let total_tokens: usize = texts.iter().map(|t| crate::embedding::provider::estimate_tokens(t)).sum();
        (total_tokens as f64 / 1000.0) * self.cost_per_1k_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_config_picks_known_dimensions() {
        assert_eq!(model_config("text-embedding-3-large").0, 3072);
        assert_eq!(model_config("text-embedding-ada-002").0, 1536);
        assert_eq!(model_config("text-embedding-3-small").0, 1536);
    }

    #[test]
    fn estimate_cost_scales_with_token_count() {
        let provider = OpenAIEmbeddingProvider::new("key".to_string(), "text-embedding-3-small", None);
        let texts = vec!["one two three four five".to_string()];
        assert!(provider.estimate_cost(&texts) > 0.0);
    }

    #[tokio::test]
    async fn generate_batch_rejects_oversized_input() {
        let provider = OpenAIEmbeddingProvider::new("key".to_string(), "text-embedding-3-small", None);
        let huge = (0..10_000).map(|_| "word").collect::<Vec<_>>().join(" ");
        let err = provider.generate_batch(&[huge]).await.unwrap_err();
        assert!(matches!(err, AppError::Embedding(EmbeddingError::InputTooLarge { .. })));
    }
}
