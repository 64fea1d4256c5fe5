//! Local embedding provider: talks to a locally-hosted sentence-transformers
//! style inference server over HTTP rather than vendoring a tensor runtime.
//! The model is "loaded" lazily — the first call pings the server's health
//! endpoint and caches the result instead of eagerly connecting at
//! construction time.

use crate::embedding::provider::{normalize_l2, EmbeddingProvider};
use crate::embedding::providers::base::EmbeddingHttpClient;
use crate::error::{AppError, EmbeddingError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

#[derive(Debug, Serialize)]
struct LocalEmbedRequest<'a> {
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct LocalEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct LocalEmbeddingProvider {
    client: EmbeddingHttpClient,
    base_url: String,
    model: String,
    dimension: usize,
    normalize: bool,
    loaded: OnceCell<()>,
}

impl LocalEmbeddingProvider {
    pub fn new(base_url: String, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: EmbeddingHttpClient::new(60),
            base_url,
            model: model.into(),
            dimension,
            normalize: true,
            loaded: OnceCell::new(),
        }
    }

    async fn ensure_loaded(&self) -> Result<(), AppError> {
        self.loaded
            .get_or_try_init(|| async {
                let url = format!("{}/health", self.base_url.trim_end_matches('/'));
                let _: serde_json::Value = self.client.post_json(&url, &serde_json::json!({}), vec![]).await?;
                Ok::<(), AppError>(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    fn name(&self) -> &str {
        "local"
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
        self.ensure_loaded().await?;

        let url = format!("{}/embed", self.base_url.trim_end_matches('/'));
        let body = LocalEmbedRequest { inputs: texts };
        let response: LocalEmbedResponse = self.client.post_json(&url, &body, vec![]).await?;
        if response.embeddings.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.embeddings.len()
            ))
            .into());
        }

        let mut out = response.embeddings;
        if self.normalize {
            for vector in out.iter_mut() {
                normalize_l2(vector);
            }
        }
        Ok(out)
    }

    fn estimate_cost(&self, _texts: &[String]) -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_cost_is_always_zero() {
        let provider = LocalEmbeddingProvider::new("http://localhost:8001".to_string(), "all-MiniLM-L6-v2", 384);
        assert_eq!(provider.estimate_cost(&["anything".to_string()]), 0.0);
    }

    #[tokio::test]
    async fn generate_batch_on_empty_input_short_circuits() {
        let provider = LocalEmbeddingProvider::new("http://localhost:8001".to_string(), "all-MiniLM-L6-v2", 384);
        let result = provider.generate_batch(&[]).await.unwrap();
        assert!(result.is_empty());
    }
}
