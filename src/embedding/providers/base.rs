//! HTTP client shared by hosted embedding providers. Same shape as
//! `llm/providers/base.rs::HttpProviderClient`, mapping failures into the
//! embedding error taxonomy instead of the LLM one.

use crate::error::{AppError, EmbeddingError};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

pub struct EmbeddingHttpClient {
    client: Client,
    timeout: Duration,
}

impl EmbeddingHttpClient {
    pub fn new(timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: Vec<(&str, &str)>,
    ) -> Result<R, AppError> {
        debug!("POST {}", url);
        let mut request = self.client.post(url).json(body);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| EmbeddingError::Timeout)?
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        self.handle_response(response).await
    }

    async fn handle_response<R: DeserializeOwned>(&self, response: Response) -> Result<R, AppError> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| format!("HTTP {status} error"));
            error!("embedding provider API error ({}): {}", status, error_text);

            let err = match status.as_u16() {
                401 | 403 => EmbeddingError::AuthFailed(error_text),
                429 => EmbeddingError::QuotaExceeded(error_text),
                400..=499 => EmbeddingError::InvalidResponse(error_text),
                500..=599 => EmbeddingError::Network(error_text),
                _ => EmbeddingError::InvalidResponse(error_text),
            };
            return Err(err.into());
        }

        response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()).into())
    }
}
