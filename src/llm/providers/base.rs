//! Base HTTP client shared by cloud-based LLM providers, and the
//! OpenAI-compatible adapter trait used by providers that speak the
//! OpenAI chat-completions wire format.

use crate::error::{AppError, LlmError};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

pub struct HttpProviderClient {
    client: Client,
    timeout: Duration,
}

impl HttpProviderClient {
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
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| LlmError::Network(e.to_string()))?;

        self.handle_response(response).await
    }

    pub async fn get<R: DeserializeOwned>(
        &self,
        url: &str,
        headers: Vec<(&str, &str)>,
    ) -> Result<R, AppError> {
        debug!("GET {}", url);
        let mut request = self.client.get(url);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| LlmError::Network(e.to_string()))?;

        self.handle_response(response).await
    }

    async fn handle_response<R: DeserializeOwned>(&self, response: Response) -> Result<R, AppError> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| format!("HTTP {status} error"));
            error!("provider API error ({}): {}", status, error_text);

            let err = match status.as_u16() {
                401 | 403 => LlmError::AuthFailed(error_text),
                404 => LlmError::ModelNotFound(error_text),
                429 => LlmError::RateLimited,
                400..=499 => LlmError::InvalidRequest(error_text),
                500..=599 => LlmError::Network(error_text),
                _ => LlmError::InvalidResponse(error_text),
            };
            return Err(err.into());
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()).into())
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Adapter trait for providers that speak the OpenAI chat-completions wire
/// format with minor variations in base URL, auth header, or endpoint path.
pub trait OpenAICompatible {
    fn base_url(&self) -> &str;
    fn api_key(&self) -> Option<&str>;

    fn auth_headers(&self) -> Vec<(&str, String)> {
        let mut headers = Vec::new();
        if let Some(key) = self.api_key() {
            headers.push(("Authorization", format!("Bearer {key}")));
        }
        headers
    }

    fn transform_endpoint(&self, endpoint: &str) -> String {
        endpoint.to_string()
    }

    fn build_url(&self, endpoint: &str) -> String {
        let base = self.base_url().trim_end_matches('/');
        let transformed = self.transform_endpoint(endpoint);
        let path = transformed.trim_start_matches('/');
        format!("{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestProvider {
        base_url: String,
        api_key: Option<String>,
    }

    impl OpenAICompatible for TestProvider {
        fn base_url(&self) -> &str {
            &self.base_url
        }
        fn api_key(&self) -> Option<&str> {
            self.api_key.as_deref()
        }
    }

    #[test]
    fn builds_url_trimming_slashes() {
        let provider = TestProvider {
            base_url: "https://api.example.com/v1".to_string(),
            api_key: Some("key".to_string()),
        };
        assert_eq!(
            provider.build_url("/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn auth_headers_carry_bearer_token() {
        let provider = TestProvider {
            base_url: "https://api.example.com".to_string(),
            api_key: Some("key".to_string()),
        };
        let headers = provider.auth_headers();
        assert_eq!(headers, vec![("Authorization", "Bearer key".to_string())]);
    }
}
