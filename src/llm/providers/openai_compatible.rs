//! Shared implementation for providers that speak the OpenAI chat-completions
//! wire format: OpenAI itself, and (via a different adapter) any other
//! provider exposing the same shape.

use crate::error::{AppError, LlmError};
use crate::llm::provider::{
    GenerationRequest, GenerationResponse, LlmProvider, ProviderConfig, ProviderStats,
    ProviderType, Role, TokenUsage,
};
use crate::llm::providers::base::{HttpProviderClient, OpenAICompatible};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub temperature: f32,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIMessage {
    pub role: String,
    pub content: String,
}

impl From<&crate::llm::provider::Message> for OpenAIMessage {
    fn from(msg: &crate::llm::provider::Message) -> Self {
        Self {
            role: match msg.role {
                Role::System => "system".to_string(),
                Role::User => "user".to_string(),
                Role::Assistant => "assistant".to_string(),
            },
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: OpenAIMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub struct ModelsResponse {
    pub data: Vec<ModelData>,
}

#[derive(Debug, Deserialize)]
pub struct ModelData {
    pub id: String,
}

/// Generic OpenAI-compatible provider, parameterized over an adapter that
/// supplies base URL, auth headers, and endpoint path quirks.
pub struct OpenAICompatibleProvider<T: OpenAICompatible + Send + Sync> {
    adapter: T,
    client: HttpProviderClient,
    config: ProviderConfig,
}

impl<T: OpenAICompatible + Send + Sync> OpenAICompatibleProvider<T> {
    pub fn new(adapter: T, config: ProviderConfig) -> Self {
        let client = HttpProviderClient::new(config.timeout);
        Self {
            adapter,
            client,
            config,
        }
    }

    fn build_headers(&self) -> Vec<(&str, String)> {
        let mut headers = self.adapter.auth_headers();
        headers.push(("Content-Type", "application/json".to_string()));
        headers
    }
}

#[async_trait]
impl<T: OpenAICompatible + Send + Sync> LlmProvider for OpenAICompatibleProvider<T> {
    fn provider_type(&self) -> ProviderType {
        self.config.provider
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, AppError> {
        debug!("generating with {} ({} messages)", self.name(), request.messages.len());
        crate::llm::provider::validate_temperature(request.temperature)?;

        let mut messages: Vec<OpenAIMessage> = Vec::new();
        if let Some(system_prompt) = &request.system_prompt {
            messages.push(OpenAIMessage {
                role: "system".to_string(),
                content: system_prompt.clone(),
            });
        }
        messages.extend(request.messages.iter().map(OpenAIMessage::from));

        let body = ChatCompletionRequest {
            model: self.config.text_model.clone(),
            messages,
            max_tokens: request.max_tokens.or(Some(self.config.max_tokens)),
            temperature: request.temperature,
            stream: false,
        };

        let url = self.adapter.build_url("chat/completions");
        let headers = self.build_headers();
        let borrowed: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (*k, v.as_str())).collect();

        let response: ChatCompletionResponse = self.client.post_json(&url, &body, borrowed).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

        let usage = response
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        info!("generated {} tokens with {}", usage.total_tokens, response.model);

        Ok(GenerationResponse {
            text: choice.message.content,
            model: response.model,
            usage,
            finish_reason: choice.finish_reason,
            metadata: serde_json::Value::Null,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, AppError> {
        let url = self.adapter.build_url("models");
        let headers = self.build_headers();
        let borrowed: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let response: ModelsResponse = self.client.get(&url, borrowed).await?;
        Ok(response.data.into_iter().map(|m| m.id).collect())
    }

    fn get_stats(&self) -> ProviderStats {
        ProviderStats::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::Message;

    struct TestAdapter {
        base_url: String,
        api_key: Option<String>,
    }

    impl OpenAICompatible for TestAdapter {
        fn base_url(&self) -> &str {
            &self.base_url
        }
        fn api_key(&self) -> Option<&str> {
            self.api_key.as_deref()
        }
    }

    fn test_config() -> ProviderConfig {
        ProviderConfig {
            provider: ProviderType::OpenAI,
            name: "test".to_string(),
            priority: 1,
            api_key: Some("key".to_string()),
            base_url: Some("https://api.example.com/v1".to_string()),
            text_model: "gpt-4".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            timeout: 30,
            options: serde_json::Value::Null,
        }
    }

    #[test]
    fn message_conversion_maps_roles() {
        let msg = Message::user("hello");
        let openai_msg = OpenAIMessage::from(&msg);
        assert_eq!(openai_msg.role, "user");
    }

    #[test]
    fn provider_exposes_configured_name() {
        let adapter = TestAdapter {
            base_url: "https://api.example.com/v1".to_string(),
            api_key: Some("key".to_string()),
        };
        let provider = OpenAICompatibleProvider::new(adapter, test_config());
        assert_eq!(provider.name(), "test");
        assert_eq!(provider.provider_type(), ProviderType::OpenAI);
    }
}
