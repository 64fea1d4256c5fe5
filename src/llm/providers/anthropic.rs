//! Anthropic Claude provider. Anthropic's message format and auth headers
//! differ enough from OpenAI's that it implements [`LlmProvider`] directly
//! rather than going through the OpenAI-compatible base.

use crate::error::{AppError, LlmError};
use crate::llm::provider::{
    GenerationRequest, GenerationResponse, LlmProvider, Message, ProviderConfig, ProviderStats,
    ProviderType, Role, TokenUsage,
};
use crate::llm::providers::base::HttpProviderClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: String,
}

impl From<&Message> for AnthropicMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: match msg.role {
                Role::User => "user".to_string(),
                Role::Assistant => "assistant".to_string(),
                Role::System => "user".to_string(),
            },
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub temperature: f32,
}

#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<String>,
    pub usage: UsageInfo,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct UsageInfo {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

pub struct AnthropicProvider {
    client: HttpProviderClient,
    config: ProviderConfig,
}

impl AnthropicProvider {
    pub fn create(config: ProviderConfig) -> Arc<dyn LlmProvider> {
        let client = HttpProviderClient::new(config.timeout);
        Arc::new(Self { client, config })
    }

    fn base_url(&self) -> String {
        self.config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com".to_string())
    }

    fn build_headers(&self) -> Vec<(&str, String)> {
        let mut headers = vec![
            ("Content-Type", "application/json".to_string()),
            ("anthropic-version", "2023-06-01".to_string()),
        ];
        if let Some(api_key) = &self.config.api_key {
            headers.push(("x-api-key", api_key.clone()));
        }
        headers
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, AppError> {
        debug!("generating with anthropic ({} messages)", request.messages.len());
        crate::llm::provider::validate_temperature(request.temperature)?;

        let system = request
            .system_prompt
            .clone()
            .or_else(|| request.messages.iter().find(|m| m.role == Role::System).map(|m| m.content.clone()));

        let messages: Vec<AnthropicMessage> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(AnthropicMessage::from)
            .collect();

        if messages.is_empty() {
            return Err(LlmError::InvalidRequest("no non-system messages to send".to_string()).into());
        }

        let body = AnthropicRequest {
            model: self.config.text_model.clone(),
            messages,
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            system,
            temperature: request.temperature,
        };

        let url = format!("{}/v1/messages", self.base_url().trim_end_matches('/'));
        let headers = self.build_headers();
        let borrowed: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (*k, v.as_str())).collect();

        let response: AnthropicResponse = self.client.post_json(&url, &body, borrowed).await?;

        if response.content.is_empty() {
            return Err(LlmError::InvalidResponse("no content blocks in response".to_string()).into());
        }

        let text = response
            .content
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let usage = TokenUsage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
        };

        info!("generated {} tokens with {}", usage.total_tokens, response.model);

        Ok(GenerationResponse {
            text,
            model: response.model,
            usage,
            finish_reason: response.stop_reason,
            metadata: serde_json::Value::Null,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, AppError> {
        Ok(vec![
            "claude-3-opus-20240229".to_string(),
            "claude-3-sonnet-20240229".to_string(),
            "claude-3-haiku-20240307".to_string(),
        ])
    }

    fn get_stats(&self) -> ProviderStats {
        ProviderStats::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ProviderConfig {
        ProviderConfig {
            provider: ProviderType::Anthropic,
            name: "test".to_string(),
            priority: 1,
            api_key: Some("key".to_string()),
            base_url: None,
            text_model: "claude-3-opus-20240229".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            timeout: 30,
            options: serde_json::Value::Null,
        }
    }

    #[test]
    fn message_conversion_maps_system_to_user() {
        let msg = Message::system("be terse");
        let converted = AnthropicMessage::from(&msg);
        assert_eq!(converted.role, "user");
    }

    #[tokio::test]
    async fn list_models_returns_known_claude_models() {
        let provider = AnthropicProvider::create(test_config());
        let models = provider.list_models().await.unwrap();
        assert!(models.contains(&"claude-3-opus-20240229".to_string()));
    }
}
