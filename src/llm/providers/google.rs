//! Google Gemini provider. Gemini's `generateContent` wire format nests
//! content in `contents[].parts[].text` and keys the API key as a query
//! parameter rather than a header, so this implements [`LlmProvider`]
//! directly rather than going through the OpenAI-compatible base.

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
pub struct GeminiPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiContent {
    pub role: String,
    pub parts: Vec<GeminiPart>,
}

impl From<&Message> for GeminiContent {
    fn from(msg: &Message) -> Self {
        Self {
            role: match msg.role {
                Role::User => "user".to_string(),
                Role::Assistant => "model".to_string(),
                Role::System => "user".to_string(),
            },
            parts: vec![GeminiPart {
                text: msg.content.clone(),
            }],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GeminiContent>,
    #[serde(rename = "generationConfig")]
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeminiResponse {
    pub candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    pub usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
pub struct GeminiCandidate {
    pub content: GeminiContent,
    #[serde(rename = "finishReason", default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GeminiUsage {
    #[serde(rename = "promptTokenCount", default)]
    pub prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    pub candidates_token_count: u32,
    #[serde(rename = "totalTokenCount", default)]
    pub total_token_count: u32,
}

pub struct GoogleProvider {
    client: HttpProviderClient,
    config: ProviderConfig,
}

impl GoogleProvider {
    pub fn create(config: ProviderConfig) -> Arc<dyn LlmProvider> {
        let client = HttpProviderClient::new(config.timeout);
        Arc::new(Self { client, config })
    }

    fn base_url(&self) -> String {
        self.config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string())
    }

    fn endpoint(&self, action: &str) -> Result<String, AppError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::AuthFailed("missing google api key".to_string()))?;
        Ok(format!(
            "{}/models/{}:{}?key={}",
            self.base_url().trim_end_matches('/'),
            self.config.text_model,
            action,
            api_key
        ))
    }
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Google
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, AppError> {
        debug!("generating with google ({} messages)", request.messages.len());
        crate::llm::provider::validate_temperature(request.temperature)?;

        let system_instruction = request.system_prompt.as_ref().map(|prompt| GeminiContent {
            role: "user".to_string(),
            parts: vec![GeminiPart {
                text: prompt.clone(),
            }],
        });

        let contents: Vec<GeminiContent> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(GeminiContent::from)
            .collect();

        if contents.is_empty() {
            return Err(LlmError::InvalidRequest("no non-system messages to send".to_string()).into());
        }

        let body = GeminiRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens.or(Some(self.config.max_tokens)),
            },
        };

        let url = self.endpoint("generateContent")?;
        let response: GeminiResponse = self.client.post_json(&url, &body, vec![]).await?;

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no candidates in response".to_string()))?;

        let text = candidate
            .content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let usage = response
            .usage_metadata
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            })
            .unwrap_or_default();

        info!("generated {} tokens with {}", usage.total_tokens, self.config.text_model);

        Ok(GenerationResponse {
            text,
            model: self.config.text_model.clone(),
            usage,
            finish_reason: candidate.finish_reason,
            metadata: serde_json::Value::Null,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, AppError> {
        Ok(vec![
            "gemini-1.5-pro".to_string(),
            "gemini-1.5-flash".to_string(),
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
            provider: ProviderType::Google,
            name: "test".to_string(),
            priority: 1,
            api_key: Some("key".to_string()),
            base_url: None,
            text_model: "gemini-1.5-pro".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            timeout: 30,
            options: serde_json::Value::Null,
        }
    }

    #[test]
    fn message_conversion_maps_assistant_to_model_role() {
        let msg = Message {
            role: Role::Assistant,
            content: "hi".to_string(),
        };
        let content = GeminiContent::from(&msg);
        assert_eq!(content.role, "model");
    }

    #[tokio::test]
    async fn endpoint_requires_api_key() {
        let mut config = test_config();
        config.api_key = None;
        let provider = GoogleProvider {
            client: HttpProviderClient::new(config.timeout),
            config,
        };
        assert!(provider.endpoint("generateContent").is_err());
    }

    #[tokio::test]
    async fn list_models_returns_known_gemini_models() {
        let provider = GoogleProvider::create(test_config());
        let models = provider.list_models().await.unwrap();
        assert!(models.contains(&"gemini-1.5-pro".to_string()));
    }
}
