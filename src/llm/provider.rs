//! LLM provider trait and common request/response types.

use crate::error::{AppError, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// One generation call's request parameters. `temperature` is validated by
/// the caller to fall in `[0, 2]`; `additional_params` carries
/// provider-specific knobs the common surface doesn't model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub additional_params: Value,
}

fn default_temperature() -> f32 {
    0.7
}

impl GenerationRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: default_temperature(),
            max_tokens: None,
            system_prompt: None,
            additional_params: Value::Null,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Token accounting, mirroring the shape every provider's usage block
/// reduces to.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Result of a generation call. `metadata` is opaque passthrough for
/// provider-specific fields (response id, safety ratings, ...) that callers
/// may want to log but the common surface doesn't interpret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAI,
    Anthropic,
    Google,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::OpenAI => write!(f, "openai"),
            ProviderType::Anthropic => write!(f, "anthropic"),
            ProviderType::Google => write!(f, "google"),
        }
    }
}

/// Static configuration for a single provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: ProviderType,
    pub name: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub text_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub options: Value,
}

fn default_priority() -> u8 {
    10
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_timeout() -> u64 {
    30
}

/// Usage counters surfaced for the health/status endpoints, not billing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
}

/// Behavior every LLM provider implements. `generate`/`embed` map provider
/// wire errors to [`LlmError`]; the orchestrator (see `orchestrator.rs`)
/// layers circuit breaking, rate limiting, and fallback on top.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, AppError>;

    async fn list_models(&self) -> Result<Vec<String>, AppError>;

    async fn is_model_available(&self, model: &str) -> Result<bool, AppError> {
        Ok(self.list_models().await?.iter().any(|m| m == model))
    }

    /// Best-effort liveness probe, defaulting to a models listing.
    async fn health_check(&self) -> bool {
        self.list_models().await.is_ok()
    }

    fn get_stats(&self) -> ProviderStats {
        ProviderStats::default()
    }
}

pub(crate) fn validate_temperature(temperature: f32) -> Result<(), AppError> {
    if !(0.0..=2.0).contains(&temperature) {
        return Err(LlmError::InvalidRequest(format!(
            "temperature {temperature} out of range [0, 2]"
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_request_builder_sets_fields() {
        let req = GenerationRequest::new(vec![Message::user("hi")])
            .with_temperature(0.2)
            .with_max_tokens(100)
            .with_system_prompt("be terse");
        assert_eq!(req.temperature, 0.2);
        assert_eq!(req.max_tokens, Some(100));
        assert_eq!(req.system_prompt.as_deref(), Some("be terse"));
    }

    #[test]
    fn validate_temperature_rejects_out_of_range() {
        assert!(validate_temperature(2.5).is_err());
        assert!(validate_temperature(-0.1).is_err());
        assert!(validate_temperature(1.0).is_ok());
    }
}
