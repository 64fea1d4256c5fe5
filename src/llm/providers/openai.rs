//! OpenAI provider, built on the OpenAI-compatible base.

use crate::llm::provider::{LlmProvider, ProviderConfig};
use crate::llm::providers::base::OpenAICompatible;
use crate::llm::providers::openai_compatible::OpenAICompatibleProvider;
use std::sync::Arc;

pub struct OpenAIAdapter {
    base_url: String,
    api_key: Option<String>,
}

impl OpenAIAdapter {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
        }
    }
}

impl OpenAICompatible for OpenAIAdapter {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
}

pub type OpenAIProvider = OpenAICompatibleProvider<OpenAIAdapter>;

impl OpenAIProvider {
    pub fn create(config: ProviderConfig) -> Arc<dyn LlmProvider> {
        let adapter = OpenAIAdapter::new(config.api_key.clone(), config.base_url.clone());
        Arc::new(OpenAICompatibleProvider::new(adapter, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_openai_base_url() {
        let adapter = OpenAIAdapter::new(Some("key".to_string()), None);
        assert_eq!(adapter.base_url(), "https://api.openai.com/v1");
    }

    #[test]
    fn honors_custom_base_url() {
        let adapter = OpenAIAdapter::new(None, Some("https://custom.example.com/v1".to_string()));
        assert_eq!(adapter.base_url(), "https://custom.example.com/v1");
    }
}
