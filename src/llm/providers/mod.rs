//! LLM Provider Implementations
//!
//! This module contains concrete implementations for various LLM providers.

pub mod anthropic;
pub mod base;
pub mod google;
pub mod openai;
pub mod openai_compatible;

// Re-export commonly used types
pub use anthropic::AnthropicProvider;
pub use base::{HttpProviderClient, OpenAICompatible};
pub use google::GoogleProvider;
pub use openai::OpenAIProvider;
