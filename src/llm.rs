//! LLM provider abstraction: message/role types, the [`provider::LlmProvider`]
//! trait, and concrete [`providers`] implementations. The orchestrator that
//! composes providers with fallback, circuit breaking, and rate limiting
//! lives at the crate root in `orchestrator.rs`.

pub mod provider;
pub mod providers;

pub use provider::{
    GenerationRequest, GenerationResponse, LlmProvider, Message, ProviderConfig, ProviderStats,
    ProviderType, Role, TokenUsage,
};
pub use providers::{AnthropicProvider, GoogleProvider, OpenAIProvider};
