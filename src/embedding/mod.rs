//! Embedding provider capability set: hosted, local, and deterministic-hash
//! fallback providers, orchestrated the same way LLM providers are.

pub mod provider;
pub mod providers;

pub use provider::{estimate_tokens, normalize_l2, EmbeddingProvider};
pub use providers::{DeterministicHashEmbeddingProvider, LocalEmbeddingProvider, OpenAIEmbeddingProvider};
