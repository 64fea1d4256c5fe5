//! Content pipeline: crawls web articles, produces summaries, exploratory
//! Q&A, and embeddings via multi-provider LLM/embedding orchestration,
//! persists them, and serves URL-based Q&A lookup and semantic similarity
//! search over HTTP.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod domain;
pub mod embedding;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod orchestrator;
pub mod pipeline;
pub mod qa_answer;
pub mod question_gen;
pub mod rate_limit;
pub mod repository;
pub mod resilience;
pub mod search;
pub mod similarity;
pub mod text;
pub mod vector_store;

pub use api::{create_router, AppState};
pub use config::AppConfig;
pub use domain::{Article, ProcessingResult, QAPair, SimilarArticle, Summary};
pub use error::AppError;
pub use orchestrator::{EmbeddingOrchestrator, LlmOrchestrator, OrchestratorConfig};
pub use pipeline::Pipeline;
pub use qa_answer::QaAnswerer;
pub use question_gen::QuestionGenerator;
pub use repository::{ArticleRepository, KnowledgeRepository, SqliteRepository};
pub use search::SearchService;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}
