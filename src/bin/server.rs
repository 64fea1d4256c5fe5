//! Binary entry point: loads configuration, wires every provider and
//! service together, and serves the HTTP API.

use content_pipeline::api::{create_router, default_api_key_validator, AppState};
use content_pipeline::cache::{Cache, NoopCache, SqliteCache};
use content_pipeline::config::AppConfig;
use content_pipeline::embedding::provider::EmbeddingProvider;
use content_pipeline::embedding::providers::{
    DeterministicHashEmbeddingProvider, LocalEmbeddingProvider, OpenAIEmbeddingProvider,
};
use content_pipeline::jobs::JobStore;
use content_pipeline::llm::provider::{LlmProvider, ProviderConfig, ProviderType};
use content_pipeline::llm::providers::{AnthropicProvider, GoogleProvider, OpenAIProvider};
use content_pipeline::orchestrator::{EmbeddingOrchestrator, LlmOrchestrator, OrchestratorConfig};
use content_pipeline::pipeline::Pipeline;
use content_pipeline::qa_answer::QaAnswerer;
use content_pipeline::question_gen::QuestionGenerator;
use content_pipeline::rate_limit::RateLimiter;
use content_pipeline::repository::SqliteRepository;
use content_pipeline::search::SearchService;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::var("CONTENT_PIPELINE_CONFIG").ok();
    let config = Arc::new(AppConfig::load(config_path.as_deref())?);
    config.validate()?;

    let llm_providers = build_llm_providers(&config);
    let llm_orchestrator = Arc::new(LlmOrchestrator::for_llm(llm_providers, OrchestratorConfig::default()));

    let embedding_providers = build_embedding_providers(&config);
    let embedding_orchestrator =
        Arc::new(EmbeddingOrchestrator::for_embedding(embedding_providers, OrchestratorConfig::default()));

    let repository = Arc::new(SqliteRepository::connect(&config.store.database_url).await?);

    let cache: Arc<dyn Cache> = if config.cache.enabled {
        let cache_url = config
            .cache
            .database_url
            .clone()
            .unwrap_or_else(|| config.store.database_url.clone());
        Arc::new(SqliteCache::new(&cache_url, 10_000).await?)
    } else {
        Arc::new(NoopCache)
    };

    let questions = Arc::new(QuestionGenerator::new(llm_orchestrator.clone()));
    let qa_answerer = Arc::new(QaAnswerer::new(llm_orchestrator.clone()));
    let search = Arc::new(SearchService::new(
        repository.clone(),
        repository.clone(),
        embedding_orchestrator.clone(),
        cache.clone(),
    ));

    let pipeline = Arc::new(Pipeline::new(
        &config.pipeline,
        llm_orchestrator.clone(),
        embedding_orchestrator.clone(),
        config.embedding.default_provider.clone(),
        questions.clone(),
        repository.clone(),
        repository.clone(),
        cache.clone(),
    )?);

    let state = AppState {
        config: config.clone(),
        pipeline,
        search,
        questions,
        qa_answerer,
        llm: llm_orchestrator,
        embeddings: embedding_orchestrator,
        cache,
        jobs: Arc::new(JobStore::new()),
        api_key_validator: default_api_key_validator(&config),
        rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
    };

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "content pipeline listening");

    axum::serve(
        listener,
        create_router(state).into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}

fn build_llm_providers(config: &AppConfig) -> Vec<Arc<dyn LlmProvider>> {
    let llm = &config.llm;
    let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();

    if let Some(api_key) = llm.openai_api_key.clone() {
        providers.push(OpenAIProvider::create(provider_config(
            ProviderType::OpenAI,
            "openai",
            Some(api_key),
            "gpt-4o-mini",
            llm,
        )));
    }
    if let Some(api_key) = llm.anthropic_api_key.clone() {
        providers.push(AnthropicProvider::create(provider_config(
            ProviderType::Anthropic,
            "anthropic",
            Some(api_key),
            "claude-3-5-sonnet-20241022",
            llm,
        )));
    }
    if let Some(api_key) = llm.google_api_key.clone() {
        providers.push(GoogleProvider::create(provider_config(
            ProviderType::Google,
            "google",
            Some(api_key),
            "gemini-1.5-flash",
            llm,
        )));
    }

    providers
}

fn provider_config(
    provider: ProviderType,
    name: &str,
    api_key: Option<String>,
    text_model: &str,
    llm: &content_pipeline::config::LlmSectionConfig,
) -> ProviderConfig {
    ProviderConfig {
        provider,
        name: name.to_string(),
        priority: 10,
        api_key,
        base_url: None,
        text_model: text_model.to_string(),
        max_tokens: llm.default_max_tokens,
        temperature: llm.default_temperature,
        timeout: llm.global_timeout_secs,
        options: serde_json::Value::Null,
    }
}

fn build_embedding_providers(config: &AppConfig) -> Vec<Arc<dyn EmbeddingProvider>> {
    let mut providers: Vec<Arc<dyn EmbeddingProvider>> = Vec::new();

    if let Some(api_key) = config.llm.openai_api_key.clone() {
        providers.push(Arc::new(OpenAIEmbeddingProvider::new(api_key, "text-embedding-3-small", None)));
    }
    if let Ok(local_url) = std::env::var("LOCAL_EMBEDDING_URL") {
        providers.push(Arc::new(LocalEmbeddingProvider::new(
            local_url,
            "local-embeddings",
            config.embedding.dimension,
        )));
    }
    providers.push(Arc::new(DeterministicHashEmbeddingProvider::new(config.embedding.dimension)));

    providers
}
