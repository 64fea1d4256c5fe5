//! Generic provider orchestrator: one implementation of the
//! pinned-model-routing / circuit-breaker / health-cache / rate-limit /
//! timeout / fallback algorithm, instantiated once for LLM providers
//! (`LlmOrchestrator`) and reused for embedding providers once that
//! capability exists. Supersedes the teacher's primary+fallback
//! `ProviderManager`, generalized from a single-shot retry to the full
//! seven-step algorithm.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{AppError, EmbeddingError};
use crate::llm::provider::{LlmProvider, ProviderStats};
use crate::resilience::{BreakerConfig, BreakerState, CircuitBreaker, CircuitBreakerRegistry, RollingWindow};

/// Minimal capability every orchestrated provider must expose. `LlmProvider`
/// gets it for free via the blanket impl below; a future `EmbeddingProvider`
/// implements it directly on its concrete provider structs instead (two
/// blanket impls over unrelated traits would conflict under coherence).
#[async_trait::async_trait]
pub trait OrchestratedProvider: Send + Sync + 'static {
    fn provider_name(&self) -> &str;
    async fn is_healthy(&self) -> bool;
    async fn supports_model(&self, model: &str) -> bool;
}

#[async_trait::async_trait]
impl<T: LlmProvider + ?Sized> OrchestratedProvider for T {
    fn provider_name(&self) -> &str {
        self.name()
    }

    async fn is_healthy(&self) -> bool {
        self.health_check().await
    }

    async fn supports_model(&self, model: &str) -> bool {
        self.is_model_available(model).await.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub per_provider_rpm: u32,
    pub call_timeout: Duration,
    pub health_cache_ttl: Duration,
    pub breaker: BreakerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            per_provider_rpm: 60,
            call_timeout: Duration::from_secs(30),
            health_cache_ttl: Duration::from_secs(300),
            breaker: BreakerConfig::default(),
        }
    }
}

struct CachedHealth {
    healthy: bool,
    checked_at: Instant,
}

/// Orchestrates an ordered list of providers `{primary, fallback_1, ...}`
/// behind circuit breaking, cached health checks, rolling-window rate
/// limiting, and an outer call timeout.
pub struct Orchestrator<P: OrchestratedProvider + ?Sized> {
    providers: Vec<Arc<P>>,
    breakers: CircuitBreakerRegistry,
    limiters: Mutex<HashMap<String, Arc<RollingWindow>>>,
    health_cache: Mutex<HashMap<String, CachedHealth>>,
    stats: Mutex<HashMap<String, ProviderStats>>,
    config: OrchestratorConfig,
}

impl<P: OrchestratedProvider + ?Sized> Orchestrator<P> {
    pub fn new(providers: Vec<Arc<P>>, config: OrchestratorConfig) -> Self {
        Self {
            providers,
            breakers: CircuitBreakerRegistry::new(),
            limiters: Mutex::new(HashMap::new()),
            health_cache: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
            config,
        }
    }

    async fn breaker_for(&self, name: &str) -> CircuitBreaker {
        self.breakers.register(name, self.config.breaker).await;
        self.breakers.get(name).await.expect("just registered")
    }

    async fn limiter_for(&self, name: &str) -> Arc<RollingWindow> {
        let mut limiters = self.limiters.lock().await;
        limiters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RollingWindow::new(Duration::from_secs(60))))
            .clone()
    }

    async fn cached_health(&self, provider: &Arc<P>, name: &str) -> bool {
        {
            let cache = self.health_cache.lock().await;
            if let Some(entry) = cache.get(name) {
                if entry.checked_at.elapsed() < self.config.health_cache_ttl {
                    return entry.healthy;
                }
            }
        }
        let healthy = provider.is_healthy().await;
        let mut cache = self.health_cache.lock().await;
        cache.insert(
            name.to_string(),
            CachedHealth {
                healthy,
                checked_at: Instant::now(),
            },
        );
        healthy
    }

    async fn record(&self, name: &str, success: bool) {
        let mut stats = self.stats.lock().await;
        let entry = stats.entry(name.to_string()).or_default();
        entry.total_requests += 1;
        if success {
            entry.successful_requests += 1;
        } else {
            entry.failed_requests += 1;
        }
    }

    pub async fn stats(&self) -> HashMap<String, ProviderStats> {
        self.stats.lock().await.clone()
    }

    /// Ordered candidate list for a call: when `model` is pinned, the first
    /// provider that advertises it is moved to the front; the rest of the
    /// configured order is kept as the fallback chain.
    async fn ordered_candidates(&self, model: Option<&str>) -> Vec<Arc<P>> {
        let Some(model) = model else {
            return self.providers.clone();
        };
        let mut matched = None;
        for provider in &self.providers {
            if provider.supports_model(model).await {
                matched = Some(provider.clone());
                break;
            }
        }
        match matched {
            None => self.providers.clone(),
            Some(first) => {
                let mut ordered = vec![first.clone()];
                ordered.extend(
                    self.providers
                        .iter()
                        .filter(|p| !Arc::ptr_eq(p, &first))
                        .cloned(),
                );
                ordered
            }
        }
    }

    /// Run `op` against providers in order, honoring breaker/health/rate
    /// limit/timeout at each step, until one succeeds or all are exhausted.
    pub async fn execute<T, F, Fut>(&self, model: Option<&str>, op: F) -> Result<T, AppError>
    where
        F: Fn(Arc<P>) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let candidates = self.ordered_candidates(model).await;
        if candidates.is_empty() {
            return Err(AppError::AllProvidersFailed("no providers configured".to_string()));
        }

        let mut last_err: Option<AppError> = None;
        let mut tried = Vec::new();

        for provider in candidates {
            let name = provider.provider_name().to_string();
            tried.push(name.clone());

            let breaker = self.breaker_for(&name).await;
            if breaker.state().await == BreakerState::Open {
                debug!(provider = %name, "skipping provider: circuit open");
                continue;
            }

            if !self.cached_health(&provider, &name).await {
                debug!(provider = %name, "skipping provider: unhealthy");
                continue;
            }

            let limiter = self.limiter_for(&name).await;
            if !limiter.try_acquire(self.config.per_provider_rpm).await {
                warn!(provider = %name, "skipping provider: rate limit exceeded");
                last_err = Some(AppError::RateLimit { retry_after_secs: 1 });
                continue;
            }

            let timeout = self.config.call_timeout;
            let call_fut = op(provider.clone());
            let name_for_timeout = name.clone();
            let result = breaker
                .call(|| async move {
                    tokio::time::timeout(timeout, call_fut)
                        .await
                        .map_err(|_| AppError::ServiceUnavailable(format!("{name_for_timeout} timed out")))?
                })
                .await;

            match result {
                Ok(value) => {
                    self.record(&provider.provider_name().to_string(), true).await;
                    return Ok(value);
                }
                Err(err) => {
                    warn!(provider = %provider.provider_name(), error = %err, "provider call failed");
                    self.record(&provider.provider_name().to_string(), false).await;
                    last_err = Some(err);
                }
            }
        }

        Err(AppError::AllProvidersFailed(format!(
            "tried [{}]: {}",
            tried.join(", "),
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "no providers available".to_string())
        )))
    }
}

/// Thin instantiation over [`LlmProvider`].
pub type LlmOrchestrator = Orchestrator<dyn LlmProvider>;

impl LlmOrchestrator {
    pub fn for_llm(providers: Vec<Arc<dyn LlmProvider>>, config: OrchestratorConfig) -> Self {
        Orchestrator::new(providers, config)
    }

    pub async fn generate(
        &self,
        request: crate::llm::provider::GenerationRequest,
        model: Option<&str>,
    ) -> Result<crate::llm::provider::GenerationResponse, AppError> {
        let request = Arc::new(request);
        self.execute(model, move |provider| {
            let request = request.clone();
            async move { provider.generate(&request).await }
        })
        .await
    }
}

/// Thin instantiation over [`crate::embedding::EmbeddingProvider`].
pub type EmbeddingOrchestrator = Orchestrator<dyn crate::embedding::EmbeddingProvider>;

impl EmbeddingOrchestrator {
    pub fn for_embedding(
        providers: Vec<Arc<dyn crate::embedding::EmbeddingProvider>>,
        config: OrchestratorConfig,
    ) -> Self {
        Orchestrator::new(providers, config)
    }

    /// Embeds `text`, falling back to chunk-and-average when it's too large
    /// for every candidate provider's token limit: the text is split with
    /// [`crate::text::Chunker`], each chunk is embedded independently, and
    /// the results are mean-pooled and re-normalized via
    /// [`crate::similarity::mean_pool`].
    pub async fn generate(&self, text: &str, model: Option<&str>) -> Result<Vec<f32>, AppError> {
        match self.generate_whole(text, model).await {
            Err(AppError::Embedding(EmbeddingError::InputTooLarge { limit, .. })) => {
                self.generate_chunked(text, limit, model).await
            }
            other => other,
        }
    }

    async fn generate_whole(&self, text: &str, model: Option<&str>) -> Result<Vec<f32>, AppError> {
        let text = Arc::new(text.to_string());
        self.execute(model, move |provider| {
            let text = text.clone();
            async move { provider.generate(&text).await }
        })
        .await
    }

    async fn generate_chunked(&self, text: &str, token_limit: usize, model: Option<&str>) -> Result<Vec<f32>, AppError> {
        let chunk_size = char_budget_for_token_limit(token_limit);
        let chunker = crate::text::Chunker::new(crate::text::ChunkConfig {
            chunk_size,
            chunk_overlap: 0,
            min_chunk_size: 1,
            max_chunk_size: chunk_size,
            respect_paragraphs: true,
            respect_sentences: true,
        });
        let chunks = chunker.chunk_text(text);

        let mut embeddings = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            embeddings.push(self.generate_whole(chunk, model).await?);
        }
        crate::similarity::mean_pool(&embeddings, true)
    }

    pub async fn generate_batch(&self, texts: &[String], model: Option<&str>) -> Result<Vec<Vec<f32>>, AppError> {
        let batch = Arc::new(texts.to_vec());
        let result = self
            .execute(model, {
                let batch = batch.clone();
                move |provider| {
                    let batch = batch.clone();
                    async move { provider.generate_batch(&batch).await }
                }
            })
            .await;

        match result {
            Err(AppError::Embedding(EmbeddingError::InputTooLarge { .. })) => {
                let mut out = Vec::with_capacity(texts.len());
                for text in texts {
                    out.push(self.generate(text, model).await?);
                }
                Ok(out)
            }
            other => other,
        }
    }
}

/// Conservative chars-per-token estimate (inverse of the `words * 1.3`
/// token count, times an average word length, with a safety margin) so a
/// chunk's own estimated token count stays under `token_limit`.
fn char_budget_for_token_limit(token_limit: usize) -> usize {
    let words = token_limit as f64 / 1.3;
    ((words * 6.0) * 0.85).max(200.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::{GenerationRequest, GenerationResponse, Message, ProviderType, TokenUsage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        name: String,
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        fn provider_type(&self) -> ProviderType {
            ProviderType::OpenAI
        }

        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationResponse, AppError> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(AppError::Llm(crate::error::LlmError::RateLimited));
            }
            Ok(GenerationResponse {
                text: "ok".to_string(),
                model: "test-model".to_string(),
                usage: TokenUsage::default(),
                finish_reason: Some("stop".to_string()),
                metadata: serde_json::Value::Null,
            })
        }

        async fn list_models(&self) -> Result<Vec<String>, AppError> {
            Ok(vec!["test-model".to_string()])
        }
    }

    #[tokio::test]
    async fn falls_back_when_primary_provider_fails() {
        let primary: Arc<dyn LlmProvider> = Arc::new(FlakyProvider {
            name: "primary".to_string(),
            fail_times: AtomicU32::new(10),
        });
        let fallback: Arc<dyn LlmProvider> = Arc::new(FlakyProvider {
            name: "fallback".to_string(),
            fail_times: AtomicU32::new(0),
        });

        let orchestrator = LlmOrchestrator::for_llm(vec![primary, fallback], OrchestratorConfig::default());
        let response = orchestrator
            .generate(GenerationRequest::new(vec![Message::user("hi")]), None)
            .await
            .unwrap();
        assert_eq!(response.text, "ok");

        let stats = orchestrator.stats().await;
        assert!(stats.get("primary").unwrap().failed_requests >= 1);
        assert_eq!(stats.get("fallback").unwrap().successful_requests, 1);
    }

    #[tokio::test]
    async fn all_providers_failing_surfaces_wrapped_error() {
        let primary: Arc<dyn LlmProvider> = Arc::new(FlakyProvider {
            name: "primary".to_string(),
            fail_times: AtomicU32::new(10),
        });
        let orchestrator = LlmOrchestrator::for_llm(vec![primary], OrchestratorConfig::default());
        let result = orchestrator
            .generate(GenerationRequest::new(vec![Message::user("hi")]), None)
            .await;
        assert!(matches!(result, Err(AppError::AllProvidersFailed(_))));
    }

    #[tokio::test]
    async fn embedding_orchestrator_falls_back_to_deterministic_provider() {
        use crate::embedding::{DeterministicHashEmbeddingProvider, EmbeddingProvider};

        struct DeadProvider;

        #[async_trait]
        impl EmbeddingProvider for DeadProvider {
            fn name(&self) -> &str {
                "dead"
            }
            fn model(&self) -> &str {
                "dead-model"
            }
            fn dimension(&self) -> usize {
                8
            }
            async fn generate(&self, _text: &str) -> Result<Vec<f32>, AppError> {
                Err(AppError::ServiceUnavailable("down".to_string()))
            }
            async fn generate_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
                Err(AppError::ServiceUnavailable("down".to_string()))
            }
            async fn health_check(&self) -> bool {
                false
            }
        }

        let dead: Arc<dyn EmbeddingProvider> = Arc::new(DeadProvider);
        let fallback: Arc<dyn EmbeddingProvider> = Arc::new(DeterministicHashEmbeddingProvider::new(8));
        let orchestrator = EmbeddingOrchestrator::for_embedding(vec![dead, fallback], OrchestratorConfig::default());
        let vector = orchestrator.generate("hello world", None).await.unwrap();
        assert_eq!(vector.len(), 8);
    }

    #[tokio::test]
    async fn oversized_input_is_chunked_and_pooled_instead_of_erroring() {
        use crate::embedding::{DeterministicHashEmbeddingProvider, EmbeddingProvider};
        use crate::embedding::provider::check_token_limit;

        struct LimitedProvider {
            inner: DeterministicHashEmbeddingProvider,
            token_limit: usize,
        }

        #[async_trait]
        impl EmbeddingProvider for LimitedProvider {
            fn name(&self) -> &str {
                "limited"
            }
            fn model(&self) -> &str {
                self.inner.model()
            }
            fn dimension(&self) -> usize {
                self.inner.dimension()
            }
            async fn generate(&self, text: &str) -> Result<Vec<f32>, AppError> {
                check_token_limit(text, self.token_limit)?;
                self.inner.generate(text).await
            }
            async fn generate_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
                for text in texts {
                    check_token_limit(text, self.token_limit)?;
                }
                self.inner.generate_batch(texts).await
            }
        }

        let provider: Arc<dyn EmbeddingProvider> = Arc::new(LimitedProvider {
            inner: DeterministicHashEmbeddingProvider::new(8),
            token_limit: 20,
        });
        let orchestrator = EmbeddingOrchestrator::for_embedding(vec![provider], OrchestratorConfig::default());

        let long_text = "word ".repeat(500);
        let vector = orchestrator.generate(&long_text, None).await.unwrap();
        assert_eq!(vector.len(), 8);
    }
}
