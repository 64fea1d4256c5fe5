//! Per-(identity, category) request rate limiting, reusing the
//! rolling-window primitive built for provider-side limiting in
//! `resilience.rs` rather than adding a second rate-limiting crate for the
//! HTTP boundary.

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::auth::ApiKeyIdentity;
use crate::config::RateLimitConfig;
use crate::error::AppError;
use crate::resilience::RollingWindow;

/// Request categories the rate limiter tracks independently, matching
/// `RateLimitConfig`'s per-category budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Read,
    Write,
    Generation,
    Search,
    Health,
}

impl Category {
    /// Classifies a request by method and path. `/processing/*` (crawl +
    /// LLM + embedding fan-out) is the generation category; `/search/*` is
    /// its own budget since it fans out an embedding call plus a full-table
    /// rescoring pass; `/health` is exempted from the usual write/read
    /// split so liveness probes are never throttled by business traffic.
    pub fn classify(method: &Method, path: &str) -> Self {
        if path.contains("/health") {
            return Category::Health;
        }
        if path.contains("/processing")
            || path.contains("/generate")
            || path.contains("/embeddings")
            || path.contains("/qa/answer")
        {
            return Category::Generation;
        }
        if path.contains("/search") {
            return Category::Search;
        }
        if matches!(method, &Method::POST | &Method::PUT | &Method::PATCH | &Method::DELETE) {
            return Category::Write;
        }
        Category::Read
    }

    fn limit(self, config: &RateLimitConfig) -> u32 {
        match self {
            Category::Read => config.read_per_min,
            Category::Write => config.write_per_min,
            Category::Generation => config.generation_per_min,
            Category::Search => config.search_per_min,
            Category::Health => config.health_per_min,
        }
    }
}

/// Budgets are tracked per (caller, category) so one noisy identity can't
/// exhaust the category's whole budget for every other caller.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<(String, Category), Arc<RollingWindow>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    async fn window_for(&self, identity: &str, category: Category) -> Arc<RollingWindow> {
        let mut windows = self.windows.lock().await;
        windows
            .entry((identity.to_string(), category))
            .or_insert_with(|| Arc::new(RollingWindow::new(std::time::Duration::from_secs(60))))
            .clone()
    }

    pub async fn check(&self, identity: &str, category: Category) -> Result<(), AppError> {
        let window = self.window_for(identity, category).await;
        if window.try_acquire(category.limit(&self.config)).await {
            Ok(())
        } else {
            Err(AppError::RateLimit { retry_after_secs: 1 })
        }
    }
}

/// Identity used to key the rolling window: the authenticated API key when
/// present (set by `require_api_key`), falling back to the client's socket
/// address when auth is disabled.
fn caller_identity(request: &Request) -> String {
    if let Some(ApiKeyIdentity(key)) = request.extensions().get::<ApiKeyIdentity>() {
        return key.clone();
    }
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    "anonymous".to_string()
}

pub async fn rate_limit_layer(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let category = Category::classify(request.method(), request.uri().path());
    let identity = caller_identity(&request);
    limiter.check(&identity, category).await?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_processing_as_generation() {
        assert_eq!(Category::classify(&Method::POST, "/api/v1/processing/process"), Category::Generation);
    }

    #[test]
    fn classifies_llm_backed_generation_routes_as_generation_not_write() {
        assert_eq!(Category::classify(&Method::POST, "/api/v1/generate/questions"), Category::Generation);
        assert_eq!(Category::classify(&Method::POST, "/api/v1/embeddings/generate"), Category::Generation);
        assert_eq!(Category::classify(&Method::POST, "/api/v1/embeddings/generate-batch"), Category::Generation);
        assert_eq!(Category::classify(&Method::POST, "/api/v1/qa/answer"), Category::Generation);
    }

    #[test]
    fn classifies_get_search_as_search_not_read() {
        assert_eq!(Category::classify(&Method::POST, "/api/v1/search/similar"), Category::Search);
    }

    #[test]
    fn classifies_get_as_read_by_default() {
        assert_eq!(Category::classify(&Method::GET, "/api/v1/questions/by-url"), Category::Read);
    }

    #[test]
    fn health_bypasses_read_write_split() {
        assert_eq!(Category::classify(&Method::GET, "/health"), Category::Health);
    }

    #[tokio::test]
    async fn exhausting_the_budget_returns_rate_limit_error() {
        let mut config = RateLimitConfig {
            read_per_min: 100,
            write_per_min: 30,
            generation_per_min: 10,
            search_per_min: 20,
            health_per_min: 1000,
        };
        config.write_per_min = 1;
        let limiter = RateLimiter::new(config);
        limiter.check("key-a", Category::Write).await.unwrap();
        assert!(matches!(limiter.check("key-a", Category::Write).await, Err(AppError::RateLimit { .. })));
    }

    #[tokio::test]
    async fn budgets_are_isolated_per_identity() {
        let mut config = RateLimitConfig {
            read_per_min: 100,
            write_per_min: 30,
            generation_per_min: 10,
            search_per_min: 20,
            health_per_min: 1000,
        };
        config.write_per_min = 1;
        let limiter = RateLimiter::new(config);
        limiter.check("key-a", Category::Write).await.unwrap();
        assert!(matches!(limiter.check("key-a", Category::Write).await, Err(AppError::RateLimit { .. })));
        limiter.check("key-b", Category::Write).await.unwrap();
    }
}
