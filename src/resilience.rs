//! Circuit breaker and retry/timeout wrappers.
//!
//! Each named dependency (LLM provider, vector store, crawler, ...) gets its
//! own breaker tracked in a [`CircuitBreakerRegistry`]. The state machine is
//! the textbook `Closed -> Open -> HalfOpen -> Closed` cycle; there is no
//! crate in the teacher's stack for this, so it's hand-rolled the way the
//! teacher hand-rolls its other state machines.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Parameters for a single breaker.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub fail_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            fail_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
    config: BreakerConfig,
}

/// A single named circuit breaker. Cloning shares the underlying state.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    inner: Arc<Mutex<BreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                opened_at: None,
                config,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, advancing `Open -> HalfOpen` if `reset_timeout` has
    /// elapsed since the breaker tripped.
    pub async fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().await;
        self.maybe_half_open(&mut inner);
        inner.state
    }

    fn maybe_half_open(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= inner.config.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                }
            }
        }
    }

    async fn before_call(&self) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        self.maybe_half_open(&mut inner);
        if inner.state == BreakerState::Open {
            return Err(AppError::ServiceUnavailable(format!(
                "circuit breaker '{}' is open",
                self.name
            )));
        }
        Ok(())
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.failure_count = 0;
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= inner.config.fail_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Run `f` through the breaker: rejected immediately while open, success
    /// resets the failure count, failure increments it (or re-opens from
    /// half-open).
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.before_call().await?;
        match f().await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(err) => {
                self.on_failure().await;
                Err(err)
            }
        }
    }
}

/// Snapshot of a breaker's state for status/health endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: String,
    pub failure_count: u32,
}

/// Holds one breaker per named downstream dependency, mirroring the
/// per-service breakers configured for the LLM service, vector store,
/// crawler, and external APIs.
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        let registry = Self {
            breakers: Mutex::new(HashMap::new()),
        };
        registry
    }
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the registry with the standard named breakers used across the
    /// pipeline, each with its own fail threshold and reset timeout.
    pub async fn with_defaults() -> Self {
        let registry = Self::new();
        registry
            .register("llm_service", BreakerConfig { fail_threshold: 5, reset_timeout: Duration::from_secs(60) })
            .await;
        registry
            .register("embedding_service", BreakerConfig { fail_threshold: 5, reset_timeout: Duration::from_secs(60) })
            .await;
        registry
            .register("vector_store", BreakerConfig { fail_threshold: 5, reset_timeout: Duration::from_secs(60) })
            .await;
        registry
            .register("crawler", BreakerConfig { fail_threshold: 5, reset_timeout: Duration::from_secs(90) })
            .await;
        registry
            .register("external_api", BreakerConfig { fail_threshold: 5, reset_timeout: Duration::from_secs(120) })
            .await;
        registry
    }

    pub async fn register(&self, name: &str, config: BreakerConfig) {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(name, config));
    }

    pub async fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.breakers.lock().await.get(name).cloned()
    }

    pub async fn status(&self) -> Vec<BreakerStatus> {
        let breakers = self.breakers.lock().await;
        let mut out = Vec::with_capacity(breakers.len());
        for breaker in breakers.values() {
            let state = breaker.state().await;
            let inner = breaker.inner.lock().await;
            out.push(BreakerStatus {
                name: breaker.name.clone(),
                state: match state {
                    BreakerState::Closed => "closed".to_string(),
                    BreakerState::Open => "open".to_string(),
                    BreakerState::HalfOpen => "half_open".to_string(),
                },
                failure_count: inner.failure_count,
            });
        }
        out
    }

    pub async fn reset_all(&self) {
        let breakers = self.breakers.lock().await;
        for breaker in breakers.values() {
            breaker.on_success().await;
        }
    }
}

/// Wrap a future with a hard deadline, mapping expiry to the appropriate
/// timeout error via `on_timeout`.
pub async fn with_timeout<F, T>(
    duration: Duration,
    fut: F,
    on_timeout: impl FnOnce() -> AppError,
) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

/// Exponential backoff retry: delays of `initial_delay * backoff_factor^n`,
/// clamped to `max_delay`, retrying up to `max_attempts` times while
/// `should_retry` returns true.
pub async fn with_retry<F, Fut, T>(
    mut make_attempt: F,
    max_attempts: u32,
    initial_delay: Duration,
    backoff_factor: f64,
    max_delay: Duration,
    should_retry: impl Fn(&AppError) -> bool,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut delay = initial_delay;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match make_attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && should_retry(&err) => {
                tokio::time::sleep(delay).await;
                let next = delay.mul_f64(backoff_factor);
                delay = next.min(max_delay);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Fixed-size rolling time window used to enforce requests-per-minute caps.
/// Shared by the provider orchestrator (per-provider RPM) and the HTTP rate
/// limit middleware (per-identity, per-category RPM).
pub struct RollingWindow {
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RollingWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Drop timestamps older than the window, then record a new call only if
    /// doing so keeps the count at or under `limit`. Returns whether the
    /// call is allowed.
    pub async fn try_acquire(&self, limit: u32) -> bool {
        let mut timestamps = self.timestamps.lock().await;
        let now = Instant::now();
        while let Some(front) = timestamps.front() {
            if now.duration_since(*front) > self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        if timestamps.len() as u32 >= limit {
            return false;
        }
        timestamps.push_back(now);
        true
    }

    pub async fn count(&self) -> usize {
        let mut timestamps = self.timestamps.lock().await;
        let now = Instant::now();
        while let Some(front) = timestamps.front() {
            if now.duration_since(*front) > self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        timestamps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn breaker_opens_after_fail_threshold() {
        let breaker = CircuitBreaker::new(
            "test",
            BreakerConfig {
                fail_threshold: 2,
                reset_timeout: Duration::from_millis(50),
            },
        );

        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), _>(AppError::Internal("boom".into())) })
                .await;
        }

        assert_eq!(breaker.state().await, BreakerState::Open);
        let result = breaker.call(|| async { Ok::<_, AppError>(()) }).await;
        assert!(matches!(result, Err(AppError::ServiceUnavailable(_))));
    }

    #[tokio::test]
    async fn breaker_half_opens_after_reset_timeout_and_recloses_on_success() {
        let breaker = CircuitBreaker::new(
            "test",
            BreakerConfig {
                fail_threshold: 1,
                reset_timeout: Duration::from_millis(10),
            },
        );
        let _ = breaker
            .call(|| async { Err::<(), _>(AppError::Internal("boom".into())) })
            .await;
        assert_eq!(breaker.state().await, BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(breaker.state().await, BreakerState::HalfOpen);

        let result = breaker.call(|| async { Ok::<_, AppError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(breaker.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn with_timeout_maps_expiry_to_custom_error() {
        let result: Result<(), AppError> = with_timeout(
            Duration::from_millis(5),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            },
            || AppError::ServiceUnavailable("slow".into()),
        )
        .await;
        assert!(matches!(result, Err(AppError::ServiceUnavailable(_))));
    }

    #[tokio::test]
    async fn with_retry_stops_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), AppError> = with_retry(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::Internal("always fails".into())) }
            },
            3,
            Duration::from_millis(1),
            2.0,
            Duration::from_millis(10),
            |_| true,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn registry_with_defaults_seeds_known_breakers() {
        let registry = CircuitBreakerRegistry::with_defaults().await;
        assert!(registry.get("llm_service").await.is_some());
        assert!(registry.get("crawler").await.is_some());
        let statuses = registry.status().await;
        assert_eq!(statuses.len(), 5);
    }

    #[tokio::test]
    async fn rolling_window_rejects_once_limit_is_reached() {
        let window = RollingWindow::new(Duration::from_millis(50));
        assert!(window.try_acquire(2).await);
        assert!(window.try_acquire(2).await);
        assert!(!window.try_acquire(2).await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(window.try_acquire(2).await);
    }
}
