//! Error taxonomy for the content pipeline
//!
//! A single `thiserror`-derived tree rooted at [`AppError`], wrapping the
//! focused sub-enums for each external dependency. The HTTP boundary (see
//! `api.rs`) is the only layer that maps these to status codes; everywhere
//! else an error is either recovered (orchestrator fallback, pipeline
//! partial success) or propagated with `?`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AppError>;

/// Errors raised by an LLM provider or the LLM orchestrator.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("provider authentication failed: {0}")]
    AuthFailed(String),

    #[error("provider quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("invalid request to provider: {0}")]
    InvalidRequest(String),

    #[error("network error contacting provider: {0}")]
    Network(String),

    #[error("provider call timed out")]
    Timeout,

    #[error("provider returned a malformed response: {0}")]
    InvalidResponse(String),

    #[error("provider is rate limited")]
    RateLimited,

    #[error("all configured providers failed: {0}")]
    AllProvidersFailed(String),
}

/// Errors raised by an embedding provider or the embedding orchestrator.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding provider authentication failed: {0}")]
    AuthFailed(String),

    #[error("embedding provider quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("input exceeds provider token limit ({estimated} > {limit})")]
    InputTooLarge { estimated: usize, limit: usize },

    #[error("network error contacting embedding provider: {0}")]
    Network(String),

    #[error("embedding provider call timed out")]
    Timeout,

    #[error("embedding provider returned a malformed response: {0}")]
    InvalidResponse(String),

    #[error("all configured embedding providers failed: {0}")]
    AllProvidersFailed(String),
}

/// Errors raised by the vector store.
#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector shape error: {0}")]
    ShapeError(String),

    #[error("storage backend failure: {0}")]
    StorageFailed(String),

    #[error("document not found: {0}")]
    NotFound(String),
}

/// Errors raised by the pipeline orchestrator.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("crawl failed for {url}: {reason}")]
    CrawlFailed { url: String, reason: String },

    #[error("response body exceeds configured size cap ({size} > {cap})")]
    BodyTooLarge { size: usize, cap: usize },

    #[error("question generation produced no valid items")]
    CorruptArtifact,

    #[error("article not found for url: {0}")]
    ArticleNotFound(String),
}

/// The crate-wide error type. One correlation id is attached to every error
/// as it crosses the HTTP boundary so operators can line up a response with
/// the corresponding WARN/ERROR log line.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("permission denied: required scope {0}")]
    PermissionDenied(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimit { retry_after_secs: u64 },

    #[error("llm error: {0}")]
    Llm(#[from] LlmError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("all providers failed: {0}")]
    AllProvidersFailed(String),

    #[error("corrupt artifact: {0}")]
    CorruptArtifact(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Machine-readable error code, stable across releases.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::AuthFailed => "auth_failed",
            AppError::PermissionDenied(_) => "permission_denied",
            AppError::RateLimit { .. } => "rate_limit",
            AppError::Llm(LlmError::AuthFailed(_)) => "provider_auth_failed",
            AppError::Llm(LlmError::QuotaExceeded(_)) => "provider_quota_exceeded",
            AppError::Llm(LlmError::ModelNotFound(_)) => "provider_model_not_found",
            AppError::Llm(LlmError::InvalidRequest(_)) => "provider_invalid_request",
            AppError::Llm(LlmError::Network(_)) => "provider_network_error",
            AppError::Llm(LlmError::Timeout) => "provider_timeout",
            AppError::Llm(LlmError::InvalidResponse(_)) => "provider_invalid_response",
            AppError::Llm(LlmError::RateLimited) => "provider_rate_limited",
            AppError::Llm(LlmError::AllProvidersFailed(_)) => "all_providers_failed",
            AppError::Embedding(_) => "embedding_provider_error",
            AppError::VectorStore(VectorStoreError::DimensionMismatch { .. }) => {
                "dimension_mismatch"
            }
            AppError::VectorStore(VectorStoreError::ShapeError(_)) => "shape_error",
            AppError::VectorStore(_) => "vector_store_error",
            AppError::Pipeline(_) => "pipeline_error",
            AppError::ServiceUnavailable(_) => "service_unavailable",
            AppError::AllProvidersFailed(_) => "all_providers_failed",
            AppError::CorruptArtifact(_) => "corrupt_artifact",
            AppError::Io(_) => "io_error",
            AppError::Serialization(_) => "serialization_error",
            AppError::Http(_) => "http_client_error",
            AppError::Database(_) => "database_error",
            AppError::Config(_) => "config_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status this error maps to, per the error-handling design.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AuthFailed => StatusCode::UNAUTHORIZED,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Llm(LlmError::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Llm(LlmError::AllProvidersFailed(_)) => StatusCode::BAD_GATEWAY,
            AppError::Llm(_) => StatusCode::BAD_GATEWAY,
            AppError::Embedding(_) => StatusCode::BAD_GATEWAY,
            AppError::VectorStore(VectorStoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::VectorStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Pipeline(PipelineError::ArticleNotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Pipeline(PipelineError::CorruptArtifact) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Pipeline(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::AllProvidersFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::CorruptArtifact(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Io(_)
            | AppError::Serialization(_)
            | AppError::Http(_)
            | AppError::Database(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Seconds the client should wait before retrying, when applicable.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            AppError::RateLimit { retry_after_secs } => Some(*retry_after_secs),
            AppError::Llm(LlmError::RateLimited) => Some(1),
            AppError::ServiceUnavailable(_) => Some(1),
            _ => None,
        }
    }

    /// True for errors C6/C11 are allowed to retry on; business logic never
    /// retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Llm(LlmError::Timeout)
                | AppError::Llm(LlmError::Network(_))
                | AppError::Llm(LlmError::RateLimited)
                | AppError::Embedding(EmbeddingError::Timeout)
                | AppError::Embedding(EmbeddingError::Network(_))
                | AppError::Http(_)
        )
    }
}

/// JSON error envelope returned at the HTTP boundary. Every error response
/// is shaped like this, per the error-handling design.
#[derive(Serialize)]
struct ErrorEnvelope {
    error_code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    timestamp: DateTime<Utc>,
    path: String,
    correlation_id: Uuid,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let correlation_id = Uuid::new_v4();
        let retry_after = self.retry_after();

        tracing::error!(
            correlation_id = %correlation_id,
            error_code = self.error_code(),
            status = status.as_u16(),
            "{}",
            self
        );

        let body = ErrorEnvelope {
            error_code: self.error_code(),
            message: self.to_string(),
            details: None,
            retry_after,
            timestamp: Utc::now(),
            path: String::new(),
            correlation_id,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = retry_after {
            if let Ok(value) = axum::http::HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_rate_limit_to_429_with_retry_after() {
        let err = AppError::RateLimit {
            retry_after_secs: 30,
        };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.retry_after(), Some(30));
        assert_eq!(err.error_code(), "rate_limit");
    }

    #[test]
    fn maps_dimension_mismatch_to_500_internal_only() {
        let err = AppError::VectorStore(VectorStoreError::DimensionMismatch {
            expected: 1536,
            actual: 768,
        });
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_code(), "dimension_mismatch");
    }

    #[test]
    fn all_providers_failed_maps_to_502() {
        let err = AppError::Llm(LlmError::AllProvidersFailed("primary, fallback".into()));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn service_unavailable_carries_retry_after() {
        let err = AppError::ServiceUnavailable("llm_service".into());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.retry_after().is_some());
    }

    #[test]
    fn retryable_errors_are_flagged() {
        assert!(AppError::Llm(LlmError::Timeout).is_retryable());
        assert!(!AppError::Validation("bad input".into()).is_retryable());
    }
}
