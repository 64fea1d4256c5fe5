//! HTTP surface for the content pipeline: crawl/process, URL-scoped Q&A
//! lookup, similarity search, free-form Q&A, and direct embedding access.
//! Router/AppState/error-response/utoipa layout follows the teacher's
//! `api.rs`, re-pointed at this crate's endpoint set.

use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::auth::{require_api_key, require_scope_layer, ApiKeyValidator, ConfiguredApiKeyValidator};
use crate::cache::Cache;
use crate::config::AppConfig;
use crate::domain::{ProcessingResult, QAPair, SimilarArticle, Summary};
use crate::error::AppError;
use crate::jobs::JobStore;
use crate::orchestrator::{EmbeddingOrchestrator, LlmOrchestrator};
use crate::pipeline::Pipeline;
use crate::qa_answer::QaAnswerer;
use crate::question_gen::QuestionGenerator;
use crate::rate_limit::{rate_limit_layer, RateLimiter};
use crate::search::SearchService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<Pipeline>,
    pub search: Arc<SearchService>,
    pub questions: Arc<QuestionGenerator>,
    pub qa_answerer: Arc<QaAnswerer>,
    pub llm: Arc<LlmOrchestrator>,
    pub embeddings: Arc<EmbeddingOrchestrator>,
    pub cache: Arc<dyn Cache>,
    pub jobs: Arc<JobStore>,
    pub api_key_validator: Arc<dyn ApiKeyValidator>,
    pub rate_limiter: Arc<RateLimiter>,
}

type ApiResult<T> = Result<T, AppError>;

// --- request/response DTOs -------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProcessRequest {
    pub url: String,
    #[serde(default = "default_num_questions")]
    pub num_questions: usize,
    #[serde(default)]
    pub force_refresh: bool,
    #[serde(default)]
    pub custom_instruction: Option<String>,
}

fn default_num_questions() -> usize {
    5
}

#[derive(Debug, Serialize, ToSchema)]
pub struct JobHandleResponse {
    pub job_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatusResponse {
    Queued,
    Running,
    Done { result: ProcessResponse },
    Failed { error: String },
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct QuestionsByUrlQuery {
    pub blog_url: String,
    #[serde(default = "default_limit_10")]
    pub limit: usize,
}

fn default_limit_10() -> usize {
    10
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QaPairProjection {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub probability: f32,
    pub ordering_index: u32,
    pub click_count: u64,
}

impl From<QAPair> for QaPairProjection {
    fn from(pair: QAPair) -> Self {
        Self {
            id: pair.id,
            question: pair.question,
            answer: pair.answer,
            probability: pair.probability,
            ordering_index: pair.ordering_index,
            click_count: pair.click_count,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchSimilarRequest {
    pub question_id: String,
    #[serde(default = "default_limit_3")]
    pub limit: usize,
    #[serde(default)]
    pub domain: Option<String>,
}

fn default_limit_3() -> usize {
    3
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SearchSimilarResponse {
    pub question_id: String,
    pub question_text: String,
    pub similar_blogs: Vec<SimilarArticle>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct QaAnswerRequest {
    pub question: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
}

fn default_max_words() -> usize {
    200
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QaAnswerResponse {
    pub question: String,
    pub answer: String,
    pub word_count: usize,
    pub model: String,
    pub provider: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GenerateQuestionsRequest {
    pub content: String,
    #[serde(default = "default_num_questions")]
    pub num_questions: usize,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
}

fn default_difficulty() -> String {
    "medium".to_string()
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GeneratedQuestionItem {
    pub question: String,
    pub answer: String,
    pub difficulty: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EmbeddingsGenerateRequest {
    pub text: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EmbeddingsGenerateResponse {
    pub embedding: Vec<f32>,
    pub model: String,
    pub dimensions: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EmbeddingsGenerateBatchRequest {
    pub texts: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EmbeddingsGenerateBatchResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
    pub dimensions: usize,
    pub total_texts: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Wire shape for a processed article's summary: the embedding is omitted
/// rather than sent as an empty vector when it couldn't be generated.
#[derive(Debug, Serialize, ToSchema)]
pub struct SummaryPayload {
    pub summary: String,
    pub key_points: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl From<Summary> for SummaryPayload {
    fn from(summary: Summary) -> Self {
        let embedding = if summary.embedding.is_empty() { None } else { Some(summary.embedding) };
        Self {
            summary: summary.summary,
            key_points: summary.key_points,
            embedding,
        }
    }
}

/// Response body for `POST /api/v1/processing/process`, mapping the
/// internal [`ProcessingResult`] to the documented wire format rather than
/// exposing its field names directly.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProcessResponse {
    pub blog_url: String,
    pub blog_id: String,
    pub status: &'static str,
    pub summary: SummaryPayload,
    pub questions: Vec<QaPairProjection>,
    pub processing_time_ms: u64,
    pub message: String,
}

impl From<ProcessingResult> for ProcessResponse {
    fn from(result: ProcessingResult) -> Self {
        Self {
            blog_url: result.url,
            blog_id: result.article_id,
            status: "success",
            summary: SummaryPayload::from(result.summary),
            questions: result.questions.into_iter().map(QaPairProjection::from).collect(),
            processing_time_ms: result.elapsed_ms,
            message: result.warnings.join("; "),
        }
    }
}

// --- handlers ---------------------------------------------------------------

#[utoipa::path(get, path = "/health", responses((status = 200, body = HealthResponse)))]
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[utoipa::path(
    post,
    path = "/api/v1/processing/process",
    request_body = ProcessRequest,
    responses((status = 200, body = ProcessResponse))
)]
async fn process_handler(
    State(state): State<AppState>,
    Json(req): Json<ProcessRequest>,
) -> ApiResult<Json<ProcessResponse>> {
    let result = state
        .pipeline
        .process(&req.url, req.num_questions, req.force_refresh, req.custom_instruction.as_deref())
        .await?;
    Ok(Json(ProcessResponse::from(result)))
}

#[utoipa::path(
    post,
    path = "/api/v1/processing/process-async",
    request_body = ProcessRequest,
    responses((status = 202, body = JobHandleResponse))
)]
async fn process_async_handler(
    State(state): State<AppState>,
    Json(req): Json<ProcessRequest>,
) -> ApiResult<(StatusCode, Json<JobHandleResponse>)> {
    let job_id = state.jobs.create().await;
    let jobs = state.jobs.clone();
    let pipeline = state.pipeline.clone();

    tokio::spawn(async move {
        jobs.mark_running(job_id).await;
        match pipeline
            .process(&req.url, req.num_questions, req.force_refresh, req.custom_instruction.as_deref())
            .await
        {
            Ok(result) => jobs.mark_done(job_id, result).await,
            Err(err) => jobs.mark_failed(job_id, &err).await,
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(JobHandleResponse {
            job_id,
            status: "queued".to_string(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/processing/jobs/{id}",
    responses((status = 200, body = JobStatusResponse))
)]
async fn job_status_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    let status = state
        .jobs
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("no job with id {id}")))?;

    let body = match status {
        crate::jobs::JobStatus::Queued => JobStatusResponse::Queued,
        crate::jobs::JobStatus::Running => JobStatusResponse::Running,
        crate::jobs::JobStatus::Done(result) => JobStatusResponse::Done { result: ProcessResponse::from(result) },
        crate::jobs::JobStatus::Failed(error) => JobStatusResponse::Failed { error },
    };
    Ok(Json(body))
}

#[utoipa::path(
    get,
    path = "/api/v1/questions/by-url",
    params(("blog_url" = String, Query), ("limit" = usize, Query)),
    responses((status = 200, body = [QaPairProjection]))
)]
async fn questions_by_url_handler(
    State(state): State<AppState>,
    Query(query): Query<QuestionsByUrlQuery>,
) -> ApiResult<Json<Vec<QaPairProjection>>> {
    let pairs = state.search.get_questions_by_url(&query.blog_url, query.limit).await?;
    Ok(Json(pairs.into_iter().map(QaPairProjection::from).collect()))
}

#[utoipa::path(
    get,
    path = "/api/v1/questions/{id}",
    responses((status = 200, body = QaPairProjection), (status = 404))
)]
async fn question_by_id_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<QaPairProjection>> {
    state.search.record_click(&id).await?;
    let pair = state.search.get_qa_pair(&id).await?;
    Ok(Json(QaPairProjection::from(pair)))
}

#[utoipa::path(
    post,
    path = "/api/v1/search/similar",
    request_body = SearchSimilarRequest,
    responses((status = 200, body = SearchSimilarResponse))
)]
async fn search_similar_handler(
    State(state): State<AppState>,
    Json(req): Json<SearchSimilarRequest>,
) -> ApiResult<Json<SearchSimilarResponse>> {
    let qa_pair = state.search.get_qa_pair(&req.question_id).await?;
    let similar = state.search.find_similar(&req.question_id, req.limit, req.domain.as_deref()).await?;

    Ok(Json(SearchSimilarResponse {
        question_id: req.question_id,
        question_text: qa_pair.question,
        similar_blogs: similar,
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/qa/answer",
    request_body = QaAnswerRequest,
    responses((status = 200, body = QaAnswerResponse))
)]
async fn qa_answer_handler(
    State(state): State<AppState>,
    Json(req): Json<QaAnswerRequest>,
) -> ApiResult<Json<QaAnswerResponse>> {
    let answer = state.qa_answerer.answer(&req.question, req.context.as_deref(), req.max_words).await?;
    Ok(Json(QaAnswerResponse {
        question: req.question,
        answer: answer.answer,
        word_count: answer.word_count,
        model: answer.model,
        provider: "orchestrated".to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/generate/questions",
    request_body = GenerateQuestionsRequest,
    responses((status = 200, body = [GeneratedQuestionItem]))
)]
async fn generate_questions_handler(
    State(state): State<AppState>,
    Json(req): Json<GenerateQuestionsRequest>,
) -> ApiResult<Json<Vec<GeneratedQuestionItem>>> {
    let instruction = format!("Generate questions at a {} difficulty level.", req.difficulty);
    let set = state
        .questions
        .generate("", &req.content, req.num_questions, Some(&instruction), tokio_util::sync::CancellationToken::new())
        .await?;

    let items = set
        .questions
        .into_iter()
        .map(|qa| GeneratedQuestionItem {
            question: qa.question,
            answer: qa.answer,
            difficulty: req.difficulty.clone(),
        })
        .collect();
    Ok(Json(items))
}

#[utoipa::path(
    post,
    path = "/api/v1/embeddings/generate",
    request_body = EmbeddingsGenerateRequest,
    responses((status = 200, body = EmbeddingsGenerateResponse))
)]
async fn embeddings_generate_handler(
    State(state): State<AppState>,
    Json(req): Json<EmbeddingsGenerateRequest>,
) -> ApiResult<Json<EmbeddingsGenerateResponse>> {
    let embedding = state.embeddings.generate(&req.text, req.model.as_deref()).await?;
    let dimensions = embedding.len();
    Ok(Json(EmbeddingsGenerateResponse {
        embedding,
        model: req.model.unwrap_or_else(|| "default".to_string()),
        dimensions,
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/embeddings/generate-batch",
    request_body = EmbeddingsGenerateBatchRequest,
    responses((status = 200, body = EmbeddingsGenerateBatchResponse))
)]
async fn embeddings_generate_batch_handler(
    State(state): State<AppState>,
    Json(req): Json<EmbeddingsGenerateBatchRequest>,
) -> ApiResult<Json<EmbeddingsGenerateBatchResponse>> {
    if req.texts.is_empty() || req.texts.len() > 100 {
        return Err(AppError::Validation("texts must contain between 1 and 100 items".to_string()));
    }
    let embeddings = state.embeddings.generate_batch(&req.texts, req.model.as_deref()).await?;
    let dimensions = embeddings.first().map(Vec::len).unwrap_or(0);
    let total_texts = embeddings.len();
    Ok(Json(EmbeddingsGenerateBatchResponse {
        embeddings,
        model: req.model.unwrap_or_else(|| "default".to_string()),
        dimensions,
        total_texts,
    }))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        process_handler,
        process_async_handler,
        job_status_handler,
        questions_by_url_handler,
        question_by_id_handler,
        search_similar_handler,
        qa_answer_handler,
        generate_questions_handler,
        embeddings_generate_handler,
        embeddings_generate_batch_handler,
    ),
    components(schemas(
        ProcessRequest,
        JobHandleResponse,
        JobStatusResponse,
        QaPairProjection,
        SearchSimilarRequest,
        SearchSimilarResponse,
        QaAnswerRequest,
        QaAnswerResponse,
        GenerateQuestionsRequest,
        GeneratedQuestionItem,
        EmbeddingsGenerateRequest,
        EmbeddingsGenerateResponse,
        EmbeddingsGenerateBatchRequest,
        EmbeddingsGenerateBatchResponse,
        HealthResponse,
        SummaryPayload,
        ProcessResponse,
        QAPair,
        SimilarArticle,
    )),
    tags(
        (name = "processing", description = "Crawl, summarize, and generate questions for a URL"),
        (name = "search", description = "URL-scoped Q&A lookup and similarity search"),
        (name = "generation", description = "Direct LLM/embedding access"),
    ),
    info(
        title = "Content Pipeline API",
        version = "0.1.0",
        description = "Ingests web articles into summaries, exploratory Q&A, and embeddings; \
                       serves URL-based Q&A lookup and semantic similarity search.",
    )
)]
struct ApiDoc;

pub fn create_router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/api/v1/processing/process", post(process_handler))
        .route("/api/v1/processing/process-async", post(process_async_handler))
        .route("/api/v1/processing/jobs/{id}", get(job_status_handler))
        .route("/api/v1/questions/by-url", get(questions_by_url_handler))
        .route("/api/v1/questions/{id}", get(question_by_id_handler))
        .route("/api/v1/search/similar", post(search_similar_handler))
        .route("/api/v1/qa/answer", post(qa_answer_handler))
        .route("/api/v1/generate/questions", post(generate_questions_handler))
        .route("/api/v1/embeddings/generate", post(embeddings_generate_handler))
        .route("/api/v1/embeddings/generate-batch", post(embeddings_generate_batch_handler))
        .layer(middleware::from_fn_with_state(state.rate_limiter.clone(), rate_limit_layer))
        .layer(middleware::from_fn(require_scope_layer))
        .layer(middleware::from_fn_with_state(state.api_key_validator.clone(), require_api_key));

    let cors = build_cors_layer(&state.config.http.cors_origins);

    Router::new()
        .route("/health", get(health_handler))
        .route("/health/ready", get(health_handler))
        .route("/health/live", get(health_handler))
        .merge(authenticated)
        .with_state(state)
        .merge(utoipa_swagger_ui::SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(annotate_error_path))
}

/// Fills in the `path` field of [`crate::error::AppError`]'s JSON envelope,
/// which has no access to the request at the point it's built. Only touches
/// responses that already look like that envelope (carry a `correlation_id`),
/// so it's a no-op for ordinary handler output.
async fn annotate_error_path(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    if !response.status().is_client_error() && !response.status().is_server_error() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };

    let Ok(mut value) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        return Response::from_parts(parts, Body::from(bytes));
    };
    let Some(object) = value.as_object_mut() else {
        return Response::from_parts(parts, Body::from(bytes));
    };
    if !object.contains_key("correlation_id") {
        return Response::from_parts(parts, Body::from(bytes));
    }
    object.insert("path".to_string(), serde_json::Value::String(path));

    let patched = serde_json::to_vec(&value).unwrap_or_else(|_| bytes.to_vec());
    Response::from_parts(parts, Body::from(patched))
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed = origins.iter().filter_map(|origin| origin.parse().ok()).collect::<Vec<_>>();
    CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
}

pub fn default_api_key_validator(config: &AppConfig) -> Arc<dyn ApiKeyValidator> {
    Arc::new(ConfiguredApiKeyValidator::new(config.http.api_keys.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qa_pair_projection_carries_click_count() {
        let pair = QAPair {
            id: "q1".to_string(),
            article_id: "a1".to_string(),
            question: "Q?".to_string(),
            answer: "A".to_string(),
            keyword_anchor: None,
            probability: 0.5,
            ordering_index: 0,
            embedding: vec![],
            click_count: 3,
            last_clicked_at: None,
            created_at: chrono::Utc::now(),
        };
        let projection = QaPairProjection::from(pair);
        assert_eq!(projection.click_count, 3);
    }
}
