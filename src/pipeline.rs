//! End-to-end ingestion pipeline: crawl a URL, persist the article, then fan
//! out summarization and question generation in parallel, embed every
//! summary/question pair in a second parallel fan-out, and persist the
//! result as one group. Mirrors the `asyncio.gather`-based two-stage
//! fan-out of the service this crate's pipeline is grounded on, reimplemented
//! with a `tokio::select!` race over both branches and a shared cancellation
//! token, so a branch that errors first actually stops its sibling instead
//! of waiting for both to finish.

use crate::cache::Cache;
use crate::config::PipelineConfig;
use crate::domain::{article_id_for_url, Article, ProcessingResult, QAPair, Summary};
use crate::error::{AppError, PipelineError};
use crate::llm::provider::{GenerationRequest, Message};
use crate::orchestrator::{EmbeddingOrchestrator, LlmOrchestrator};
use crate::question_gen::QuestionGenerator;
use crate::repository::{ArticleRepository, KnowledgeRepository};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static LANG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<html[^>]*\blang\s*=\s*["']?([a-zA-Z-]+)"#).unwrap());
static META_LANG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta[^>]+http-equiv\s*=\s*["']?content-language["']?[^>]+content\s*=\s*["']?([a-zA-Z-]+)"#).unwrap()
});

const DEFAULT_SUMMARY_INSTRUCTION: &str = "You are an expert content summarizer. Produce a title (max 100 \
characters), a 2-3 sentence summary written for semantic search retrieval, and 3-5 key points, all drawn \
strictly from the supplied article text. Respond only with the JSON schema given below.";

const SUMMARY_SCHEMA_EXAMPLE: &str = r#"{
    "title": "Concise title",
    "summary": "2-3 sentence summary.",
    "key_points": ["point one", "point two", "point three"]
}"#;

const MAX_SUMMARY_ARTICLE_CHARS: usize = 6000;

#[derive(Debug, Clone, Deserialize, Serialize)]
struct SummaryEnvelope {
    #[serde(default)]
    title: Option<String>,
    summary: String,
    #[serde(default)]
    key_points: Vec<String>,
}

/// Crawls a URL over plain `reqwest`, with exponential backoff on network and
/// 5xx failures only (never on 4xx — those are not transient).
pub struct Crawler {
    client: reqwest::Client,
    max_body_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub title: String,
    pub body: String,
    pub language: String,
    pub domain: String,
}

impl Crawler {
    pub fn new(config: &PipelineConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.crawl_timeout_secs))
            .user_agent("content-pipeline/1.0")
            .build()
            .map_err(AppError::from)?;
        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<CrawledPage, AppError> {
        crate::resilience::with_retry(
            || self.fetch_once(url),
            3,
            Duration::from_secs(1),
            2.0,
            Duration::from_secs(4),
            |err| matches!(err, AppError::Http(_) | AppError::ServiceUnavailable(_)),
        )
        .await
    }

    async fn fetch_once(&self, url: &str) -> Result<CrawledPage, AppError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            PipelineError::CrawlFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        if response.status().is_server_error() {
            return Err(AppError::ServiceUnavailable(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        if !response.status().is_success() {
            return Err(PipelineError::CrawlFailed {
                url: url.to_string(),
                reason: format!("unexpected status {}", response.status()),
            }
            .into());
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_body_bytes {
                return Err(PipelineError::BodyTooLarge {
                    size: len as usize,
                    cap: self.max_body_bytes,
                }
                .into());
            }
        }

        let bytes = response.bytes().await.map_err(|e| PipelineError::CrawlFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if bytes.len() > self.max_body_bytes {
            return Err(PipelineError::BodyTooLarge {
                size: bytes.len(),
                cap: self.max_body_bytes,
            }
            .into());
        }

        let html = String::from_utf8_lossy(&bytes).into_owned();
        Ok(self.extract(url, &html))
    }

    fn extract(&self, url: &str, html: &str) -> CrawledPage {
        let preprocessor = crate::text::Preprocessor::default();

        let title = TITLE_RE
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| preprocessor.normalize_whitespace(&preprocessor.clean_html(m.as_str())))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        let language = LANG_RE
            .captures(html)
            .or_else(|| META_LANG_RE.captures(html))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_else(|| "en".to_string());

        let body = preprocessor.normalize_whitespace(&preprocessor.clean_html(html));

        let domain = extract_host(url);

        CrawledPage {
            title,
            body,
            language,
            domain,
        }
    }
}

/// Pulls the host out of a URL without pulling in a full URL-parsing crate:
/// strips the scheme, then anything from the first `/`, `?`, or `#`.
fn extract_host(url: &str) -> String {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let host_and_port = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(without_scheme);
    host_and_port.split('@').next_back().unwrap_or(host_and_port).to_string()
}

pub struct Pipeline {
    crawler: Crawler,
    llm: Arc<LlmOrchestrator>,
    embeddings: Arc<EmbeddingOrchestrator>,
    embedding_model: String,
    questions: Arc<QuestionGenerator>,
    articles: Arc<dyn ArticleRepository>,
    knowledge: Arc<dyn KnowledgeRepository>,
    cache: Arc<dyn Cache>,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        llm: Arc<LlmOrchestrator>,
        embeddings: Arc<EmbeddingOrchestrator>,
        embedding_model: String,
        questions: Arc<QuestionGenerator>,
        articles: Arc<dyn ArticleRepository>,
        knowledge: Arc<dyn KnowledgeRepository>,
        cache: Arc<dyn Cache>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            crawler: Crawler::new(config)?,
            llm,
            embeddings,
            embedding_model,
            questions,
            articles,
            knowledge,
            cache,
        })
    }

    /// Runs the full pipeline for `url`. When `force_refresh` is false and an
    /// article already exists for this URL, returns the existing result
    /// without re-crawling or re-generating anything.
    pub async fn process(
        &self,
        url: &str,
        num_questions: usize,
        force_refresh: bool,
        custom_instruction: Option<&str>,
    ) -> Result<ProcessingResult, AppError> {
        let started = Utc::now();

        if !force_refresh {
            if let Some(existing) = self.articles.get_by_url(url).await? {
                let qa_pairs = self.knowledge.get_qa_pairs_by_article(&existing.id).await?;
                let summary = self
                    .knowledge
                    .get_summary(&existing.id)
                    .await?
                    .ok_or_else(|| AppError::Internal(format!("no summary persisted for article {}", existing.id)))?;
                return Ok(ProcessingResult {
                    article_id: existing.id,
                    url: existing.url,
                    summary,
                    questions: qa_pairs,
                    elapsed_ms: 0,
                    warnings: Vec::new(),
                });
            }
        }

        let page = self.crawler.fetch(url).await?;
        let article = Article::new(url, page.title.clone(), page.body.clone(), page.language, page.domain);
        self.articles.save(&article).await?;
        info!(article_id = %article.id, url, "crawled and persisted article");

        // Summary and question generation race concurrently; whichever
        // branch errors first cancels the other mid-flight so we don't pay
        // for an LLM call whose result can't matter. If the summary branch
        // is the one that finished (successfully) before the other erred,
        // its result survives the cancellation signal untouched — that's
        // what lets a failed Q&A generation still retain a good summary.
        let cancellation = CancellationToken::new();
        let mut summary_fut = Box::pin(self.generate_summary(&article, cancellation.clone()));
        let mut questions_fut = Box::pin(self.questions.generate(
            &article.title,
            &article.body,
            num_questions,
            custom_instruction,
            cancellation.clone(),
        ));

        let mut summary_result = None;
        let mut questions_result = None;
        while summary_result.is_none() || questions_result.is_none() {
            tokio::select! {
                res = &mut summary_fut, if summary_result.is_none() => {
                    if res.is_err() {
                        cancellation.cancel();
                    }
                    summary_result = Some(res);
                }
                res = &mut questions_fut, if questions_result.is_none() => {
                    if res.is_err() {
                        cancellation.cancel();
                    }
                    questions_result = Some(res);
                }
            }
        }

        let summary_draft = match summary_result.unwrap() {
            Ok(draft) => draft,
            Err(err) => return Err(err),
        };

        let question_set = match questions_result.unwrap() {
            Ok(set) => set,
            Err(q_err) => {
                // Summary already succeeded; per the partial-failure
                // contract it's retained even though Q&A generation failed
                // outright. Embed it standalone (best-effort) and persist
                // before surfacing the Q&A error to the caller.
                let summary_embedding = match self.embeddings.generate(&summary_draft.summary, None).await {
                    Ok(embedding) => embedding,
                    Err(embed_err) => {
                        warn!(url, error = %embed_err, "summary embedding failed after Q&A generation also failed");
                        Vec::new()
                    }
                };
                let summary = Summary {
                    article_id: article.id.clone(),
                    summary: summary_draft.summary,
                    key_points: summary_draft.key_points,
                    embedding: summary_embedding,
                    embedding_model: self.embedding_model.clone(),
                    created_at: Utc::now(),
                };
                self.knowledge.save_summary(&summary).await?;
                if let Err(err) = self.cache.delete(&format!("questions:{url}")).await {
                    warn!(url, error = %err, "failed to invalidate questions cache for url");
                }
                return Err(q_err);
            }
        };

        let embed_inputs: Vec<String> = std::iter::once(summary_draft.summary.clone())
            .chain(
                question_set
                    .questions
                    .iter()
                    .map(|qa| format!("{} {}", qa.question, qa.answer)),
            )
            .collect();

        let embed_futures = embed_inputs
            .iter()
            .map(|text| self.embed_cancellable(text, cancellation.clone()));
        let embed_results = futures::future::join_all(embed_futures).await;

        let mut warnings = Vec::new();
        let mut embeddings_iter = embed_results.into_iter();
        let summary_embedding = match embeddings_iter.next() {
            Some(Ok(embedding)) => embedding,
            Some(Err(err)) => {
                warnings.push(format!("summary embedding failed: {err}"));
                Vec::new()
            }
            None => Vec::new(),
        };

        let summary = Summary {
            article_id: article.id.clone(),
            summary: summary_draft.summary,
            key_points: summary_draft.key_points,
            embedding: summary_embedding,
            embedding_model: self.embedding_model.clone(),
            created_at: Utc::now(),
        };

        let mut qa_pairs = Vec::with_capacity(question_set.questions.len());
        for (index, (qa, embed_result)) in question_set.questions.into_iter().zip(embeddings_iter).enumerate() {
            match embed_result {
                Ok(embedding) => qa_pairs.push(QAPair {
                    id: Uuid::new_v4().to_string(),
                    article_id: article.id.clone(),
                    question: qa.question,
                    answer: qa.answer,
                    keyword_anchor: qa.keyword_anchor,
                    probability: qa.probability,
                    ordering_index: index as u32,
                    embedding,
                    click_count: 0,
                    last_clicked_at: None,
                    created_at: Utc::now(),
                }),
                Err(err) => warnings.push(format!("question {index} embedding failed: {err}")),
            }
        }

        if question_set.degraded {
            warnings.push("question generation fell back to a low-confidence paragraph-derived set".to_string());
        }

        self.knowledge.save_summary(&summary).await?;
        self.knowledge.save_qa_pairs(&qa_pairs).await?;

        if let Err(err) = self.cache.delete(&format!("questions:{url}")).await {
            warn!(url, error = %err, "failed to invalidate questions cache for url");
        }
        for pair in &qa_pairs {
            let similar_prefix = format!("similar:{}:", pair.id);
            if let Err(err) = self.cache.delete_pattern(&similar_prefix).await {
                warn!(question_id = %pair.id, error = %err, "failed to invalidate similar-search cache");
            }
        }

        Ok(ProcessingResult {
            article_id: article.id,
            url: article.url,
            summary,
            questions: qa_pairs,
            elapsed_ms: (Utc::now() - started).num_milliseconds().max(0) as u64,
            warnings,
        })
    }

    /// Races a single embedding call against `cancellation`, so an in-flight
    /// embed stops as soon as a sibling task signals failure instead of
    /// running to completion for a result nothing will use.
    async fn embed_cancellable(&self, text: &str, cancellation: CancellationToken) -> Result<Vec<f32>, AppError> {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(AppError::ServiceUnavailable("cancelled by sibling task".to_string())),
            result = self.embeddings.generate(text, None) => result,
        }
    }

    async fn generate_summary(
        &self,
        article: &Article,
        cancellation: CancellationToken,
    ) -> Result<SummaryDraft, AppError> {
        let truncated: String = article.body.chars().take(MAX_SUMMARY_ARTICLE_CHARS).collect();
        let prompt = format!(
            "{DEFAULT_SUMMARY_INSTRUCTION}\n\nRequired JSON schema:\n{SUMMARY_SCHEMA_EXAMPLE}\n\n\
             Article title: {}\n\nArticle content:\n{truncated}",
            article.title
        );
        let request = GenerationRequest::new(vec![Message::user(prompt)]).with_temperature(0.3);

        let response = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                return Err(AppError::ServiceUnavailable("cancelled by sibling task".to_string()));
            }
            result = self.llm.generate(request, None) => result?,
        };

        let draft = parse_summary(&response.text).unwrap_or_else(|| fallback_summary(&article.body));
        Ok(draft)
    }
}

struct SummaryDraft {
    summary: String,
    key_points: Vec<String>,
}

fn parse_summary(text: &str) -> Option<SummaryDraft> {
    let trimmed = text.trim();
    let envelope: SummaryEnvelope = serde_json::from_str(trimmed)
        .ok()
        .or_else(|| {
            let start = trimmed.find('{')?;
            let end = trimmed.rfind('}')?;
            if end <= start {
                return None;
            }
            serde_json::from_str(&trimmed[start..=end]).ok()
        })?;
    if envelope.summary.trim().is_empty() {
        return None;
    }
    Some(SummaryDraft {
        summary: envelope.summary,
        key_points: envelope.key_points,
    })
}

/// Raw-text fallback when the model's output cannot be parsed as JSON:
/// the first 500 characters of the article body, truncated at a word
/// boundary.
fn fallback_summary(body: &str) -> SummaryDraft {
    let mut snippet: String = body.chars().take(500).collect();
    if let Some(last_space) = snippet.rfind(' ') {
        snippet.truncate(last_space);
    }
    SummaryDraft {
        summary: snippet,
        key_points: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_summary_reads_well_formed_json() {
        let text = r#"{"title": "T", "summary": "A short summary.", "key_points": ["a", "b"]}"#;
        let draft = parse_summary(text).unwrap();
        assert_eq!(draft.summary, "A short summary.");
        assert_eq!(draft.key_points.len(), 2);
    }

    #[test]
    fn parse_summary_extracts_json_from_surrounding_prose() {
        let text = "Here is the summary:\n{\"summary\": \"Concise.\", \"key_points\": []}\nDone.";
        let draft = parse_summary(text).unwrap();
        assert_eq!(draft.summary, "Concise.");
    }

    #[test]
    fn fallback_summary_truncates_at_word_boundary() {
        let body = "word ".repeat(200);
        let draft = fallback_summary(&body);
        assert!(draft.summary.len() <= 500);
        assert!(!draft.summary.ends_with("wor"));
    }

    #[test]
    fn extract_host_strips_scheme_and_path() {
        assert_eq!(extract_host("https://example.com/a/b?x=1"), "example.com");
        assert_eq!(extract_host("http://user@sub.example.com:8080/path"), "sub.example.com:8080");
    }

    #[test]
    fn article_id_matches_domain_helper() {
        let article = Article::new("https://example.com/x", "T".into(), "body text here".into(), "en".into(), "example.com".into());
        assert_eq!(article.id, article_id_for_url("https://example.com/x"));
        assert_eq!(article.word_count, 3);
    }
}
