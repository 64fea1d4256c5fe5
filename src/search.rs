//! Search and indexing surface: URL-scoped Q&A lookup, question-to-article
//! similarity search with publisher-domain scoping, and click tracking.
//! Grounded on the manual cosine-similarity fallback in
//! `similar_blogs_service.py`'s `_manual_similarity_search`/
//! `_fast_cosine_similarity` (no ANN index backend here either, so the
//! same brute-force rescoring shape applies).

use crate::cache::Cache;
use crate::domain::{QAPair, SimilarArticle};
use crate::error::AppError;
use crate::orchestrator::EmbeddingOrchestrator;
use crate::repository::{ArticleRepository, KnowledgeRepository};
use crate::similarity::cosine;
use regex::Regex;
use std::sync::Arc;
use tracing::warn;

const SNIPPET_MAX_CHARS: usize = 150;
const QUESTIONS_CACHE_TTL_SECS: u64 = 3600;
const SIMILAR_CACHE_TTL_SECS: u64 = 7200;

pub struct SearchService {
    articles: Arc<dyn ArticleRepository>,
    knowledge: Arc<dyn KnowledgeRepository>,
    embeddings: Arc<EmbeddingOrchestrator>,
    cache: Arc<dyn Cache>,
}

impl SearchService {
    pub fn new(
        articles: Arc<dyn ArticleRepository>,
        knowledge: Arc<dyn KnowledgeRepository>,
        embeddings: Arc<EmbeddingOrchestrator>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self {
            articles,
            knowledge,
            embeddings,
            cache,
        }
    }

    /// Q&A pairs for an article's URL, ordered by `ordering_index` ascending
    /// and truncated to `limit`. Fronted by the cache at `questions:<url>`.
    pub async fn get_questions_by_url(&self, url: &str, limit: usize) -> Result<Vec<QAPair>, AppError> {
        let cache_key = format!("questions:{url}");
        if let Some(cached) = self.cache_get::<Vec<QAPair>>(&cache_key).await {
            let mut pairs = cached;
            pairs.truncate(limit);
            return Ok(pairs);
        }

        let article = self
            .articles
            .get_by_url(url)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no article indexed for url {url}")))?;
        let pairs = self.knowledge.get_qa_pairs_by_article(&article.id).await?;

        self.cache_set(&cache_key, &pairs, QUESTIONS_CACHE_TTL_SECS).await;

        let mut pairs = pairs;
        pairs.truncate(limit);
        Ok(pairs)
    }

    async fn cache_get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(key, error = %err, "discarding unparseable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key, error = %err, "cache read failed, falling back to source");
                None
            }
        }
    }

    async fn cache_set<T: serde::Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        let Ok(serialized) = serde_json::to_string(value) else {
            return;
        };
        if let Err(err) = self.cache.set(key, &serialized, ttl_secs).await {
            warn!(key, error = %err, "failed to populate cache entry");
        }
    }

    /// Increments the click counter for `question_id`, returning the new
    /// count.
    pub async fn record_click(&self, question_id: &str) -> Result<u64, AppError> {
        self.knowledge.increment_click_count(question_id).await
    }

    /// Fetches a single Q&A pair by id.
    pub async fn get_qa_pair(&self, question_id: &str) -> Result<QAPair, AppError> {
        self.knowledge
            .get_qa_pair(question_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no question found for id {question_id}")))
    }

    /// Finds articles whose summary is most similar to the question+answer
    /// text of `question_id`, excluding the question's own article and
    /// optionally scoped to a publisher domain (including subdomains).
    pub async fn find_similar(
        &self,
        question_id: &str,
        limit: usize,
        domain: Option<&str>,
    ) -> Result<Vec<SimilarArticle>, AppError> {
        let cache_key = format!("similar:{question_id}:{limit}");
        if domain.is_none() {
            if let Some(cached) = self.cache_get::<Vec<SimilarArticle>>(&cache_key).await {
                return Ok(cached);
            }
        }

        let qa_pair = self
            .knowledge
            .get_qa_pair(question_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no question found for id {question_id}")))?;

        let query_embedding = if qa_pair.embedding.is_empty() {
            let text = format!("Question: {} Answer: {}", qa_pair.question, qa_pair.answer);
            self.embeddings.generate(&text, None).await?
        } else {
            qa_pair.embedding.clone()
        };

        let domain_regex = domain.map(host_scope_regex).transpose()?;

        let mut scored = Vec::new();
        for summary in self.knowledge.list_all_summaries().await? {
            if summary.article_id == qa_pair.article_id {
                continue;
            }
            if summary.embedding.len() != query_embedding.len() {
                continue;
            }

            let Some(article) = self.articles.get_by_id(&summary.article_id).await? else {
                continue;
            };

            if let Some(ref regex) = domain_regex {
                if !regex.is_match(&article.domain) {
                    continue;
                }
            }

            let similarity = cosine(&query_embedding, &summary.embedding)?;
            if similarity <= 0.0 {
                continue;
            }

            scored.push(SimilarArticle {
                article_id: article.id,
                title: article.title,
                url: article.url,
                similarity_score: similarity,
                summary_snippet: truncate_snippet(&summary.summary),
            });
        }

        scored.sort_by(|a, b| b.similarity_score.partial_cmp(&a.similarity_score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        if domain.is_none() {
            self.cache_set(&cache_key, &scored, SIMILAR_CACHE_TTL_SECS).await;
        }

        Ok(scored)
    }
}

/// Builds a case-insensitive host-match regex for `domain`, anchored so it
/// matches the bare domain or any of its subdomains (e.g. `www.`), per the
/// `(?:[a-z0-9-]+\.)?<escaped_domain>` host-scoping grammar.
fn host_scope_regex(domain: &str) -> Result<Regex, AppError> {
    let escaped = regex::escape(domain);
    let pattern = format!(r"(?i)^(?:[a-z0-9-]+\.)?{escaped}$");
    Regex::new(&pattern).map_err(|e| AppError::Validation(format!("invalid domain filter: {e}")))
}

fn truncate_snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_MAX_CHARS {
        return text.to_string();
    }
    let truncated: String = text.chars().take(SNIPPET_MAX_CHARS).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_scope_regex_matches_bare_domain_and_subdomains() {
        let re = host_scope_regex("example.test").unwrap();
        assert!(re.is_match("example.test"));
        assert!(re.is_match("www.example.test"));
        assert!(re.is_match("blog.example.test"));
        assert!(!re.is_match("example.test.evil.com"));
        assert!(!re.is_match("notexample.test"));
    }

    #[test]
    fn truncate_snippet_adds_ellipsis_only_when_truncated() {
        let short = "a short summary";
        assert_eq!(truncate_snippet(short), short);

        let long = "x".repeat(200);
        let snippet = truncate_snippet(&long);
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.chars().count(), SNIPPET_MAX_CHARS + 3);
    }
}
