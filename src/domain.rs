//! Domain model shared by the pipeline, repository, and search service:
//! `Article`, `Summary`, `QAPair`, and the `ProcessingResult` returned to
//! callers of the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

/// Stable id derived from a canonical URL (`sha256(url)`, hex-encoded).
pub fn article_id_for_url(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub url: String,
    pub title: String,
    pub body: String,
    pub language: String,
    pub word_count: usize,
    pub domain: String,
    pub crawled_at: DateTime<Utc>,
}

impl Article {
    pub fn new(url: &str, title: String, body: String, language: String, domain: String) -> Self {
        Self {
            id: article_id_for_url(url),
            url: url.to_string(),
            title,
            word_count: body.split_whitespace().count(),
            body,
            language,
            domain,
            crawled_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Summary {
    pub article_id: String,
    pub summary: String,
    pub key_points: Vec<String>,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QAPair {
    pub id: String,
    pub article_id: String,
    pub question: String,
    pub answer: String,
    pub keyword_anchor: Option<String>,
    pub probability: f32,
    pub ordering_index: u32,
    pub embedding: Vec<f32>,
    pub click_count: u64,
    pub last_clicked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of [`crate::pipeline::Pipeline::process`]. `summary` is always the
/// committed, persisted summary; `warnings` lists any non-fatal degradation
/// (a dropped question embedding, a fallback Q&A set) that happened along
/// the way but didn't stop the summary from being saved.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProcessingResult {
    pub article_id: String,
    pub url: String,
    pub summary: Summary,
    pub questions: Vec<QAPair>,
    pub elapsed_ms: u64,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SimilarArticle {
    pub article_id: String,
    pub title: String,
    pub url: String,
    pub similarity_score: f32,
    pub summary_snippet: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_id_is_stable_for_the_same_url() {
        assert_eq!(article_id_for_url("https://example.com/a"), article_id_for_url("https://example.com/a"));
        assert_ne!(article_id_for_url("https://example.com/a"), article_id_for_url("https://example.com/b"));
    }
}
