//! Vector store capability set: `VectorDocument`/metadata-filter types, the
//! `VectorStore` trait, and the in-memory and SQLite-backed implementations.

pub mod filter;
pub mod in_memory;
pub mod sqlite;

use crate::error::{AppError, VectorStoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use filter::{FilterValue, MetadataFilter};
pub use in_memory::InMemoryVectorStore;
pub use sqlite::SqliteVectorStore;

/// A stored document: content, its embedding, and arbitrary metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDocument {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, FilterValue>,
    pub created_at: DateTime<Utc>,
}

impl VectorDocument {
    pub fn new(id: impl Into<String>, content: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            embedding,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, FilterValue>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: VectorDocument,
    pub similarity: f32,
}

/// Vector store capability set. A backend fixes its embedding dimension from
/// the first document added; later dimension mismatches are rejected.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn store_name(&self) -> &str;
    fn is_persistent(&self) -> bool;

    async fn add(&self, document: VectorDocument) -> Result<String, AppError>;

    async fn add_batch(&self, documents: Vec<VectorDocument>) -> Result<Vec<String>, AppError> {
        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            ids.push(self.add(document).await?);
        }
        Ok(ids)
    }

    async fn get(&self, id: &str) -> Result<Option<VectorDocument>, AppError>;
    async fn update(&self, id: &str, document: VectorDocument) -> Result<bool, AppError>;
    async fn delete(&self, id: &str) -> Result<bool, AppError>;
    async fn count(&self, filter: Option<&MetadataFilter>) -> Result<usize, AppError>;

    /// Candidate set via `filter` (if any), cosine similarity against each,
    /// filtered by `threshold`, returned top-k descending. Ties broken by
    /// older `created_at` first.
    async fn similarity_search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
        threshold: Option<f32>,
    ) -> Result<Vec<ScoredDocument>, AppError>;

    /// Metadata-only lookup with no similarity ranking — used for
    /// URL-keyed retrieval instead of threading a zero vector through
    /// `similarity_search`.
    async fn filter_only(&self, filter: &MetadataFilter) -> Result<Vec<VectorDocument>, AppError>;

    async fn clear(&self) -> Result<(), AppError>;

    async fn health_check(&self) -> bool {
        self.count(None).await.is_ok()
    }
}

pub(crate) fn check_dimension(expected: Option<usize>, actual: usize) -> Result<(), AppError> {
    if let Some(expected) = expected {
        if expected != actual {
            return Err(VectorStoreError::DimensionMismatch { expected, actual }.into());
        }
    }
    Ok(())
}

