//! In-memory vector store: the correctness reference backend.

use crate::error::AppError;
use crate::vector_store::filter::{matches, MetadataFilter};
use crate::vector_store::{check_dimension, ScoredDocument, VectorDocument, VectorStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Default)]
struct State {
    documents: HashMap<String, VectorDocument>,
    dimension: Option<usize>,
}

pub struct InMemoryVectorStore {
    state: RwLock<State>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    fn candidate_ids(state: &State, filter: Option<&MetadataFilter>) -> Vec<String> {
        state
            .documents
            .values()
            .filter(|doc| filter.map(|f| matches(&doc.metadata, f)).unwrap_or(true))
            .map(|doc| doc.id.clone())
            .collect()
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn store_name(&self) -> &str {
        "in_memory"
    }

    fn is_persistent(&self) -> bool {
        false
    }

    async fn add(&self, document: VectorDocument) -> Result<String, AppError> {
        let mut state = self.state.write().await;
        check_dimension(state.dimension, document.embedding.len())?;
        if state.dimension.is_none() {
            state.dimension = Some(document.embedding.len());
        }
        if state.documents.contains_key(&document.id) {
            warn!(id = %document.id, "overwriting existing document in in-memory store");
        }
        let id = document.id.clone();
        state.documents.insert(id.clone(), document);
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<VectorDocument>, AppError> {
        Ok(self.state.read().await.documents.get(id).cloned())
    }

    async fn update(&self, id: &str, document: VectorDocument) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        if !state.documents.contains_key(id) {
            return Ok(false);
        }
        check_dimension(state.dimension, document.embedding.len())?;
        let mut document = document;
        document.id = id.to_string();
        state.documents.insert(id.to_string(), document);
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        Ok(self.state.write().await.documents.remove(id).is_some())
    }

    async fn count(&self, filter: Option<&MetadataFilter>) -> Result<usize, AppError> {
        let state = self.state.read().await;
        Ok(Self::candidate_ids(&state, filter).len())
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
        threshold: Option<f32>,
    ) -> Result<Vec<ScoredDocument>, AppError> {
        let state = self.state.read().await;
        check_dimension(state.dimension, query.len())?;

        let threshold = threshold.unwrap_or(0.0);
        let mut scored: Vec<ScoredDocument> = Self::candidate_ids(&state, filter)
            .into_iter()
            .filter_map(|id| state.documents.get(&id))
            .map(|doc| -> Result<ScoredDocument, AppError> {
                Ok(ScoredDocument {
                    document: doc.clone(),
                    similarity: crate::similarity::cosine(query, &doc.embedding)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|scored| scored.similarity >= threshold)
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document.created_at.cmp(&b.document.created_at))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn filter_only(&self, filter: &MetadataFilter) -> Result<Vec<VectorDocument>, AppError> {
        let state = self.state.read().await;
        Ok(Self::candidate_ids(&state, Some(filter))
            .into_iter()
            .filter_map(|id| state.documents.get(&id).cloned())
            .collect())
    }

    async fn clear(&self) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state.documents.clear();
        state.dimension = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VectorStoreError;
    use crate::vector_store::FilterValue;

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let store = InMemoryVectorStore::new();
        let doc = VectorDocument::new("1", "hello", vec![1.0, 0.0]);
        store.add(doc).await.unwrap();
        let fetched = store.get("1").await.unwrap().unwrap();
        assert_eq!(fetched.content, "hello");
    }

    #[tokio::test]
    async fn second_add_with_mismatched_dimension_fails() {
        let store = InMemoryVectorStore::new();
        store.add(VectorDocument::new("1", "a", vec![1.0, 0.0])).await.unwrap();
        let err = store.add(VectorDocument::new("2", "b", vec![1.0])).await.unwrap_err();
        assert!(matches!(err, AppError::VectorStore(VectorStoreError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn similarity_search_ranks_by_cosine_descending() {
        let store = InMemoryVectorStore::new();
        store.add(VectorDocument::new("close", "a", vec![1.0, 0.0])).await.unwrap();
        store.add(VectorDocument::new("far", "b", vec![0.0, 1.0])).await.unwrap();

        let results = store.similarity_search(&[1.0, 0.0], 10, None, None).await.unwrap();
        assert_eq!(results[0].document.id, "close");
        assert_eq!(results[1].document.id, "far");
    }

    #[tokio::test]
    async fn similarity_search_respects_metadata_filter() {
        let store = InMemoryVectorStore::new();
        let mut metadata = HashMap::new();
        metadata.insert("language".to_string(), FilterValue::Text("en".to_string()));
        store
            .add(VectorDocument::new("en-doc", "a", vec![1.0, 0.0]).with_metadata(metadata))
            .await
            .unwrap();
        store.add(VectorDocument::new("other", "b", vec![1.0, 0.0])).await.unwrap();

        let mut filter = MetadataFilter::new();
        filter.insert("language".to_string(), FilterValue::Text("en".to_string()));
        let results = store.similarity_search(&[1.0, 0.0], 10, Some(&filter), None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, "en-doc");
    }

    #[tokio::test]
    async fn re_adding_same_id_overwrites() {
        let store = InMemoryVectorStore::new();
        store.add(VectorDocument::new("1", "first", vec![1.0])).await.unwrap();
        store.add(VectorDocument::new("1", "second", vec![1.0])).await.unwrap();
        let fetched = store.get("1").await.unwrap().unwrap();
        assert_eq!(fetched.content, "second");
    }
}
