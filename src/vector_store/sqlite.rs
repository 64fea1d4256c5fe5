//! SQLite-backed vector store. Persists across restarts; computes
//! similarity in-process since SQLite has no native ANN index.

use crate::error::{AppError, VectorStoreError};
use crate::vector_store::filter::{matches, MetadataFilter};
use crate::vector_store::{check_dimension, FilterValue, ScoredDocument, VectorDocument, VectorStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::warn;

pub struct SqliteVectorStore {
    pool: SqlitePool,
    dimension: Mutex<Option<usize>>,
}

impl SqliteVectorStore {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        if let Some(db_path) = database_url.strip_prefix("sqlite:") {
            let db_path = db_path.split('?').next().unwrap_or(db_path);
            if let Some(parent) = std::path::Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;
                }
            }
        }

        let database_url = if database_url.contains('?') {
            database_url.to_string()
        } else {
            format!("{database_url}?mode=rwc")
        };

        let pool = SqlitePool::connect(&database_url)
            .await
            .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vector_documents (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vector_documents_created_at ON vector_documents(created_at)")
            .execute(&pool)
            .await
            .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;

        let dimension = sqlx::query("SELECT embedding FROM vector_documents LIMIT 1")
            .fetch_optional(&pool)
            .await
            .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                deserialize_embedding(&blob).len()
            });

        Ok(Self {
            pool,
            dimension: Mutex::new(dimension),
        })
    }

    async fn load_all(&self) -> Result<Vec<VectorDocument>, AppError> {
        let rows = sqlx::query("SELECT id, content, embedding, metadata, created_at FROM vector_documents")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;

        rows.into_iter().map(row_to_document).collect()
    }
}

fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes().to_vec()).collect()
}

fn deserialize_embedding(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn row_to_document(row: sqlx::sqlite::SqliteRow) -> Result<VectorDocument, AppError> {
    let id: String = row.get("id");
    let content: String = row.get("content");
    let embedding_blob: Vec<u8> = row.get("embedding");
    let metadata_json: String = row.get("metadata");
    let created_at: String = row.get("created_at");

    let metadata: HashMap<String, FilterValue> =
        serde_json::from_str(&metadata_json).map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?
        .with_timezone(&Utc);

    Ok(VectorDocument {
        id,
        content,
        embedding: deserialize_embedding(&embedding_blob),
        metadata,
        created_at,
    })
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn store_name(&self) -> &str {
        "sqlite"
    }

    fn is_persistent(&self) -> bool {
        true
    }

    async fn add(&self, document: VectorDocument) -> Result<String, AppError> {
        let mut dimension = self.dimension.lock().await;
        check_dimension(*dimension, document.embedding.len())?;
        if dimension.is_none() {
            *dimension = Some(document.embedding.len());
        }
        drop(dimension);

        let existing = sqlx::query("SELECT 1 FROM vector_documents WHERE id = ?1")
            .bind(&document.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;
        if existing.is_some() {
            warn!(id = %document.id, "overwriting existing document in sqlite vector store");
        }

        let metadata_json =
            serde_json::to_string(&document.metadata).map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO vector_documents (id, content, embedding, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                embedding = excluded.embedding,
                metadata = excluded.metadata
            "#,
        )
        .bind(&document.id)
        .bind(&document.content)
        .bind(serialize_embedding(&document.embedding))
        .bind(&metadata_json)
        .bind(document.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;

        Ok(document.id)
    }

    async fn get(&self, id: &str) -> Result<Option<VectorDocument>, AppError> {
        let row = sqlx::query("SELECT id, content, embedding, metadata, created_at FROM vector_documents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;
        row.map(row_to_document).transpose()
    }

    async fn update(&self, id: &str, mut document: VectorDocument) -> Result<bool, AppError> {
        if self.get(id).await?.is_none() {
            return Ok(false);
        }
        document.id = id.to_string();
        self.add(document).await?;
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM vector_documents WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, filter: Option<&MetadataFilter>) -> Result<usize, AppError> {
        let documents = self.load_all().await?;
        Ok(documents
            .iter()
            .filter(|doc| filter.map(|f| matches(&doc.metadata, f)).unwrap_or(true))
            .count())
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
        threshold: Option<f32>,
    ) -> Result<Vec<ScoredDocument>, AppError> {
        let dimension = *self.dimension.lock().await;
        check_dimension(dimension, query.len())?;

        let threshold = threshold.unwrap_or(0.0);
        let mut scored: Vec<ScoredDocument> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|doc| filter.map(|f| matches(&doc.metadata, f)).unwrap_or(true))
            .map(|doc| -> Result<ScoredDocument, AppError> {
                let similarity = crate::similarity::cosine(query, &doc.embedding)?;
                Ok(ScoredDocument { document: doc, similarity })
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
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|doc| matches(&doc.metadata, filter))
            .collect())
    }

    async fn clear(&self) -> Result<(), AppError> {
        sqlx::query("DELETE FROM vector_documents")
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::StorageFailed(e.to_string()))?;
        *self.dimension.lock().await = None;
        Ok(())
    }
}
