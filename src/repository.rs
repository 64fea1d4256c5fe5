//! Persistence for the domain model: `ArticleRepository` and
//! `KnowledgeRepository` (summaries + Q&A pairs), backed by sqlx/SQLite with
//! idempotent `CREATE TABLE IF NOT EXISTS` migrations run on connect.

use crate::domain::{Article, QAPair, Summary};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row};

fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes().to_vec()).collect()
}

fn deserialize_embedding(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

fn storage_err(e: impl std::fmt::Display) -> AppError {
    crate::error::VectorStoreError::StorageFailed(e.to_string()).into()
}

#[async_trait]
pub trait ArticleRepository: Send + Sync {
    async fn save(&self, article: &Article) -> Result<(), AppError>;
    async fn get_by_id(&self, id: &str) -> Result<Option<Article>, AppError>;
    async fn get_by_url(&self, url: &str) -> Result<Option<Article>, AppError>;
    async fn delete(&self, id: &str) -> Result<bool, AppError>;
}

#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    async fn save_summary(&self, summary: &Summary) -> Result<(), AppError>;
    async fn get_summary(&self, article_id: &str) -> Result<Option<Summary>, AppError>;
    async fn save_qa_pairs(&self, pairs: &[QAPair]) -> Result<(), AppError>;
    async fn get_qa_pairs_by_article(&self, article_id: &str) -> Result<Vec<QAPair>, AppError>;
    async fn get_qa_pair(&self, id: &str) -> Result<Option<QAPair>, AppError>;
    async fn increment_click_count(&self, id: &str) -> Result<u64, AppError>;
    async fn delete_for_article(&self, article_id: &str) -> Result<(), AppError>;
    /// All summaries in the store, for brute-force similarity rescoring
    /// against backends (like SQLite) with no native ANN index.
    async fn list_all_summaries(&self) -> Result<Vec<Summary>, AppError>;
}

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        if let Some(db_path) = database_url.strip_prefix("sqlite:") {
            let db_path = db_path.split('?').next().unwrap_or(db_path);
            if let Some(parent) = std::path::Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(storage_err)?;
                }
            }
        }
        let database_url = if database_url.contains('?') {
            database_url.to_string()
        } else {
            format!("{database_url}?mode=rwc")
        };

        let pool = SqlitePool::connect(&database_url).await.map_err(storage_err)?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                language TEXT NOT NULL,
                word_count INTEGER NOT NULL,
                domain TEXT NOT NULL,
                crawled_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS summaries (
                article_id TEXT PRIMARY KEY REFERENCES articles(id),
                summary TEXT NOT NULL,
                key_points TEXT NOT NULL DEFAULT '[]',
                embedding BLOB NOT NULL,
                embedding_model TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS qa_pairs (
                id TEXT PRIMARY KEY,
                article_id TEXT NOT NULL REFERENCES articles(id),
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                keyword_anchor TEXT,
                probability REAL NOT NULL,
                ordering_index INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                click_count INTEGER NOT NULL DEFAULT 0,
                last_clicked_at TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_qa_pairs_article ON qa_pairs(article_id, ordering_index)")
            .execute(pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    Ok(DateTime::parse_from_rfc3339(s).map_err(storage_err)?.with_timezone(&Utc))
}

#[async_trait]
impl ArticleRepository for SqliteRepository {
    async fn save(&self, article: &Article) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO articles (id, url, title, body, language, word_count, domain, crawled_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title, body = excluded.body, language = excluded.language,
                word_count = excluded.word_count, domain = excluded.domain
            "#,
        )
        .bind(&article.id)
        .bind(&article.url)
        .bind(&article.title)
        .bind(&article.body)
        .bind(&article.language)
        .bind(article.word_count as i64)
        .bind(&article.domain)
        .bind(article.crawled_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Article>, AppError> {
        let row = sqlx::query("SELECT * FROM articles WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(row_to_article).transpose()
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<Article>, AppError> {
        let row = sqlx::query("SELECT * FROM articles WHERE url = ?1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(row_to_article).transpose()
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        sqlx::query("DELETE FROM summaries WHERE article_id = ?1").bind(id).execute(&self.pool).await.map_err(storage_err)?;
        sqlx::query("DELETE FROM qa_pairs WHERE article_id = ?1").bind(id).execute(&self.pool).await.map_err(storage_err)?;
        let result = sqlx::query("DELETE FROM articles WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_article(row: sqlx::sqlite::SqliteRow) -> Result<Article, AppError> {
    Ok(Article {
        id: row.get("id"),
        url: row.get("url"),
        title: row.get("title"),
        body: row.get("body"),
        language: row.get("language"),
        word_count: row.get::<i64, _>("word_count") as usize,
        domain: row.get("domain"),
        crawled_at: parse_datetime(&row.get::<String, _>("crawled_at"))?,
    })
}

#[async_trait]
impl KnowledgeRepository for SqliteRepository {
    async fn save_summary(&self, summary: &Summary) -> Result<(), AppError> {
        let key_points = serde_json::to_string(&summary.key_points).map_err(storage_err)?;
        sqlx::query(
            r#"
            INSERT INTO summaries (article_id, summary, key_points, embedding, embedding_model, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(article_id) DO UPDATE SET
                summary = excluded.summary, key_points = excluded.key_points,
                embedding = excluded.embedding, embedding_model = excluded.embedding_model
            "#,
        )
        .bind(&summary.article_id)
        .bind(&summary.summary)
        .bind(key_points)
        .bind(serialize_embedding(&summary.embedding))
        .bind(&summary.embedding_model)
        .bind(summary.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn get_summary(&self, article_id: &str) -> Result<Option<Summary>, AppError> {
        let row = sqlx::query("SELECT * FROM summaries WHERE article_id = ?1")
            .bind(article_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        match row {
            None => Ok(None),
            Some(row) => {
                let key_points: String = row.get("key_points");
                Ok(Some(Summary {
                    article_id: row.get("article_id"),
                    summary: row.get("summary"),
                    key_points: serde_json::from_str(&key_points).map_err(storage_err)?,
                    embedding: deserialize_embedding(&row.get::<Vec<u8>, _>("embedding")),
                    embedding_model: row.get("embedding_model"),
                    created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
                }))
            }
        }
    }

    async fn save_qa_pairs(&self, pairs: &[QAPair]) -> Result<(), AppError> {
        for pair in pairs {
            sqlx::query(
                r#"
                INSERT INTO qa_pairs
                    (id, article_id, question, answer, keyword_anchor, probability, ordering_index,
                     embedding, click_count, last_clicked_at, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(id) DO UPDATE SET
                    question = excluded.question, answer = excluded.answer,
                    keyword_anchor = excluded.keyword_anchor, probability = excluded.probability,
                    ordering_index = excluded.ordering_index, embedding = excluded.embedding
                "#,
            )
            .bind(&pair.id)
            .bind(&pair.article_id)
            .bind(&pair.question)
            .bind(&pair.answer)
            .bind(&pair.keyword_anchor)
            .bind(pair.probability)
            .bind(pair.ordering_index as i64)
            .bind(serialize_embedding(&pair.embedding))
            .bind(pair.click_count as i64)
            .bind(pair.last_clicked_at.map(|d| d.to_rfc3339()))
            .bind(pair.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        }
        Ok(())
    }

    async fn get_qa_pairs_by_article(&self, article_id: &str) -> Result<Vec<QAPair>, AppError> {
        let rows = sqlx::query("SELECT * FROM qa_pairs WHERE article_id = ?1 ORDER BY ordering_index ASC")
            .bind(article_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.into_iter().map(row_to_qa_pair).collect()
    }

    async fn get_qa_pair(&self, id: &str) -> Result<Option<QAPair>, AppError> {
        let row = sqlx::query("SELECT * FROM qa_pairs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(row_to_qa_pair).transpose()
    }

    async fn increment_click_count(&self, id: &str) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE qa_pairs SET click_count = click_count + 1, last_clicked_at = ?1 WHERE id = ?2",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("qa pair {id}")));
        }
        let (count,): (i64,) = sqlx::query_as("SELECT click_count FROM qa_pairs WHERE id = ?1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(count as u64)
    }

    async fn delete_for_article(&self, article_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM summaries WHERE article_id = ?1")
            .bind(article_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        sqlx::query("DELETE FROM qa_pairs WHERE article_id = ?1")
            .bind(article_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn list_all_summaries(&self) -> Result<Vec<Summary>, AppError> {
        let rows = sqlx::query("SELECT * FROM summaries")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.into_iter()
            .map(|row| {
                let key_points: String = row.get("key_points");
                Ok(Summary {
                    article_id: row.get("article_id"),
                    summary: row.get("summary"),
                    key_points: serde_json::from_str(&key_points).map_err(storage_err)?,
                    embedding: deserialize_embedding(&row.get::<Vec<u8>, _>("embedding")),
                    embedding_model: row.get("embedding_model"),
                    created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
                })
            })
            .collect()
    }
}

fn row_to_qa_pair(row: sqlx::sqlite::SqliteRow) -> Result<QAPair, AppError> {
    let last_clicked_at: Option<String> = row.get("last_clicked_at");
    Ok(QAPair {
        id: row.get("id"),
        article_id: row.get("article_id"),
        question: row.get("question"),
        answer: row.get("answer"),
        keyword_anchor: row.get("keyword_anchor"),
        probability: row.get("probability"),
        ordering_index: row.get::<i64, _>("ordering_index") as u32,
        embedding: deserialize_embedding(&row.get::<Vec<u8>, _>("embedding")),
        click_count: row.get::<i64, _>("click_count") as u64,
        last_clicked_at: last_clicked_at.map(|s| parse_datetime(&s)).transpose()?,
        created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
    })
}
