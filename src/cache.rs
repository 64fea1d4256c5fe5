//! Generic opaque key/value cache with TTL and prefix invalidation,
//! generalized from the teacher's LLM-response-keyed SQLite cache. Keys
//! are namespaced with a leading `namespace:` segment (e.g.
//! `llm:openai:<hash>`, `embedding:<hash>`) so a single table backs every
//! cacheable concern in the pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use tracing::debug;

use crate::error::AppError;

/// Cache behavior shared by the SQLite-backed and no-op implementations.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), AppError>;
    async fn delete(&self, key: &str) -> Result<(), AppError>;
    /// Delete every key starting with `prefix` (realized as `LIKE 'prefix%'`
    /// for the SQLite backend).
    async fn delete_pattern(&self, prefix: &str) -> Result<usize, AppError>;
}

/// Deterministic cache key from a namespace and a set of hashable parts.
/// Used the same way for LLM calls, embedding calls, or any other
/// memoizable operation.
pub fn compute_key(namespace: &str, parts: &[&str]) -> String {
    let mut hasher = DefaultHasher::new();
    for part in parts {
        part.hash(&mut hasher);
    }
    format!("{namespace}:{:x}", hasher.finish())
}

/// SQLite-backed cache. Enforces a global entry cap with LRU eviction and
/// per-entry TTL expiry, mirroring the teacher's `LlmCache`.
pub struct SqliteCache {
    pool: SqlitePool,
    max_entries: usize,
}

impl SqliteCache {
    pub async fn new(database_url: &str, max_entries: usize) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::Config(format!("invalid cache database url: {e}")))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_accessed TEXT NOT NULL,
                ttl_secs INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_last_accessed ON cache_entries(last_accessed)")
            .execute(&pool)
            .await?;

        Ok(Self { pool, max_entries })
    }

    async fn enforce_size_limit(&self) -> Result<(), AppError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;

        if count > self.max_entries as i64 {
            let to_remove = count - self.max_entries as i64;
            sqlx::query(
                r#"
                DELETE FROM cache_entries
                WHERE key IN (
                    SELECT key FROM cache_entries ORDER BY last_accessed ASC LIMIT ?
                )
                "#,
            )
            .bind(to_remove)
            .execute(&self.pool)
            .await?;
            debug!("evicted {} cache entries (LRU)", to_remove);
        }
        Ok(())
    }
}

#[async_trait]
impl Cache for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let row = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT value, created_at, ttl_secs FROM cache_entries WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some((value, created_at_str, ttl_secs)) = row else {
            return Ok(None);
        };

        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        if Utc::now().signed_duration_since(created_at) > Duration::seconds(ttl_secs) {
            self.delete(key).await?;
            return Ok(None);
        }

        sqlx::query("UPDATE cache_entries SET last_accessed = ? WHERE key = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), AppError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO cache_entries (key, value, created_at, last_accessed, ttl_secs)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(&now)
        .bind(&now)
        .bind(ttl_secs as i64)
        .execute(&self.pool)
        .await?;

        self.enforce_size_limit().await
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_pattern(&self, prefix: &str) -> Result<usize, AppError> {
        let like_pattern = format!("{prefix}%");
        let result = sqlx::query("DELETE FROM cache_entries WHERE key LIKE ?")
            .bind(like_pattern)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

/// No-op cache used when `cache.enabled = false`; every operation
/// succeeds trivially and nothing is ever retained.
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, AppError> {
        Ok(None)
    }
    async fn set(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<(), AppError> {
        Ok(())
    }
    async fn delete(&self, _key: &str) -> Result<(), AppError> {
        Ok(())
    }
    async fn delete_pattern(&self, _prefix: &str) -> Result<usize, AppError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_key_is_deterministic_and_namespaced() {
        let a = compute_key("llm", &["hello", "gpt-4"]);
        let b = compute_key("llm", &["hello", "gpt-4"]);
        let c = compute_key("llm", &["different", "gpt-4"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("llm:"));
    }

    #[tokio::test]
    async fn sqlite_cache_roundtrips_and_expires() {
        let cache = SqliteCache::new("sqlite::memory:", 10).await.unwrap();
        assert!(cache.get("k1").await.unwrap().is_none());

        cache.set("k1", "value1", 3600).await.unwrap();
        assert_eq!(cache.get("k1").await.unwrap(), Some("value1".to_string()));

        cache.set("k2", "value2", 0).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(cache.get("k2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_cache_delete_pattern_removes_matching_prefix() {
        let cache = SqliteCache::new("sqlite::memory:", 10).await.unwrap();
        cache.set("llm:a", "1", 3600).await.unwrap();
        cache.set("llm:b", "2", 3600).await.unwrap();
        cache.set("embedding:c", "3", 3600).await.unwrap();

        let removed = cache.delete_pattern("llm:").await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get("llm:a").await.unwrap().is_none());
        assert!(cache.get("embedding:c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn noop_cache_never_retains_anything() {
        let cache = NoopCache;
        cache.set("k", "v", 3600).await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
        assert_eq!(cache.delete_pattern("k").await.unwrap(), 0);
    }
}
