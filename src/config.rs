//! Layered configuration: defaults, then an optional TOML/YAML/JSON file,
//! then environment variables, following the teacher's `from_file`/
//! `validate`/section-defaults pattern.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::AppError;

/// Root configuration, composed of one section per ambient concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmSectionConfig,
    pub embedding: EmbeddingSectionConfig,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub http: HttpConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// LLM orchestrator defaults and provider credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSectionConfig {
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub google_api_key: Option<String>,
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub global_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub global_max_retries: u32,
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

impl Default for LlmSectionConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            anthropic_api_key: None,
            google_api_key: None,
            default_provider: default_provider(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            global_timeout_secs: default_timeout_secs(),
            global_max_retries: default_max_retries(),
        }
    }
}

/// Embedding orchestrator defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSectionConfig {
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    #[serde(default = "default_embedding_provider")]
    pub default_provider: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_dimension() -> usize {
    1536
}
fn default_embedding_provider() -> String {
    "openai".to_string()
}

impl Default for EmbeddingSectionConfig {
    fn default() -> Self {
        Self {
            dimension: default_embedding_dimension(),
            default_provider: default_embedding_provider(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Data store (vector store + repository) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default)]
    pub persistent: bool,
}

fn default_database_url() -> String {
    "sqlite://content_pipeline.db".to_string()
}
fn default_pool_size() -> u32 {
    5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            pool_size: default_pool_size(),
            persistent: true,
        }
    }
}

/// Cache section: enable/disable, TTL, connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default)]
    pub database_url: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_cache_ttl_secs() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            default_ttl_secs: default_cache_ttl_secs(),
            database_url: None,
        }
    }
}

/// HTTP surface: bind address, CORS, API prefix, and the default
/// in-process API key table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default)]
    pub api_keys: HashMap<String, Vec<String>>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
            api_prefix: default_api_prefix(),
            api_keys: HashMap::new(),
        }
    }
}

/// Per-category requests-per-minute limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub read_per_min: u32,
    pub write_per_min: u32,
    pub generation_per_min: u32,
    pub search_per_min: u32,
    pub health_per_min: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            read_per_min: 100,
            write_per_min: 30,
            generation_per_min: 10,
            search_per_min: 20,
            health_per_min: 1000,
        }
    }
}

/// Pipeline crawl/chunk defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_crawl_timeout_secs")]
    pub crawl_timeout_secs: u64,
}

fn default_max_body_bytes() -> usize {
    5 * 1024 * 1024
}
fn default_crawl_timeout_secs() -> u64 {
    15
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
            crawl_timeout_secs: default_crawl_timeout_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmSectionConfig::default(),
            embedding: EmbeddingSectionConfig::default(),
            store: StoreConfig::default(),
            cache: CacheConfig::default(),
            http: HttpConfig::default(),
            rate_limit: RateLimitConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load defaults, optionally layer a config file, then layer
    /// environment variables (`APP__SECTION__FIELD`-style via the `config`
    /// crate, plus the handful of plain names named in the external
    /// interfaces section).
    pub fn load(file_path: Option<&str>) -> Result<Self, AppError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).map_err(|e| {
                AppError::Config(format!("failed to seed config defaults: {e}"))
            })?);

        if let Some(path) = file_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        );

        let mut cfg: AppConfig = builder
            .build()
            .map_err(|e| AppError::Config(format!("failed to build config: {e}")))?
            .try_deserialize()
            .map_err(|e| AppError::Config(format!("failed to deserialize config: {e}")))?;

        cfg.apply_well_known_env_vars();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply the specific env var names called out in the external
    /// interfaces section, which don't follow the `APP__SECTION__FIELD`
    /// convention used for everything else.
    fn apply_well_known_env_vars(&mut self) {
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            self.llm.openai_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("ANTHROPIC_API_KEY") {
            self.llm.anthropic_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("GOOGLE_API_KEY").or_else(|_| std::env::var("GEMINI_API_KEY")) {
            self.llm.google_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("LLM_DEFAULT_PROVIDER") {
            self.llm.default_provider = v;
        }
        if let Ok(v) = std::env::var("LLM_DEFAULT_TEMPERATURE").ok().and_then(|s| s.parse().ok()) {
            self.llm.default_temperature = v;
        }
        if let Ok(v) = std::env::var("LLM_DEFAULT_MAX_TOKENS").ok().and_then(|s| s.parse().ok()) {
            self.llm.default_max_tokens = v;
        }
        if let Ok(v) = std::env::var("LLM_GLOBAL_TIMEOUT").ok().and_then(|s| s.parse().ok()) {
            self.llm.global_timeout_secs = v;
        }
        if let Ok(v) = std::env::var("LLM_GLOBAL_MAX_RETRIES").ok().and_then(|s| s.parse().ok()) {
            self.llm.global_max_retries = v;
        }
        if let Ok(v) = std::env::var("ENABLE_CACHE").ok().and_then(|s| s.parse().ok()) {
            self.cache.enabled = v;
        }
        if let Ok(keys) = std::env::var("API_KEYS") {
            self.http.api_keys = parse_api_keys(&keys);
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.embedding.dimension == 0 {
            return Err(AppError::Config("embedding dimension must be greater than 0".into()));
        }
        if !(0.0..=2.0).contains(&self.llm.default_temperature) {
            return Err(AppError::Config("default temperature must be in [0, 2]".into()));
        }
        if self.http.port == 0 {
            return Err(AppError::Config("http port must be nonzero".into()));
        }
        if self.store.database_url.is_empty() {
            return Err(AppError::Config("database_url cannot be empty".into()));
        }
        Ok(())
    }
}

/// Parse `key1:scope1,scope2;key2:scope1` into a key -> scopes map.
fn parse_api_keys(raw: &str) -> HashMap<String, Vec<String>> {
    let mut out = HashMap::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if let Some((key, scopes)) = entry.split_once(':') {
            let scopes = scopes.split('+').map(str::to_string).collect();
            out.insert(key.to_string(), scopes);
        } else {
            out.insert(entry.to_string(), vec!["read".to_string()]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_dimension_fails_validation() {
        let mut cfg = AppConfig::default();
        cfg.embedding.dimension = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn out_of_range_temperature_fails_validation() {
        let mut cfg = AppConfig::default();
        cfg.llm.default_temperature = 3.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_api_keys_with_multiple_scopes() {
        let parsed = parse_api_keys("abc:read+write,def:admin");
        assert_eq!(parsed.get("abc").unwrap(), &vec!["read".to_string(), "write".to_string()]);
        assert_eq!(parsed.get("def").unwrap(), &vec!["admin".to_string()]);
    }

    #[test]
    fn bare_key_defaults_to_read_scope() {
        let parsed = parse_api_keys("onlykey");
        assert_eq!(parsed.get("onlykey").unwrap(), &vec!["read".to_string()]);
    }
}
