use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default = "default_rate_limits")]
    pub rate_limits: HashMap<String, RateLimitConfig>,
    #[serde(default)]
    pub http_server: HttpServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            embeddings: EmbeddingsConfig::default(),
            generation: GenerationConfig::default(),
            chunking: ChunkingConfig::default(),
            index: IndexConfig::default(),
            retrieval: RetrievalConfig::default(),
            assistant: AssistantConfig::default(),
            cache: CacheConfig::default(),
            rate_limits: default_rate_limits(),
            http_server: HttpServerConfig::default(),
        }
    }
}

/// Process-level settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("kbguard.db"),
            log_level: default_log_level(),
        }
    }
}

/// Embedding capability configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub dimensions: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_external_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Chunks embedded in parallel during ingestion
    #[serde(default = "default_embed_concurrency")]
    pub concurrency: usize,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            dimensions: 1536,
            batch_size: default_batch_size(),
            timeout_secs: default_external_timeout(),
            max_retries: default_max_retries(),
            concurrency: default_embed_concurrency(),
        }
    }
}

/// Generation capability configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    pub model: String,
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Chunker configuration (sizes are in characters)
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    #[serde(default = "default_max_document_chars")]
    pub max_document_chars: usize,
    /// Keywords used as tags when a document has no usable headings
    #[serde(default)]
    pub fallback_keywords: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            max_document_chars: default_max_document_chars(),
            fallback_keywords: Vec::new(),
        }
    }
}

/// Vector index write/delete tuning
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_external_timeout")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            upsert_batch_size: default_upsert_batch_size(),
            delete_batch_size: default_delete_batch_size(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_secs: default_external_timeout(),
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub max_context_chars: usize,
    #[serde(default)]
    pub min_score: f32,
    /// Number of previous user turns folded into the query embedding
    #[serde(default)]
    pub history_turns: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            max_context_chars: 6000,
            min_score: 0.0,
            history_turns: 0,
        }
    }
}

/// Response assembly configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "default_system_preamble")]
    pub system_preamble: String,
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            system_preamble: default_system_preamble(),
            fallback_reply: default_fallback_reply(),
            history_window: default_history_window(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

/// Cache-aside configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_document_list_ttl")]
    pub document_list_ttl_secs: u64,
    #[serde(default = "default_embedding_ttl")]
    pub embedding_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            document_list_ttl_secs: default_document_list_ttl(),
            embedding_ttl_secs: default_embedding_ttl(),
        }
    }
}

/// One named rate limit: at most `limit` admissions per `window_seconds`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window_seconds: u64,
    /// Prefix of the limiter key; defaults to the configuration name
    #[serde(default)]
    pub key_prefix: Option<String>,
}

impl RateLimitConfig {
    pub fn new(limit: u32, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds,
            key_prefix: None,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_operator_key_env")]
    pub operator_key_env: String,
    #[serde(default = "default_user_key_env")]
    pub user_key_env: String,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            port: default_http_port(),
            operator_key_env: default_operator_key_env(),
            user_key_env: default_user_key_env(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

/// Names of the limiter configurations the core itself relies on.
pub const EMBEDDING_LIMIT: &str = "embedding";
pub const GENERATION_LIMIT: &str = "generation";
pub const CHATBOT_LIMIT: &str = "chatbot";

fn default_rate_limits() -> HashMap<String, RateLimitConfig> {
    let mut limits = HashMap::new();
    limits.insert(EMBEDDING_LIMIT.to_string(), RateLimitConfig::new(3000, 60));
    limits.insert(GENERATION_LIMIT.to_string(), RateLimitConfig::new(500, 60));
    limits.insert(CHATBOT_LIMIT.to_string(), RateLimitConfig::new(30, 60));
    limits
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_external_timeout() -> u64 {
    30
}

fn default_generation_timeout() -> u64 {
    60
}

fn default_max_retries() -> usize {
    3
}

fn default_embed_concurrency() -> usize {
    4
}

fn default_temperature() -> f32 {
    0.5
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_max_document_chars() -> usize {
    500_000
}

fn default_upsert_batch_size() -> usize {
    100
}

fn default_delete_batch_size() -> usize {
    1000
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8000
}

fn default_system_preamble() -> String {
    "You are the official support assistant of the platform. Answer clearly and completely, \
     step by step when the question involves a process. Only use the documentation context \
     below; if it does not cover the question, say so and suggest contacting support. \
     Do not invent information."
        .to_string()
}

fn default_fallback_reply() -> String {
    "Sorry, I'm having trouble answering right now. Please try again later or contact \
     support at support@example.com."
        .to_string()
}

fn default_history_window() -> usize {
    10
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_document_list_ttl() -> u64 {
    300
}

fn default_embedding_ttl() -> u64 {
    3600
}

fn default_http_enabled() -> bool {
    false
}

fn default_http_port() -> u16 {
    8080
}

fn default_operator_key_env() -> String {
    "KBGUARD_OPERATOR_KEY".to_string()
}

fn default_user_key_env() -> String {
    "KBGUARD_USER_KEY".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    // Default empty: set allowed_origins in config.toml for production
    vec![]
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in KBGUARD_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("KBGUARD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml_str(&config_str)?;

        std::env::var(&config.embeddings.api_key_env).with_context(|| {
            format!(
                "Environment variable {} not set. Set it in your .env file or as an environment variable with your OpenAI API key.",
                config.embeddings.api_key_env
            )
        })?;

        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("Failed to parse config.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.embeddings.dimensions == 0 {
            anyhow::bail!("embeddings.dimensions must be greater than 0");
        }

        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunking.chunk_size must be greater than 0");
        }

        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            anyhow::bail!("chunking.chunk_overlap must be less than chunking.chunk_size");
        }

        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be greater than 0");
        }

        if self.retrieval.min_score < -1.0 || self.retrieval.min_score > 1.0 {
            anyhow::bail!("retrieval.min_score must be between -1.0 and 1.0");
        }

        if self.index.upsert_batch_size == 0 || self.index.delete_batch_size == 0 {
            anyhow::bail!("index batch sizes must be greater than 0");
        }

        for name in [EMBEDDING_LIMIT, GENERATION_LIMIT, CHATBOT_LIMIT] {
            let limit = self
                .rate_limits
                .get(name)
                .with_context(|| format!("rate_limits.{} must be configured", name))?;
            if limit.window_seconds == 0 {
                anyhow::bail!("rate_limits.{}.window_seconds must be greater than 0", name);
            }
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.service.db_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    const TEST_CONFIG: &str = r#"
[service]
db_path = "./test.db"
log_level = "debug"

[embeddings]
provider = "openai"
model = "text-embedding-3-small"
api_key_env = "KBGUARD_TEST_OPENAI_KEY"
dimensions = 1536

[chunking]
chunk_size = 100
chunk_overlap = 20

[retrieval]
top_k = 6
max_context_chars = 500

[rate_limits.embedding]
limit = 100
window_seconds = 60

[rate_limits.generation]
limit = 10
window_seconds = 60

[rate_limits.chatbot]
limit = 3
window_seconds = 10
key_prefix = "chat"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml_str(TEST_CONFIG).unwrap();
        assert_eq!(config.service.log_level, "debug");
        assert_eq!(config.chunking.chunk_size, 100);
        assert_eq!(config.retrieval.top_k, 6);
        assert_eq!(config.assistant.history_window, 10);
        let chatbot = &config.rate_limits[CHATBOT_LIMIT];
        assert_eq!(chatbot.limit, 3);
        assert_eq!(chatbot.key_prefix.as_deref(), Some("chat"));
    }

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.chunking.chunk_size, 1000);
        assert!(config.rate_limits.contains_key(EMBEDDING_LIMIT));
        assert!(config.rate_limits.contains_key(GENERATION_LIMIT));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = Config::from_toml_str("[chunking]\nchunk_size = 50\nchunk_overlap = 50\n")
            .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_missing_core_rate_limit_rejected() {
        let toml = "[rate_limits.chatbot]\nlimit = 1\nwindow_seconds = 1\n";
        let err = Config::from_toml_str(toml).unwrap_err();
        assert!(err.to_string().contains("rate_limits.embedding"));
    }

    #[test]
    fn test_config_load_success() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, TEST_CONFIG).unwrap();

        std::env::set_var("KBGUARD_CONFIG", &config_path);
        std::env::set_var("KBGUARD_TEST_OPENAI_KEY", "test-key");
        let config = Config::load();
        std::env::remove_var("KBGUARD_CONFIG");
        std::env::remove_var("KBGUARD_TEST_OPENAI_KEY");

        assert!(config.is_ok(), "Config::load() failed: {:?}", config.err());
        assert_eq!(config.unwrap().db_path(), Path::new("./test.db"));
    }

    #[test]
    fn test_config_missing_api_key() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, TEST_CONFIG).unwrap();

        std::env::set_var("KBGUARD_CONFIG", &config_path);
        std::env::remove_var("KBGUARD_TEST_OPENAI_KEY");
        let config = Config::load();
        std::env::remove_var("KBGUARD_CONFIG");

        assert!(config.is_err(), "Expected missing API key error");
        assert!(config.unwrap_err().to_string().contains("KBGUARD_TEST_OPENAI_KEY"));
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        std::env::set_var("KBGUARD_CONFIG", "nonexistent.toml");
        let config = Config::load();
        std::env::remove_var("KBGUARD_CONFIG");
        assert!(config.is_err());
    }
}
