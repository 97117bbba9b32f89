use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FaqConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub matching: MatchingConfig,
    pub writeback: WritebackConfig,
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub log_level: String,
    /// Upper bound on the embed → search → respond path of one question.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    pub pool_size: u32,
    pub max_overflow: u32,
    pub pool_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"openai"` or `"local"`.
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub max_tokens: usize,
    /// Maximum number of memoized vectors. `0` disables the cache.
    pub cache_capacity: usize,
    pub api_base: String,
    /// Where the local ONNX model lives.
    pub cache_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub n: u32,
    pub api_base: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MatchingConfig {
    pub similarity_threshold: f64,
    pub default_collection: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WritebackConfig {
    pub batch_size: usize,
    pub workers: usize,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BootstrapConfig {
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub seed_file: Option<String>,
    pub seed_limit: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            request_timeout_secs: 60,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_faq_dir()
            .join("knowledge.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            pool_size: 10,
            max_overflow: 20,
            pool_timeout_secs: 30,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_faq_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "openai".into(),
            model: "text-embedding-3-small".into(),
            dimensions: 1536,
            max_tokens: 2000,
            cache_capacity: 10_000,
            api_base: "https://api.openai.com/v1".into(),
            cache_dir,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-3.5-turbo".into(),
            max_tokens: 200,
            temperature: 0.3,
            n: 1,
            api_base: "https://api.openai.com/v1".into(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            default_collection: "faq".into(),
        }
    }
}

impl Default for WritebackConfig {
    fn default() -> Self {
        Self {
            batch_size: 30,
            workers: 2,
            poll_interval_ms: 1000,
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_secs: 5,
            seed_file: None,
            seed_limit: Some(100),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl StorageConfig {
    pub fn pool_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_timeout_secs)
    }
}

impl WritebackConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl BootstrapConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Returns `~/.faq-assistant/`
pub fn default_faq_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".faq-assistant")
}

/// Returns the default config file path: `~/.faq-assistant/config.toml`
pub fn default_config_path() -> PathBuf {
    default_faq_dir().join("config.toml")
}

impl FaqConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, apply env var overrides, then validate.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            FaqConfig::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("FAQ_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("FAQ_COLLECTION") {
            self.matching.default_collection = val;
        }
        if let Ok(val) = std::env::var("FAQ_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("FAQ_SIMILARITY_THRESHOLD") {
            self.matching.similarity_threshold = val
                .parse()
                .context("FAQ_SIMILARITY_THRESHOLD must be a number")?;
        }
        if let Ok(val) = std::env::var("FAQ_BATCH_SIZE") {
            self.writeback.batch_size =
                val.parse().context("FAQ_BATCH_SIZE must be an integer")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (0.0..=1.0).contains(&self.matching.similarity_threshold),
            "matching.similarity_threshold must be within [0, 1]"
        );
        ensure!(
            !self.matching.default_collection.trim().is_empty(),
            "matching.default_collection must not be empty"
        );
        ensure!(self.embedding.dimensions > 0, "embedding.dimensions must be > 0");
        ensure!(self.embedding.max_tokens > 0, "embedding.max_tokens must be > 0");
        ensure!(self.writeback.batch_size > 0, "writeback.batch_size must be > 0");
        ensure!(self.storage.pool_size > 0, "storage.pool_size must be > 0");
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
