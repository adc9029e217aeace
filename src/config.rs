//! TOML configuration.
//!
//! Every section except `[db]` has defaults, so a minimal config is:
//!
//! ```toml
//! [db]
//! path = "./data/trag.sqlite"
//! ```
//!
//! Secrets never live in the file. They are read from the environment
//! (`OPENAI_API_KEY`, `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
//! `AWS_SESSION_TOKEN`).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use tutor_rag_core::chunk::ChunkingOptions;
use tutor_rag_core::models::Visibility;
use tutor_rag_core::search::{SearchOptions, DEFAULT_LIMIT, DEFAULT_THRESHOLD};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingOptions,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub seed: SeedConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where uploaded document bytes live.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// `"local"` or `"s3"`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    /// Root directory for the local backend.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Key prefix prepended to every object path.
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            root: default_storage_root(),
            bucket: None,
            region: default_region(),
            endpoint_url: None,
            prefix: String::new(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_storage_backend() -> String {
    "local".to_string()
}
fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/documents")
}
fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"disabled"`, `"openai"` or `"ollama"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL. Defaults to the provider's public endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    128
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}
fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

impl RetrievalConfig {
    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            limit: self.limit,
            threshold: self.threshold,
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}
fn default_request_timeout() -> u64 {
    120
}

/// Batch seeding of a fixed document set.
#[derive(Debug, Deserialize, Clone)]
pub struct SeedConfig {
    /// Directory the manifest filenames are resolved against.
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,
    /// Pause between documents, in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Files to seed. When empty, every supported file under
    /// `content_dir` matching `include_globs` is seeded.
    #[serde(default)]
    pub documents: Vec<SeedDocument>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            content_dir: default_content_dir(),
            delay_ms: default_delay_ms(),
            documents: Vec::new(),
            include_globs: default_include_globs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedDocument {
    pub filename: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Key under which the resulting document id is reported.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
}

fn default_content_dir() -> PathBuf {
    PathBuf::from("./content")
}
fn default_delay_ms() -> u64 {
    1000
}
fn default_include_globs() -> Vec<String> {
    ["**/*.md", "**/*.txt", "**/*.pdf", "**/*.doc", "**/*.docx", "**/*.pptx"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// `tracing` filter directive. `RUST_LOG` takes precedence.
    #[serde(default)]
    pub level: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    config
        .chunking
        .validate()
        .with_context(|| "Invalid [chunking] section")?;

    if config.retrieval.limit < 1 {
        bail!("retrieval.limit must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.threshold) {
        bail!("retrieval.threshold must be in [0.0, 1.0]");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.storage.backend.as_str() {
        "local" => {}
        "s3" => {
            if config.storage.bucket.is_none() {
                bail!("storage.bucket is required when backend is 's3'");
            }
        }
        other => bail!(
            "Unknown storage backend: '{}'. Must be local or s3.",
            other
        ),
    }

    Ok(())
}
