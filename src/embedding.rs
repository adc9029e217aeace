//! Embedding provider implementations.
//!
//! Concrete backends for the core [`EmbeddingProvider`] trait:
//! - **[`DisabledProvider`]**: fails every call; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: `POST /v1/embeddings` with bearer auth.
//! - **[`OllamaProvider`]**: `POST /api/embed` on a local Ollama instance.
//!
//! Both HTTP providers go through [`retry`](crate::retry::retry): 429, 5xx
//! and network errors are retried with backoff; other 4xx fail at once.
//!
//! ```rust,no_run
//! # use tutor_rag::config::EmbeddingConfig;
//! # use tutor_rag::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use tutor_rag_core::embedding::{EmbeddingProvider, ProviderResponse};
use tutor_rag_core::error::EmbedError;

use crate::config::EmbeddingConfig;
use crate::retry::{retry, RequestError, RetryPolicy};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Build the provider named by `config.provider`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn required_model(config: &EmbeddingConfig, provider: &str) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model required for {} provider", provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow!("embedding.dims required for {} provider", provider))?;
    Ok((model, dims))
}

// ============ Disabled Provider ============

/// A provider that refuses to embed anything.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> Result<ProviderResponse, EmbedError> {
        Err(EmbedError::Provider(
            "embedding provider is disabled; set [embedding] provider in the config".into(),
        ))
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    batch_size: usize,
    policy: RetryPolicy,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model(config, "OpenAI")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            api_key,
            batch_size: config.batch_size,
            policy: RetryPolicy::with_retries(config.max_retries),
            client: http_client(config)?,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<ProviderResponse, RequestError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RequestError::from_transport("OpenAI", &e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RequestError::from_status("OpenAI", status, &text));
        }
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RequestError::from_transport("OpenAI", &e))?;
        parse_openai_response(&json).map_err(|e| RequestError::permanent(e.to_string()))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed(&self, texts: &[String]) -> Result<ProviderResponse, EmbedError> {
        retry(&self.policy, "openai.embeddings", RequestError::is_retryable, || {
            self.request(texts)
        })
        .await
        .map_err(|e| EmbedError::Provider(e.to_string()))
    }
}

/// Parse an OpenAI embeddings response.
///
/// Items are reordered by their `index` field so output order matches
/// input order. Token usage comes from `usage.total_tokens`.
fn parse_openai_response(json: &serde_json::Value) -> Result<ProviderResponse> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed: Vec<(u64, Vec<f32>)> = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(position as u64);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, to_f32_vec(embedding)?));
    }
    indexed.sort_by_key(|(index, _)| *index);

    let total_tokens = json
        .pointer("/usage/total_tokens")
        .and_then(|t| t.as_u64())
        .unwrap_or(0) as usize;

    Ok(ProviderResponse {
        vectors: indexed.into_iter().map(|(_, v)| v).collect(),
        total_tokens,
    })
}

fn to_f32_vec(values: &[serde_json::Value]) -> Result<Vec<f32>> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("Invalid embedding value: {}", v))
        })
        .collect()
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Requires Ollama to be running with the model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    policy: RetryPolicy,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model(config, "Ollama")?;
        Ok(Self {
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
            batch_size: config.batch_size,
            policy: RetryPolicy::with_retries(config.max_retries),
            client: http_client(config)?,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<ProviderResponse, RequestError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                RequestError::transient(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RequestError::from_status("Ollama", status, &text));
        }
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RequestError::from_transport("Ollama", &e))?;
        parse_ollama_response(&json).map_err(|e| RequestError::permanent(e.to_string()))
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn price_per_1k(&self) -> f64 {
        0.0
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed(&self, texts: &[String]) -> Result<ProviderResponse, EmbedError> {
        retry(&self.policy, "ollama.embed", RequestError::is_retryable, || {
            self.request(texts)
        })
        .await
        .map_err(|e| EmbedError::Provider(e.to_string()))
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<ProviderResponse> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let vectors = embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))
                .and_then(|values| to_f32_vec(values))
        })
        .collect::<Result<Vec<_>>>()?;

    let total_tokens = json
        .get("prompt_eval_count")
        .and_then(|t| t.as_u64())
        .unwrap_or(0) as usize;

    Ok(ProviderResponse {
        vectors,
        total_tokens,
    })
}
