//! Embedding provider trait, batch orchestration and vector utilities.
//!
//! [`EmbeddingProvider`] is the seam to an external embedding service.
//! [`embed_batch`] wraps a provider with the pipeline's guarantees:
//! inputs are validated before any network call, output order and
//! dimensionality are checked, and cost is accounted per batch.
//!
//! Concrete providers (OpenAI, Ollama) live in the `tutor-rag` app crate.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::EmbedError;

/// Raw provider output for one request.
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    /// One vector per input text, in input order.
    pub vectors: Vec<Vec<f32>>,
    /// Total tokens the provider billed for the request.
    pub total_tokens: usize,
}

/// An external embedding service.
///
/// Implementations return exactly one vector per input, in input order,
/// or an error. They never return a partial set.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// USD per 1K tokens.
    fn price_per_1k(&self) -> f64 {
        price_per_1k(self.model_name())
    }

    /// Maximum number of texts sent in one provider request.
    fn max_batch_size(&self) -> usize {
        2048
    }

    async fn embed(&self, texts: &[String]) -> Result<ProviderResponse, EmbedError>;
}

/// One embedded text.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub token_count: usize,
    pub model: String,
}

/// The result of [`embed_batch`]: one [`Embedding`] per input, in order.
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub embeddings: Vec<Embedding>,
    pub total_tokens: usize,
    pub cost: f64,
    pub model: String,
}

/// Summary of an embedding run, suitable for reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingUsage {
    pub embeddings_generated: usize,
    pub total_tokens: usize,
    pub cost: f64,
    pub model: String,
}

impl EmbeddingBatch {
    pub fn usage(&self) -> EmbeddingUsage {
        EmbeddingUsage {
            embeddings_generated: self.embeddings.len(),
            total_tokens: self.total_tokens,
            cost: self.cost,
            model: self.model.clone(),
        }
    }
}

/// Price per 1K tokens for known embedding models.
///
/// Unknown models are priced as `text-embedding-3-small`.
pub fn price_per_1k(model: &str) -> f64 {
    match model {
        "text-embedding-3-large" => 0.00013,
        "text-embedding-ada-002" => 0.0001,
        _ => 0.00002,
    }
}

/// `(tokens / 1000) × price_per_1k`.
pub fn embedding_cost(tokens: usize, price_per_1k: f64) -> f64 {
    tokens as f64 / 1000.0 * price_per_1k
}

/// Embed `texts` through `provider`, preserving order.
///
/// Texts are sent in requests of at most
/// [`max_batch_size`](EmbeddingProvider::max_batch_size). Any failing
/// request aborts the whole call.
///
/// # Errors
///
/// - [`EmbedError::InvalidInput`] for an empty list or a blank text.
/// - [`EmbedError::Provider`] if the provider fails, returns the wrong
///   number of vectors, or returns vectors of the wrong dimensionality.
pub async fn embed_batch(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
) -> Result<EmbeddingBatch, EmbedError> {
    if texts.is_empty() {
        return Err(EmbedError::InvalidInput("no texts to embed".into()));
    }
    if let Some(i) = texts.iter().position(|t| t.trim().is_empty()) {
        return Err(EmbedError::InvalidInput(format!("text {} is blank", i)));
    }

    let dims = provider.dims();
    let batch_size = provider.max_batch_size().max(1);
    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
    let mut total_tokens = 0usize;

    for batch in texts.chunks(batch_size) {
        let response = provider.embed(batch).await?;
        if response.vectors.len() != batch.len() {
            return Err(EmbedError::Provider(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                response.vectors.len()
            )));
        }
        if let Some(bad) = response.vectors.iter().find(|v| v.len() != dims) {
            return Err(EmbedError::Provider(format!(
                "expected {}-dimensional vectors, got {}",
                dims,
                bad.len()
            )));
        }
        total_tokens += response.total_tokens;
        vectors.extend(response.vectors);
    }

    let per_item = total_tokens.div_ceil(texts.len());
    let model = provider.model_name().to_string();
    let cost = embedding_cost(total_tokens, provider.price_per_1k());

    tracing::debug!(
        count = vectors.len(),
        total_tokens,
        cost,
        model = %model,
        "embedded batch"
    );

    Ok(EmbeddingBatch {
        embeddings: vectors
            .into_iter()
            .map(|vector| Embedding {
                vector,
                token_count: per_item,
                model: model.clone(),
            })
            .collect(),
        total_tokens,
        cost,
        model,
    })
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>, EmbedError> {
    let batch = embed_batch(provider, &[text.to_string()]).await?;
    batch
        .embeddings
        .into_iter()
        .next()
        .map(|e| e.vector)
        .ok_or_else(|| EmbedError::Provider("provider returned no embedding".into()))
}

/// Encode a vector as little-endian `f32` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian `f32` bytes. Returns `None` if the length is not
/// a multiple of four.
pub fn blob_to_vec(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, mismatched lengths, or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (dot, na, nb) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |(d, x2, y2), (&x, &y)| {
        let (x, y) = (x as f64, y as f64);
        (d + x * y, x2 + x * x, y2 + y * y)
    });
    let denom = na.sqrt() * nb.sqrt();
    if denom < f64::EPSILON {
        0.0
    } else {
        (dot / denom).clamp(-1.0, 1.0)
    }
}
