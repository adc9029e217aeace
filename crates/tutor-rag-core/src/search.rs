//! Similarity search over embedded chunks.
//!
//! [`SimilaritySearch`] embeds a free-text query through an
//! [`EmbeddingProvider`] and asks the [`Store`] for the nearest chunks.
//! Threshold filtering happens inside the store query, before ranking and
//! limiting, so no caller can observe an unfiltered result set.
//!
//! The scoped variant resolves the documents linked to a scope (a tutor)
//! first. An empty scope returns no results without touching the vector
//! store; an unfiltered search over every document is never a fallback.

use std::sync::Arc;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::SearchError;
use crate::models::SimilarityResult;
use crate::store::{Store, VectorQuery};

pub const DEFAULT_LIMIT: usize = 10;
pub const DEFAULT_THRESHOLD: f64 = 0.1;

/// Filters and bounds for one search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Minimum similarity in `[0.0, 1.0]`.
    pub threshold: f64,
    /// Restrict results to these documents.
    pub document_ids: Option<Vec<String>>,
    /// Restrict results to documents owned by this user or public.
    pub owner_id: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            threshold: DEFAULT_THRESHOLD,
            document_ids: None,
            owner_id: None,
        }
    }
}

impl SearchOptions {
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.limit == 0 {
            return Err(SearchError::InvalidOptions("limit must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(SearchError::InvalidOptions(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Query-time retrieval over a [`Store`].
#[derive(Clone)]
pub struct SimilaritySearch {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SimilaritySearch {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// Return chunks similar to `query`, best first.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SimilarityResult>, SearchError> {
        options.validate()?;
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        if matches!(&options.document_ids, Some(ids) if ids.is_empty()) {
            return Ok(Vec::new());
        }

        let embedding = embed_query(self.embedder.as_ref(), query).await?;
        let results = self
            .store
            .match_chunks(&VectorQuery {
                embedding,
                threshold: options.threshold,
                limit: options.limit,
                document_ids: options.document_ids.clone(),
                owner_id: options.owner_id.clone(),
            })
            .await?;

        tracing::debug!(
            results = results.len(),
            threshold = options.threshold,
            "similarity search complete"
        );
        Ok(results)
    }

    /// Search only the documents linked to `scope_id`.
    ///
    /// If `options.document_ids` is also set, the two sets are intersected.
    pub async fn search_scoped(
        &self,
        query: &str,
        scope_id: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SimilarityResult>, SearchError> {
        options.validate()?;
        let mut linked = self.store.linked_document_ids(scope_id).await?;
        if let Some(allow) = &options.document_ids {
            linked.retain(|id| allow.contains(id));
        }
        if linked.is_empty() {
            tracing::debug!(scope = scope_id, "scope has no documents; skipping search");
            return Ok(Vec::new());
        }

        let scoped = SearchOptions {
            document_ids: Some(linked),
            ..options.clone()
        };
        self.search(query, &scoped).await
    }
}

/// Render results as numbered source blocks for a chat prompt.
///
/// ```rust
/// use tutor_rag_core::models::SimilarityResult;
/// use tutor_rag_core::search::format_context;
///
/// let r = SimilarityResult {
///     chunk_id: "c1".into(),
///     document_id: "d1".into(),
///     chunk_index: 0,
///     text: "Mitochondria produce ATP.".into(),
///     tokens: 4,
///     similarity: 0.8,
///     created_at: 0,
/// };
/// assert_eq!(format_context(&[r]), "[Source 1]: Mitochondria produce ATP.");
/// ```
pub fn format_context(results: &[SimilarityResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("[Source {}]: {}", i + 1, r.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}
