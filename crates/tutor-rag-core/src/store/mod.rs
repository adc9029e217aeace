//! Storage abstraction for documents, chunks and scope links.
//!
//! The [`Store`] trait covers every persistence operation the processor
//! and similarity search need, so backends are pluggable (SQLite in the
//! app crate, [`memory::InMemoryStore`] for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Chunk, ChunkStats, Document, DocumentStatus, NewChunk, NewDocument, SimilarityResult};

/// A nearest-neighbor query against stored chunk embeddings.
///
/// The threshold is part of the query: implementations must never return
/// a match whose similarity is below it.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub embedding: Vec<f32>,
    /// Minimum similarity in `[0.0, 1.0]`.
    pub threshold: f64,
    pub limit: usize,
    /// Restrict matches to these documents.
    pub document_ids: Option<Vec<String>>,
    /// Restrict matches to documents owned by this user or public.
    pub owner_id: Option<String>,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_document`](Store::create_document) | Insert a `processing` document record |
/// | [`get_document`](Store::get_document) | Fetch a document record |
/// | [`set_status`](Store::set_status) | Change a document's status |
/// | [`commit_chunks`](Store::commit_chunks) | Atomically replace chunks and mark `ready` |
/// | [`fail_document`](Store::fail_document) | Delete chunks and mark `error` |
/// | [`chunk_count`](Store::chunk_count) / [`list_chunks`](Store::list_chunks) | Inspect a document's chunks |
/// | [`link_document`](Store::link_document) / [`unlink_document`](Store::unlink_document) / [`linked_document_ids`](Store::linked_document_ids) | Scope links |
/// | [`match_chunks`](Store::match_chunks) | Threshold-bounded cosine search |
/// | [`chunk_stats`](Store::chunk_stats) | Per-owner totals |
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_document(&self, doc: NewDocument) -> Result<Document, StoreError>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError>;

    async fn set_status(&self, id: &str, status: DocumentStatus) -> Result<(), StoreError>;

    /// Replace all chunks of a document and mark it `ready` with
    /// `length_tokens`, as a single all-or-nothing write.
    async fn commit_chunks(
        &self,
        document_id: &str,
        chunks: &[NewChunk],
        length_tokens: i64,
    ) -> Result<(), StoreError>;

    /// Delete all chunks of a document and mark it `error`.
    async fn fail_document(&self, document_id: &str) -> Result<(), StoreError>;

    async fn chunk_count(&self, document_id: &str) -> Result<usize, StoreError>;

    /// Chunks of a document ordered by `chunk_index`.
    async fn list_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, StoreError>;

    async fn link_document(&self, scope_id: &str, document_id: &str) -> Result<(), StoreError>;

    /// Remove a scope link. Returns `false` when there was none.
    async fn unlink_document(&self, scope_id: &str, document_id: &str) -> Result<bool, StoreError>;

    async fn linked_document_ids(&self, scope_id: &str) -> Result<Vec<String>, StoreError>;

    /// Matches ordered by descending similarity, then document id, then
    /// chunk index, filtered by the query's threshold and capped at its limit.
    async fn match_chunks(&self, query: &VectorQuery) -> Result<Vec<SimilarityResult>, StoreError>;

    async fn chunk_stats(&self, owner_id: &str) -> Result<ChunkStats, StoreError>;
}

/// Check a chunk batch before it is written.
///
/// Requires a non-empty batch with contiguous indices from 0, non-empty
/// text, and embeddings of one shared, non-zero dimensionality. Returns
/// that dimensionality.
pub fn validate_chunk_rows(chunks: &[NewChunk]) -> Result<usize, StoreError> {
    let first = chunks
        .first()
        .ok_or_else(|| StoreError::Persistence("refusing to commit an empty chunk set".into()))?;
    let dims = first.embedding.len();
    if dims == 0 {
        return Err(StoreError::Persistence("chunk 0 has no embedding".into()));
    }
    for (i, chunk) in chunks.iter().enumerate() {
        if chunk.chunk_index != i as i64 {
            return Err(StoreError::Persistence(format!(
                "chunk indices must be contiguous from 0: expected {}, found {}",
                i, chunk.chunk_index
            )));
        }
        if chunk.text.trim().is_empty() {
            return Err(StoreError::Persistence(format!("chunk {} has empty text", i)));
        }
        if chunk.embedding.len() != dims {
            return Err(StoreError::Persistence(format!(
                "chunk {} embedding has {} dimensions, expected {}",
                i,
                chunk.embedding.len(),
                dims
            )));
        }
    }
    Ok(dims)
}

/// Order matches best-first and apply the limit.
pub fn rank_matches(matches: &mut Vec<SimilarityResult>, limit: usize) {
    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
    matches.truncate(limit);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(index: i64, dims: usize) -> NewChunk {
        NewChunk {
            chunk_index: index,
            text: format!("chunk {}", index),
            tokens: 3,
            embedding: vec![0.1; dims],
        }
    }

    #[test]
    fn test_validate_accepts_contiguous_batch() {
        let rows = vec![row(0, 4), row(1, 4), row(2, 4)];
        assert_eq!(validate_chunk_rows(&rows).unwrap(), 4);
    }

    #[test]
    fn test_validate_rejects_bad_batches() {
        assert!(validate_chunk_rows(&[]).is_err());
        assert!(validate_chunk_rows(&[row(0, 0)]).is_err());
        assert!(validate_chunk_rows(&[row(0, 4), row(2, 4)]).is_err());
        assert!(validate_chunk_rows(&[row(0, 4), row(1, 3)]).is_err());
        let mut blank = row(0, 4);
        blank.text = "  ".into();
        assert!(validate_chunk_rows(&[blank]).is_err());
    }

    #[test]
    fn test_rank_matches_orders_and_limits() {
        let m = |doc: &str, idx: i64, sim: f64| SimilarityResult {
            chunk_id: format!("{}-{}", doc, idx),
            document_id: doc.into(),
            chunk_index: idx,
            text: String::new(),
            tokens: 1,
            similarity: sim,
            created_at: 0,
        };
        let mut matches = vec![m("b", 0, 0.5), m("a", 1, 0.9), m("a", 0, 0.5), m("c", 0, 0.1)];
        rank_matches(&mut matches, 3);
        let order: Vec<String> = matches.iter().map(|r| r.chunk_id.clone()).collect();
        assert_eq!(order, vec!["a-1", "a-0", "b-0"]);
    }
}
