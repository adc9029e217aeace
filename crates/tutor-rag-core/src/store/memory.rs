//! In-memory [`Store`] implementation for tests and embedding in other tools.
//!
//! Documents, chunks and scope links live behind `std::sync::RwLock`s.
//! Vector matching is brute-force cosine similarity over every stored
//! chunk. The store counts vector queries so callers can assert that a
//! search short-circuited.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::StoreError;
use crate::models::{
    Chunk, ChunkStats, Document, DocumentStatus, NewChunk, NewDocument, SimilarityResult, Visibility,
};

use super::{rank_matches, validate_chunk_rows, Store, VectorQuery};

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    chunks: RwLock<HashMap<String, Vec<Chunk>>>,
    links: RwLock<Vec<(String, String)>>,
    vector_queries: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of [`match_chunks`](Store::match_chunks) calls served so far.
    pub fn vector_query_count(&self) -> usize {
        self.vector_queries.load(Ordering::SeqCst)
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_document(&self, doc: NewDocument) -> Result<Document, StoreError> {
        let doc = Document::from_new(doc, now());
        write(&self.docs).insert(doc.id.clone(), doc.clone());
        Ok(doc)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(read(&self.docs).get(id).cloned())
    }

    async fn set_status(&self, id: &str, status: DocumentStatus) -> Result<(), StoreError> {
        let mut docs = write(&self.docs);
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        doc.status = status;
        doc.updated_at = now();
        Ok(())
    }

    async fn commit_chunks(
        &self,
        document_id: &str,
        chunks: &[NewChunk],
        length_tokens: i64,
    ) -> Result<(), StoreError> {
        validate_chunk_rows(chunks)?;

        // Both locks are held for the whole write so readers never see
        // new chunks with a stale status or the reverse.
        let mut docs = write(&self.docs);
        let mut stored = write(&self.chunks);
        let doc = docs
            .get_mut(document_id)
            .ok_or_else(|| StoreError::NotFound(document_id.to_string()))?;

        let ts = now();
        let rows = chunks
            .iter()
            .map(|c| Chunk {
                id: uuid::Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                chunk_index: c.chunk_index,
                text: c.text.clone(),
                tokens: c.tokens,
                embedding: c.embedding.clone(),
                created_at: ts,
            })
            .collect();
        stored.insert(document_id.to_string(), rows);

        doc.status = DocumentStatus::Ready;
        doc.length_tokens = Some(length_tokens);
        doc.updated_at = ts;
        Ok(())
    }

    async fn fail_document(&self, document_id: &str) -> Result<(), StoreError> {
        let mut docs = write(&self.docs);
        let mut stored = write(&self.chunks);
        let doc = docs
            .get_mut(document_id)
            .ok_or_else(|| StoreError::NotFound(document_id.to_string()))?;
        stored.remove(document_id);
        doc.status = DocumentStatus::Error;
        doc.updated_at = now();
        Ok(())
    }

    async fn chunk_count(&self, document_id: &str) -> Result<usize, StoreError> {
        Ok(read(&self.chunks).get(document_id).map_or(0, Vec::len))
    }

    async fn list_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, StoreError> {
        let mut chunks = read(&self.chunks)
            .get(document_id)
            .cloned()
            .unwrap_or_default();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn link_document(&self, scope_id: &str, document_id: &str) -> Result<(), StoreError> {
        if !read(&self.docs).contains_key(document_id) {
            return Err(StoreError::NotFound(document_id.to_string()));
        }
        let mut links = write(&self.links);
        let link = (scope_id.to_string(), document_id.to_string());
        if !links.contains(&link) {
            links.push(link);
        }
        Ok(())
    }

    async fn unlink_document(&self, scope_id: &str, document_id: &str) -> Result<bool, StoreError> {
        let mut links = write(&self.links);
        let before = links.len();
        links.retain(|(scope, doc)| !(scope == scope_id && doc == document_id));
        Ok(links.len() < before)
    }

    async fn linked_document_ids(&self, scope_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(read(&self.links)
            .iter()
            .filter(|(scope, _)| scope == scope_id)
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn match_chunks(&self, query: &VectorQuery) -> Result<Vec<SimilarityResult>, StoreError> {
        self.vector_queries.fetch_add(1, Ordering::SeqCst);

        let docs = read(&self.docs);
        let stored = read(&self.chunks);

        let in_scope = |doc_id: &str| -> bool {
            if let Some(ids) = &query.document_ids {
                if !ids.iter().any(|id| id == doc_id) {
                    return false;
                }
            }
            let Some(doc) = docs.get(doc_id) else {
                return false;
            };
            if doc.status != DocumentStatus::Ready {
                return false;
            }
            match &query.owner_id {
                None => true,
                Some(owner) => &doc.owner_id == owner || doc.visibility == Visibility::Public,
            }
        };

        let mut matches: Vec<SimilarityResult> = stored
            .iter()
            .filter(|(doc_id, _)| in_scope(doc_id.as_str()))
            .flat_map(|(_, chunks)| chunks.iter())
            .filter_map(|c| {
                let similarity = cosine_similarity(&query.embedding, &c.embedding).clamp(0.0, 1.0);
                (similarity >= query.threshold).then(|| SimilarityResult {
                    chunk_id: c.id.clone(),
                    document_id: c.document_id.clone(),
                    chunk_index: c.chunk_index,
                    text: c.text.clone(),
                    tokens: c.tokens,
                    similarity,
                    created_at: c.created_at,
                })
            })
            .collect();

        rank_matches(&mut matches, query.limit);
        Ok(matches)
    }

    async fn chunk_stats(&self, owner_id: &str) -> Result<ChunkStats, StoreError> {
        let docs = read(&self.docs);
        let stored = read(&self.chunks);
        let mut stats = ChunkStats::default();
        for (doc_id, chunks) in stored.iter() {
            let owned = docs.get(doc_id).is_some_and(|d| d.owner_id == owner_id);
            if !owned || chunks.is_empty() {
                continue;
            }
            stats.total_chunks += chunks.len() as i64;
            stats.total_tokens += chunks.iter().map(|c| c.tokens).sum::<i64>();
            stats.documents_with_embeddings += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_doc(owner: &str, visibility: Visibility) -> NewDocument {
        NewDocument {
            owner_id: owner.into(),
            title: "Doc".into(),
            description: None,
            storage_path: format!("{}/doc.txt", owner),
            mime_type: "text/plain".into(),
            file_size: 10,
            visibility,
        }
    }

    fn rows(vectors: &[[f32; 2]]) -> Vec<NewChunk> {
        vectors
            .iter()
            .enumerate()
            .map(|(i, v)| NewChunk {
                chunk_index: i as i64,
                text: format!("text {}", i),
                tokens: 10,
                embedding: v.to_vec(),
            })
            .collect()
    }

    fn query(embedding: [f32; 2], threshold: f64) -> VectorQuery {
        VectorQuery {
            embedding: embedding.to_vec(),
            threshold,
            limit: 10,
            document_ids: None,
            owner_id: None,
        }
    }

    #[tokio::test]
    async fn test_commit_replaces_and_marks_ready() {
        let store = InMemoryStore::new();
        let doc = store.create_document(new_doc("u1", Visibility::Private)).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);

        store.commit_chunks(&doc.id, &rows(&[[1.0, 0.0], [0.0, 1.0]]), 20).await.unwrap();
        store.commit_chunks(&doc.id, &rows(&[[1.0, 0.0]]), 10).await.unwrap();

        let doc = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Ready);
        assert_eq!(doc.length_tokens, Some(10));
        assert_eq!(store.chunk_count(&doc.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_commit_leaves_document_untouched() {
        let store = InMemoryStore::new();
        let doc = store.create_document(new_doc("u1", Visibility::Private)).await.unwrap();
        let mut bad = rows(&[[1.0, 0.0], [0.0, 1.0]]);
        bad[1].embedding.clear();
        assert!(store.commit_chunks(&doc.id, &bad, 20).await.is_err());
        let doc = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);
        assert_eq!(store.chunk_count(&doc.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fail_document_removes_chunks() {
        let store = InMemoryStore::new();
        let doc = store.create_document(new_doc("u1", Visibility::Private)).await.unwrap();
        store.commit_chunks(&doc.id, &rows(&[[1.0, 0.0]]), 10).await.unwrap();
        store.fail_document(&doc.id).await.unwrap();
        let doc = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Error);
        assert_eq!(store.chunk_count(&doc.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_match_applies_threshold_and_order() {
        let store = InMemoryStore::new();
        let doc = store.create_document(new_doc("u1", Visibility::Private)).await.unwrap();
        store
            .commit_chunks(&doc.id, &rows(&[[1.0, 0.0], [0.7, 0.7], [0.0, 1.0]]), 30)
            .await
            .unwrap();

        let results = store.match_chunks(&query([1.0, 0.0], 0.5)).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_index, 0);
        assert_eq!(results[1].chunk_index, 1);
        assert!(results.iter().all(|r| r.similarity >= 0.5));
        assert_eq!(store.vector_query_count(), 1);
    }

    #[tokio::test]
    async fn test_match_owner_scope_includes_public() {
        let store = InMemoryStore::new();
        let mine = store.create_document(new_doc("u1", Visibility::Private)).await.unwrap();
        let public = store.create_document(new_doc("u2", Visibility::Public)).await.unwrap();
        let private = store.create_document(new_doc("u2", Visibility::Private)).await.unwrap();
        for doc in [&mine, &public, &private] {
            store.commit_chunks(&doc.id, &rows(&[[1.0, 0.0]]), 10).await.unwrap();
        }

        let mut q = query([1.0, 0.0], 0.0);
        q.owner_id = Some("u1".into());
        let results = store.match_chunks(&q).await.unwrap();
        let mut ids: Vec<&str> = results.iter().map(|r| r.document_id.as_str()).collect();
        ids.sort();
        let mut expected = vec![mine.id.as_str(), public.id.as_str()];
        expected.sort();
        assert_eq!(ids, expected);

        q.owner_id = None;
        q.document_ids = Some(vec![private.id.clone()]);
        let results = store.match_chunks(&q).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, private.id);
    }

    #[tokio::test]
    async fn test_match_skips_documents_being_reprocessed() {
        let store = InMemoryStore::new();
        let doc = store.create_document(new_doc("u1", Visibility::Private)).await.unwrap();
        store.commit_chunks(&doc.id, &rows(&[[1.0, 0.0]]), 10).await.unwrap();
        assert_eq!(store.match_chunks(&query([1.0, 0.0], 0.0)).await.unwrap().len(), 1);

        store.set_status(&doc.id, DocumentStatus::Processing).await.unwrap();
        assert!(store.match_chunks(&query([1.0, 0.0], 0.0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_links_and_stats() {
        let store = InMemoryStore::new();
        let a = store.create_document(new_doc("u1", Visibility::Private)).await.unwrap();
        let b = store.create_document(new_doc("u1", Visibility::Private)).await.unwrap();
        store.link_document("tutor-1", &a.id).await.unwrap();
        store.link_document("tutor-1", &a.id).await.unwrap();
        assert_eq!(store.linked_document_ids("tutor-1").await.unwrap(), vec![a.id.clone()]);
        assert!(store.linked_document_ids("tutor-2").await.unwrap().is_empty());
        assert!(store.link_document("tutor-1", "missing").await.is_err());

        assert!(store.unlink_document("tutor-1", &a.id).await.unwrap());
        assert!(!store.unlink_document("tutor-1", &a.id).await.unwrap());
        assert!(store.linked_document_ids("tutor-1").await.unwrap().is_empty());

        store.commit_chunks(&a.id, &rows(&[[1.0, 0.0], [0.0, 1.0]]), 20).await.unwrap();
        store.commit_chunks(&b.id, &rows(&[[1.0, 0.0]]), 10).await.unwrap();
        let stats = store.chunk_stats("u1").await.unwrap();
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.total_tokens, 30);
        assert_eq!(stats.documents_with_embeddings, 2);
        assert_eq!(store.chunk_stats("nobody").await.unwrap(), ChunkStats::default());
    }
}
