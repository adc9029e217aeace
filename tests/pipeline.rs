//! End-to-end pipeline tests against the SQLite store and local storage.
//!
//! Embedding providers are in-process fakes so the tests are hermetic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use tutor_rag::config::parse_config;
use tutor_rag::context::AppContext;
use tutor_rag::extract::MIME_TEXT;
use tutor_rag::sqlite_store::SqliteStore;
use tutor_rag::storage::{LocalStorage, ObjectStorage};
use tutor_rag::{db, migrate};
use tutor_rag_core::chunk::estimate_tokens;
use tutor_rag_core::embedding::{EmbeddingProvider, ProviderResponse};
use tutor_rag_core::error::{EmbedError, ParseError, PipelineError};
use tutor_rag_core::models::{DocumentStatus, NewDocument, Visibility};
use tutor_rag_core::search::SearchOptions;
use tutor_rag_core::store::Store;

/// Maps text onto a 2-d vector by which of two keywords dominates.
struct KeywordEmbedder {
    calls: AtomicUsize,
    fail_after: Option<usize>,
}

impl KeywordEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_after: None,
        }
    }

    fn failing_after(batches: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_after: Some(batches),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    fn dims(&self) -> usize {
        2
    }

    fn max_batch_size(&self) -> usize {
        2
    }

    async fn embed(&self, texts: &[String]) -> Result<ProviderResponse, EmbedError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if matches!(self.fail_after, Some(n) if call >= n) {
            return Err(EmbedError::Provider("connection reset by peer".into()));
        }
        let vectors = texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                let cells = lower.matches("cell").count() as f32;
                let stars = lower.matches("star").count() as f32;
                vec![cells + 0.01, stars + 0.01]
            })
            .collect();
        Ok(ProviderResponse {
            vectors,
            total_tokens: texts.iter().map(|t| estimate_tokens(t)).sum(),
        })
    }
}

struct Harness {
    _tmp: TempDir,
    ctx: AppContext,
}

async fn harness(embedder: Arc<dyn EmbeddingProvider>) -> Harness {
    let tmp = TempDir::new().unwrap();
    let cfg = parse_config(&format!(
        "[db]\npath = \"{}/trag.sqlite\"\n\n[storage]\nroot = \"{}/objects\"\n",
        tmp.path().display(),
        tmp.path().display()
    ))
    .unwrap();
    let pool = db::connect(&cfg).await.unwrap();
    migrate::apply(&pool).await.unwrap();

    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
    let storage: Arc<dyn ObjectStorage> = Arc::new(LocalStorage::new(cfg.storage.root.clone()));
    Harness {
        ctx: AppContext::new(cfg, store, storage, embedder),
        _tmp: tmp,
    }
}

/// Upload `body` and create a `processing` record for it.
async fn upload(h: &Harness, owner: &str, name: &str, body: &str, visibility: Visibility) -> String {
    let path = format!("{}/{}", owner, name);
    h.ctx
        .storage
        .upload(&path, body.as_bytes(), MIME_TEXT)
        .await
        .unwrap();
    h.ctx
        .store
        .create_document(NewDocument {
            owner_id: owner.to_string(),
            title: name.to_string(),
            description: None,
            storage_path: path,
            mime_type: MIME_TEXT.to_string(),
            file_size: body.len() as i64,
            visibility,
        })
        .await
        .unwrap()
        .id
}

/// `words` distinct words in ten-word sentences, blank line every 100 words.
fn lesson(words: usize, topic: &str) -> String {
    let mut out = String::new();
    for i in 0..words {
        if i > 0 {
            out.push_str(if i % 100 == 0 { "\n\n" } else { " " });
        }
        out.push_str(&format!("{}{}", topic, i));
        if i % 10 == 9 {
            out.push('.');
        }
    }
    out
}

#[tokio::test]
async fn test_short_file_fails_with_empty_content() {
    let h = harness(Arc::new(KeywordEmbedder::new())).await;
    let body = "Forty characters of text, nothing else..";
    assert_eq!(body.len(), 40);
    let id = upload(&h, "u1", "short.txt", body, Visibility::Private).await;

    let err = h.ctx.processor().process_document(&id).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Parse(ParseError::EmptyContent { chars: 40, .. })
    ));
    let doc = h.ctx.store.get_document(&id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Error);
}

#[tokio::test]
async fn test_two_thousand_words_chunks_with_overlap() {
    let h = harness(Arc::new(KeywordEmbedder::new())).await;
    let id = upload(&h, "u1", "long.txt", &lesson(2000, "cell"), Visibility::Private).await;

    let report = h.ctx.processor().process_document(&id).await.unwrap();
    assert!(report.chunks >= 2);

    let chunks = h.ctx.store.list_chunks(&id).await.unwrap();
    assert_eq!(chunks.len(), report.chunks);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i as i64);
        assert!(chunk.tokens <= 800, "chunk {} has {} tokens", i, chunk.tokens);
        assert_eq!(chunk.embedding.len(), 2);
    }

    // Words are unique, so the opening of chunk 1 has one position in chunk 0.
    let prev: Vec<&str> = chunks[0].text.split_whitespace().collect();
    let opening: Vec<&str> = chunks[1].text.split_whitespace().take(5).collect();
    let pos = prev
        .windows(5)
        .position(|w| w == opening.as_slice())
        .expect("chunk 1 should open with the tail of chunk 0");
    assert!(pos > prev.len() / 2);

    let doc = h.ctx.store.get_document(&id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Ready);
    assert_eq!(doc.length_tokens, Some(report.total_tokens as i64));
}

#[tokio::test]
async fn test_repeated_word_is_force_split() {
    let h = harness(Arc::new(KeywordEmbedder::new())).await;
    let body = vec!["cell"; 3000].join(" ");
    let id = upload(&h, "u1", "repeat.txt", &body, Visibility::Private).await;

    let report = h.ctx.processor().process_document(&id).await.unwrap();
    assert!(report.chunks >= 4);
    for chunk in h.ctx.store.list_chunks(&id).await.unwrap() {
        assert!(chunk.tokens <= 800);
    }
}

#[tokio::test]
async fn test_empty_scope_skips_embedding_and_query() {
    let embedder = Arc::new(KeywordEmbedder::new());
    let h = harness(embedder.clone()).await;

    let results = h
        .ctx
        .search()
        .search_scoped("what is a cell", "tutor-empty", &SearchOptions::default())
        .await
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_provider_failure_mid_batch_persists_nothing() {
    // max_batch_size is 2, so a ten-chunk document needs several calls.
    let h = harness(Arc::new(KeywordEmbedder::failing_after(1))).await;
    let body = vec!["cell"; 3000].join(" ");
    let id = upload(&h, "u1", "doomed.txt", &body, Visibility::Private).await;

    let err = h.ctx.processor().process_document(&id).await.unwrap_err();
    assert_eq!(err.stage(), "embed");
    assert!(err.to_string().contains("connection reset"));

    let doc = h.ctx.store.get_document(&id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Error);
    assert_eq!(h.ctx.store.chunk_count(&id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_reprocessing_is_idempotent() {
    let h = harness(Arc::new(KeywordEmbedder::new())).await;
    let id = upload(&h, "u1", "again.txt", &lesson(1500, "cell"), Visibility::Private).await;
    let processor = h.ctx.processor();

    let first = processor.process_document(&id).await.unwrap();
    let second = processor.process_document(&id).await.unwrap();

    assert_eq!(first.chunks, second.chunks);
    assert_eq!(first.total_tokens, second.total_tokens);
    assert_eq!(h.ctx.store.chunk_count(&id).await.unwrap(), second.chunks);
}

#[tokio::test]
async fn test_search_respects_threshold_owner_and_scope() {
    let h = harness(Arc::new(KeywordEmbedder::new())).await;
    let cells = upload(&h, "u1", "cells.txt", &lesson(300, "cell"), Visibility::Private).await;
    let stars = upload(&h, "u2", "stars.txt", &lesson(300, "star"), Visibility::Private).await;
    let public = upload(&h, "u2", "open.txt", &lesson(300, "cell"), Visibility::Public).await;
    let processor = h.ctx.processor();
    for id in [&cells, &stars, &public] {
        processor.process_document(id).await.unwrap();
    }
    let search = h.ctx.search();

    let opts = SearchOptions {
        threshold: 0.9,
        ..Default::default()
    };
    let results = search.search("cell", &opts).await.unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.similarity >= 0.9));
    assert!(results.iter().all(|r| r.document_id != stars));
    for pair in results.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }

    // u1 sees its own and public documents, never u2's private ones.
    let opts = SearchOptions {
        threshold: 0.0,
        owner_id: Some("u1".into()),
        limit: 100,
        ..Default::default()
    };
    let results = search.search("star", &opts).await.unwrap();
    assert!(results.iter().all(|r| r.document_id != stars));
    assert!(results.iter().any(|r| r.document_id == public));

    h.ctx.store.link_document("tutor-bio", &cells).await.unwrap();
    let scoped = SearchOptions {
        threshold: 0.0,
        limit: 100,
        ..Default::default()
    };
    let results = search
        .search_scoped("cell", "tutor-bio", &scoped)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.document_id == cells));
}

#[tokio::test]
async fn test_chunk_stats_per_owner() {
    let h = harness(Arc::new(KeywordEmbedder::new())).await;
    let a = upload(&h, "u1", "a.txt", &lesson(1200, "cell"), Visibility::Private).await;
    let b = upload(&h, "u2", "b.txt", &lesson(200, "star"), Visibility::Private).await;
    let processor = h.ctx.processor();
    let report = processor.process_document(&a).await.unwrap();
    processor.process_document(&b).await.unwrap();

    let stats = h.ctx.store.chunk_stats("u1").await.unwrap();
    assert_eq!(stats.total_chunks, report.chunks as i64);
    assert_eq!(stats.total_tokens, report.total_tokens as i64);
    assert_eq!(stats.documents_with_embeddings, 1);
}
