//! Per-document pipeline: fetch → parse → chunk → embed → persist.
//!
//! The [`Processor`] owns the document status state machine:
//!
//! ```text
//! processing ──▶ ready   (every stage succeeded, chunks committed atomically)
//!      │
//!      └──────▶ error   (any stage failed, no chunk rows remain)
//! ```
//!
//! Stage failures short-circuit the rest of the pipeline and come back as
//! a [`PipelineError`] whose message carries the stage prefix. The
//! processor never retries. Re-running it is safe because the final write
//! replaces the document's whole chunk set.
//!
//! With a deadline set, a run that overruns it is abandoned and the
//! document goes to `error` like any other failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::Instrument;

use tutor_rag_core::chunk::{chunk_document, estimate_tokens, ChunkingMetadata, ChunkingOptions};
use tutor_rag_core::embedding::{embed_batch, EmbeddingProvider, EmbeddingUsage};
use tutor_rag_core::error::{PipelineError, StoreError};
use tutor_rag_core::models::{Document, DocumentStatus, NewChunk, ParseMetadata};
use tutor_rag_core::store::Store;

use crate::extract::parse_document;
use crate::storage::ObjectStorage;

/// Outcome of one successful pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingReport {
    pub document_id: String,
    pub chunks: usize,
    pub total_tokens: usize,
    pub embedding: EmbeddingUsage,
    pub parse: ParseMetadata,
    pub chunking: ChunkingMetadata,
}

/// Tally over a batch of pipeline runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_tokens: usize,
    pub total_chunks: usize,
    pub average_tokens_per_chunk: f64,
}

impl ProcessingStats {
    pub fn from_reports(reports: &[ProcessingReport], failed: usize) -> Self {
        let total_tokens: usize = reports.iter().map(|r| r.total_tokens).sum();
        let total_chunks: usize = reports.iter().map(|r| r.chunks).sum();
        let average_tokens_per_chunk = if total_chunks == 0 {
            0.0
        } else {
            total_tokens as f64 / total_chunks as f64
        };
        Self {
            total: reports.len() + failed,
            successful: reports.len(),
            failed,
            total_tokens,
            total_chunks,
            average_tokens_per_chunk,
        }
    }
}

/// Runs the pipeline for one document at a time.
#[derive(Clone)]
pub struct Processor {
    store: Arc<dyn Store>,
    storage: Arc<dyn ObjectStorage>,
    embedder: Arc<dyn EmbeddingProvider>,
    options: ChunkingOptions,
    deadline: Option<Duration>,
}

impl Processor {
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn ObjectStorage>,
        embedder: Arc<dyn EmbeddingProvider>,
        options: ChunkingOptions,
    ) -> Self {
        Self {
            store,
            storage,
            embedder,
            options,
            deadline: None,
        }
    }

    /// Abandon any run that takes longer than `limit`.
    pub fn with_deadline(mut self, limit: Duration) -> Self {
        self.deadline = Some(limit);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.storage
    }

    /// Download a document's bytes from object storage and process them.
    pub async fn process_document(&self, document_id: &str) -> Result<ProcessingReport, PipelineError> {
        let span = tracing::info_span!("process", document_id = %document_id);
        async {
            let doc = self.begin(document_id).await?;
            let outcome = self
                .bounded(async {
                    let bytes = self.storage.download(&doc.storage_path).await?;
                    tracing::debug!(bytes = bytes.len(), path = %doc.storage_path, "fetched");
                    self.run(&doc, &bytes, &doc.storage_path, &doc.mime_type).await
                })
                .await;
            self.finish(document_id, outcome).await
        }
        .instrument(span)
        .await
    }

    /// Process bytes already in memory for an existing document record.
    pub async fn process_buffer(
        &self,
        document_id: &str,
        bytes: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<ProcessingReport, PipelineError> {
        let span = tracing::info_span!("process", document_id = %document_id);
        async {
            let doc = self.begin(document_id).await?;
            let outcome = self
                .bounded(self.run(&doc, bytes, filename, mime_type))
                .await;
            self.finish(document_id, outcome).await
        }
        .instrument(span)
        .await
    }

    /// Load the record and put it (back) into `processing`.
    async fn begin(&self, document_id: &str) -> Result<Document, PipelineError> {
        let doc = self
            .store
            .get_document(document_id)
            .await
            .map_err(PipelineError::Load)?
            .ok_or_else(|| PipelineError::Load(StoreError::NotFound(document_id.to_string())))?;
        if doc.status != DocumentStatus::Processing {
            self.store
                .set_status(document_id, DocumentStatus::Processing)
                .await
                .map_err(PipelineError::Load)?;
        }
        Ok(doc)
    }

    async fn bounded(
        &self,
        run: impl Future<Output = Result<ProcessingReport, PipelineError>>,
    ) -> Result<ProcessingReport, PipelineError> {
        match self.deadline {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .unwrap_or(Err(PipelineError::Timeout {
                    secs: limit.as_secs(),
                })),
            None => run.await,
        }
    }

    async fn finish(
        &self,
        document_id: &str,
        outcome: Result<ProcessingReport, PipelineError>,
    ) -> Result<ProcessingReport, PipelineError> {
        match outcome {
            Ok(report) => {
                tracing::info!(
                    chunks = report.chunks,
                    tokens = report.total_tokens,
                    cost = report.embedding.cost,
                    "document ready"
                );
                Ok(report)
            }
            Err(err) => {
                tracing::error!(stage = err.stage(), error = %err, "document processing failed");
                if let Err(mark_err) = self.store.fail_document(document_id).await {
                    tracing::error!(error = %mark_err, "could not mark document as failed");
                }
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        doc: &Document,
        bytes: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<ProcessingReport, PipelineError> {
        let parsed = parse_document(bytes, filename, mime_type)?;
        tracing::info!(
            chars = parsed.metadata.char_count,
            words = parsed.metadata.word_count,
            "parsed"
        );

        let options = self.options.relaxed_for(estimate_tokens(&parsed.text));
        let chunking = chunk_document(&parsed.text, &options)?;
        tracing::info!(
            chunks = chunking.total_chunks,
            tokens = chunking.total_tokens,
            min_tokens = options.min_tokens,
            "chunked"
        );

        let texts: Vec<String> = chunking.chunks.iter().map(|c| c.text.clone()).collect();
        let batch = embed_batch(self.embedder.as_ref(), &texts).await?;
        tracing::info!(
            embeddings = batch.embeddings.len(),
            tokens = batch.total_tokens,
            model = %batch.model,
            "embedded"
        );

        let rows: Vec<NewChunk> = chunking
            .chunks
            .iter()
            .zip(&batch.embeddings)
            .map(|(chunk, embedding)| NewChunk {
                chunk_index: chunk.index as i64,
                text: chunk.text.clone(),
                tokens: chunk.tokens as i64,
                embedding: embedding.vector.clone(),
            })
            .collect();
        self.store
            .commit_chunks(&doc.id, &rows, chunking.total_tokens as i64)
            .await?;

        Ok(ProcessingReport {
            document_id: doc.id.clone(),
            chunks: rows.len(),
            total_tokens: chunking.total_tokens,
            embedding: batch.usage(),
            parse: parsed.metadata,
            chunking: chunking.metadata,
        })
    }
}
