//! Core data models for the tutor-rag pipeline.
//!
//! These types represent the documents, parsed text, persisted chunks and
//! similarity results that flow through ingestion and retrieval.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a [`Document`].
///
/// `Processing` is the initial state. `Ready` and `Error` are terminal for
/// a pipeline run; reprocessing starts again from `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Processing,
    Ready,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Error => "error",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(DocumentStatus::Processing),
            "ready" => Ok(DocumentStatus::Ready),
            "error" => Ok(DocumentStatus::Error),
            other => Err(format!("unknown document status: {}", other)),
        }
    }
}

/// Who may retrieve a document's chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Visibility::Private),
            "public" => Ok(Visibility::Public),
            other => Err(format!("unknown visibility: {}", other)),
        }
    }
}

/// A document record as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub storage_path: String,
    pub mime_type: String,
    pub file_size: i64,
    pub status: DocumentStatus,
    /// Total estimated tokens across all chunks, set when the document
    /// becomes `ready`.
    pub length_tokens: Option<i64>,
    pub visibility: Visibility,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Insert shape for a document. Status always starts as `processing`.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub storage_path: String,
    pub mime_type: String,
    pub file_size: i64,
    pub visibility: Visibility,
}

impl Document {
    /// Materialize a [`NewDocument`] with a fresh UUID and `processing` status.
    pub fn from_new(new: NewDocument, now: i64) -> Self {
        Document {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: new.owner_id,
            title: new.title,
            description: new.description,
            storage_path: new.storage_path,
            mime_type: new.mime_type,
            file_size: new.file_size,
            status: DocumentStatus::Processing,
            length_tokens: None,
            visibility: new.visibility,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Descriptive metadata extracted alongside the text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParseMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub page_count: Option<u32>,
    pub word_count: usize,
    pub char_count: usize,
}

/// Normalized text plus metadata produced by the parser.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub text: String,
    pub metadata: ParseMetadata,
}

/// Insert shape for a chunk row. The embedding is mandatory.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: i64,
    pub text: String,
    pub tokens: i64,
    pub embedding: Vec<f32>,
}

/// A persisted chunk of a document's text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub tokens: i64,
    pub embedding: Vec<f32>,
    pub created_at: i64,
}

/// A chunk matched by a vector query.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityResult {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub tokens: i64,
    /// Cosine similarity clamped to `[0.0, 1.0]`.
    pub similarity: f64,
    pub created_at: i64,
}

/// Per-owner chunk totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkStats {
    pub total_chunks: i64,
    pub total_tokens: i64,
    pub documents_with_embeddings: i64,
}
