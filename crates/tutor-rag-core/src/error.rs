//! Error types for the tutor-rag pipeline.
//!
//! Each pipeline stage has its own error enum. [`PipelineError`] wraps
//! them with a stage prefix so callers can tell which stage failed from
//! the message alone (`parse: ...`, `embed: ...`).

use thiserror::Error;

/// Minimum number of characters a parsed document must contain.
pub const MIN_CONTENT_CHARS: usize = 50;

/// Parser failures. All are fatal for the document.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error(
        "document content too short: {chars} characters extracted from {bytes} bytes (minimum {min})"
    )]
    EmptyContent {
        chars: usize,
        bytes: usize,
        min: usize,
    },

    #[error("failed to decode {format}: {message}")]
    Decode {
        format: &'static str,
        message: String,
    },
}

impl ParseError {
    pub fn decode(format: &'static str, err: impl std::fmt::Display) -> Self {
        ParseError::Decode {
            format,
            message: err.to_string(),
        }
    }
}

/// Chunker failures.
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("no chunks generated: text has {tokens} tokens, minimum {min_tokens} required")]
    NoContent { tokens: usize, min_tokens: usize },

    #[error("invalid chunking options: {0}")]
    InvalidConfig(String),
}

/// Embedding provider failures. No partial vector set is ever returned.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedding provider error: {0}")]
    Provider(String),

    #[error("invalid embedding input: {0}")]
    InvalidInput(String),
}

/// Document store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("query failed: {0}")]
    Query(String),
}

/// Object storage failures.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage request failed: {0}")]
    Request(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A per-document pipeline failure, tagged with the stage that failed.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("load: {0}")]
    Load(StoreError),

    #[error("fetch: {0}")]
    Fetch(#[from] StorageError),

    #[error("parse: {0}")]
    Parse(#[from] ParseError),

    #[error("chunk: {0}")]
    Chunk(#[from] ChunkError),

    #[error("embed: {0}")]
    Embed(#[from] EmbedError),

    #[error("persist: {0}")]
    Persist(#[from] StoreError),

    #[error("timeout: processing exceeded {secs}s")]
    Timeout { secs: u64 },
}

impl PipelineError {
    /// Name of the stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Load(_) => "load",
            PipelineError::Fetch(_) => "fetch",
            PipelineError::Parse(_) => "parse",
            PipelineError::Chunk(_) => "chunk",
            PipelineError::Embed(_) => "embed",
            PipelineError::Persist(_) => "persist",
            PipelineError::Timeout { .. } => "timeout",
        }
    }
}

/// Similarity search failures.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("failed to embed query: {0}")]
    Embed(#[from] EmbedError),

    #[error("vector search failed: {0}")]
    Store(#[from] StoreError),

    #[error("invalid search options: {0}")]
    InvalidOptions(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_format_display() {
        let err = ParseError::UnsupportedFormat("image/png".to_string());
        assert_eq!(err.to_string(), "unsupported file type: image/png");
    }

    #[test]
    fn test_empty_content_reports_counts() {
        let err = ParseError::EmptyContent {
            chars: 40,
            bytes: 41,
            min: MIN_CONTENT_CHARS,
        };
        let msg = err.to_string();
        assert!(msg.contains("40 characters"));
        assert!(msg.contains("41 bytes"));
        assert!(msg.contains("minimum 50"));
    }

    #[test]
    fn test_decode_preserves_cause() {
        let err = ParseError::decode("pdf", "xref table is corrupt");
        assert_eq!(err.to_string(), "failed to decode pdf: xref table is corrupt");
    }

    #[test]
    fn test_pipeline_error_stage_prefix() {
        let err: PipelineError = EmbedError::Provider("429 Too Many Requests".into()).into();
        assert_eq!(err.stage(), "embed");
        assert_eq!(
            err.to_string(),
            "embed: embedding provider error: 429 Too Many Requests"
        );

        let err: PipelineError = ChunkError::NoContent {
            tokens: 0,
            min_tokens: 500,
        }
        .into();
        assert!(err.to_string().starts_with("chunk: no chunks generated"));

        let err: PipelineError = StoreError::Persistence("disk full".into()).into();
        assert_eq!(err.to_string(), "persist: persistence failed: disk full");
    }

    #[test]
    fn test_load_is_not_persist() {
        let err = PipelineError::Load(StoreError::NotFound("doc-1".into()));
        assert_eq!(err.stage(), "load");
        assert_eq!(err.to_string(), "load: document not found: doc-1");
    }

    #[test]
    fn test_storage_io_from() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: PipelineError = StorageError::from(io).into();
        assert_eq!(err.stage(), "fetch");
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_timeout_stage() {
        let err = PipelineError::Timeout { secs: 30 };
        assert_eq!(err.stage(), "timeout");
        assert_eq!(err.to_string(), "timeout: processing exceeded 30s");
    }
}
