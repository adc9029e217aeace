//! # tutor-rag
//!
//! Document ingestion and similarity retrieval for grounded tutor chat.
//!
//! Uploaded files are parsed to text, split into overlapping token-bounded
//! chunks, embedded, and stored in SQLite. At question time the query is
//! embedded and the closest chunks, optionally restricted to an owner or
//! to the documents linked to a tutor, are returned as prompt context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────────────────┐   ┌──────────┐
//! │ Storage  │──▶│ Processor                     │──▶│  SQLite  │
//! │ local/S3 │   │ parse → chunk → embed → commit│   │  chunks  │
//! └──────────┘   └───────────────────────────────┘   └────┬─────┘
//!                                                         │
//!                              ┌──────────────────────────┤
//!                              ▼                          ▼
//!                         ┌──────────┐              ┌──────────┐
//!                         │   CLI    │              │   HTTP   │
//!                         │  (trag)  │              │  (axum)  │
//!                         └──────────┘              └──────────┘
//! ```
//!
//! Chunking, embedding utilities, the [`Store`](tutor_rag_core::store::Store)
//! trait and similarity search live in `tutor-rag-core`; this crate adds
//! the I/O-bound pieces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`context`] | Service wiring shared by CLI and server |
//! | [`extract`] | Text extraction for PDF, DOC, DOCX, PPTX, TXT, MD |
//! | [`embedding`] | OpenAI and Ollama embedding providers |
//! | [`processor`] | Per-document pipeline and status transitions |
//! | [`sqlite_store`] | SQLite [`Store`](tutor_rag_core::store::Store) backend |
//! | [`storage`] / [`storage_s3`] | Object storage for uploaded bytes |
//! | [`seed`] | Batch seeding |
//! | [`server`] | HTTP API |
//! | [`db`] / [`migrate`] | Database connection and schema |

pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod processor;
pub mod retry;
pub mod search;
pub mod seed;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod storage;
pub mod storage_s3;
