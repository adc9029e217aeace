//! # tutor-rag core
//!
//! Runtime-agnostic logic for the tutor-rag pipeline: data models, the
//! error taxonomy, the token-budgeted chunker, the embedding provider
//! trait with cost accounting, the [`Store`](store::Store) abstraction
//! and similarity search.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network code.
//! Concrete providers and stores live in the `tutor-rag` app crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod search;
pub mod store;
