//! Document commands: `add`, `process`, `link`, `seed`.
//!
//! `add` is the upload path: the file goes to object storage, a
//! `processing` record is created, and the pipeline runs inline. A
//! pipeline failure leaves the record in `error` and the command exits
//! non-zero.

use std::path::Path;

use anyhow::{bail, Context, Result};

use tutor_rag_core::models::{NewDocument, Visibility};

use crate::context::AppContext;
use crate::extract::mime_from_filename;
use crate::processor::{ProcessingReport, ProcessingStats};
use crate::seed::seed_documents;
use crate::storage::object_path;

/// Options for `trag add`.
#[derive(Debug, Clone)]
pub struct AddOptions {
    pub owner_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub visibility: Visibility,
}

/// Upload `path`, record it and run the pipeline.
pub async fn run_add(ctx: &AppContext, path: &Path, opts: AddOptions) -> Result<()> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .with_context(|| format!("Not a file path: {}", path.display()))?;
    let mime_type = mime_from_filename(&filename)
        .with_context(|| format!("Unsupported file type: {}", filename))?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let storage_path = object_path(&opts.owner_id, &filename);
    ctx.storage
        .upload(&storage_path, &bytes, mime_type)
        .await
        .with_context(|| format!("Failed to upload {}", storage_path))?;

    let title = opts.title.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| filename.clone())
    });
    let doc = ctx
        .store
        .create_document(NewDocument {
            owner_id: opts.owner_id,
            title,
            description: opts.description,
            storage_path,
            mime_type: mime_type.to_string(),
            file_size: bytes.len() as i64,
            visibility: opts.visibility,
        })
        .await?;

    let report = ctx
        .processor()
        .process_buffer(&doc.id, &bytes, &filename, mime_type)
        .await
        .with_context(|| format!("Processing failed for {} ({})", filename, doc.id))?;

    println!("add {}", filename);
    print_report(&report);
    println!("ok");
    Ok(())
}

/// Re-run the pipeline for existing documents.
pub async fn run_process(ctx: &AppContext, ids: &[String]) -> Result<()> {
    let processor = ctx.processor();
    let mut reports = Vec::new();
    let mut failed = 0usize;

    for id in ids {
        match processor.process_document(id).await {
            Ok(report) => {
                println!("process {}", id);
                print_report(&report);
                reports.push(report);
            }
            Err(e) => {
                eprintln!("process {} failed: {}", id, e);
                failed += 1;
            }
        }
    }

    let stats = ProcessingStats::from_reports(&reports, failed);
    if ids.len() > 1 {
        println!("processed {} documents", stats.total);
        println!("  successful: {}", stats.successful);
        println!("  failed: {}", stats.failed);
        println!("  chunks: {}", stats.total_chunks);
        println!("  avg tokens/chunk: {:.1}", stats.average_tokens_per_chunk);
    }
    if stats.failed > 0 {
        bail!("{} of {} documents failed", stats.failed, stats.total);
    }
    Ok(())
}

/// Link a document into a scope (tutor).
pub async fn run_link(ctx: &AppContext, scope_id: &str, document_id: &str) -> Result<()> {
    ctx.store.link_document(scope_id, document_id).await?;
    println!("linked {} -> {}", document_id, scope_id);
    Ok(())
}

/// Remove a document from a scope (tutor).
pub async fn run_unlink(ctx: &AppContext, scope_id: &str, document_id: &str) -> Result<()> {
    if ctx.store.unlink_document(scope_id, document_id).await? {
        println!("unlinked {} -> {}", document_id, scope_id);
    } else {
        println!("{} was not linked to {}", document_id, scope_id);
    }
    Ok(())
}

/// Seed the configured document set for `user_id`.
pub async fn run_seed(ctx: &AppContext, user_id: &str) -> Result<()> {
    let report = seed_documents(&ctx.processor(), user_id, &ctx.config.seed).await?;

    println!("seed {}", user_id);
    println!("  succeeded: {}", report.succeeded);
    println!("  failed: {}", report.failed);
    for (category, id) in &report.documents {
        println!("  {}: {}", category, id);
    }
    for failure in &report.failures {
        println!("  error {}: {}", failure.filename, failure.error);
    }
    Ok(())
}

fn print_report(report: &ProcessingReport) {
    println!("  document: {}", report.document_id);
    if let Some(title) = &report.parse.title {
        println!("  title: {}", title);
    }
    if let Some(pages) = report.parse.page_count {
        println!("  pages: {}", pages);
    }
    println!("  words: {}", report.parse.word_count);
    println!("  chunks: {}", report.chunks);
    println!("  tokens: {}", report.total_tokens);
    println!(
        "  embeddings: {} ({}, ${:.6})",
        report.embedding.embeddings_generated, report.embedding.model, report.embedding.cost
    );
}
