//! Batch seeding of a fixed document set for one user.
//!
//! Each file is uploaded to object storage, recorded as a `processing`
//! document and run through the [`Processor`], strictly one at a time
//! with `seed.delay_ms` between documents. A failing document is
//! recorded and the run continues.
//!
//! When `[[seed.documents]]` is empty, every supported file under
//! `seed.content_dir` matching `seed.include_globs` is seeded, keyed by
//! its file stem.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use walkdir::WalkDir;

use tutor_rag_core::models::{NewDocument, Visibility};

use crate::config::{SeedConfig, SeedDocument};
use crate::extract::mime_from_filename;
use crate::processor::Processor;
use crate::storage::object_path;

#[derive(Debug, Clone, Serialize)]
pub struct SeedFailure {
    pub filename: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedReport {
    /// Category → document id, for documents that reached `ready`.
    pub documents: BTreeMap<String, String>,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<SeedFailure>,
}

/// Seed every manifest document for `user_id`.
pub async fn seed_documents(
    processor: &Processor,
    user_id: &str,
    seed: &SeedConfig,
) -> Result<SeedReport> {
    let manifest = if seed.documents.is_empty() {
        discover(&seed.content_dir, &seed.include_globs)?
    } else {
        seed.documents.clone()
    };

    let delay = Duration::from_millis(seed.delay_ms);
    let mut report = SeedReport::default();

    for (i, entry) in manifest.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let category = entry.category.clone().unwrap_or_else(|| stem(&entry.filename));
        match seed_one(processor, user_id, &seed.content_dir, entry).await {
            Ok(document_id) => {
                tracing::info!(filename = %entry.filename, document_id = %document_id, "seeded");
                report.documents.insert(category, document_id);
                report.succeeded += 1;
            }
            Err(e) => {
                tracing::warn!(filename = %entry.filename, error = %format!("{:#}", e), "seed failed");
                report.failed += 1;
                report.failures.push(SeedFailure {
                    filename: entry.filename.clone(),
                    error: format!("{:#}", e),
                });
            }
        }
    }

    Ok(report)
}

async fn seed_one(
    processor: &Processor,
    user_id: &str,
    content_dir: &Path,
    entry: &SeedDocument,
) -> Result<String> {
    let mime_type = mime_from_filename(&entry.filename)
        .with_context(|| format!("unsupported file type: {}", entry.filename))?;
    let path = content_dir.join(&entry.filename);
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let storage_path = object_path(user_id, &entry.filename);
    processor
        .storage()
        .upload(&storage_path, &bytes, mime_type)
        .await
        .context("upload")?;

    let doc = processor
        .store()
        .create_document(NewDocument {
            owner_id: user_id.to_string(),
            title: entry.title.clone().unwrap_or_else(|| stem(&entry.filename)),
            description: entry.description.clone(),
            storage_path,
            mime_type: mime_type.to_string(),
            file_size: bytes.len() as i64,
            visibility: entry.visibility,
        })
        .await
        .context("create document")?;

    processor.process_document(&doc.id).await?;
    Ok(doc.id)
}

/// Supported files under `root` matching `include_globs`, sorted by path.
fn discover(root: &Path, include_globs: &[String]) -> Result<Vec<SeedDocument>> {
    if !root.exists() {
        bail!("Seed content directory does not exist: {}", root.display());
    }
    let include_set = build_globset(include_globs)?;

    let mut found = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();
        if !include_set.is_match(&rel_str) || mime_from_filename(&rel_str).is_none() {
            continue;
        }
        found.push(SeedDocument {
            filename: rel_str,
            title: None,
            description: None,
            category: None,
            visibility: Visibility::Private,
        });
    }

    found.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(found)
}

fn stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
