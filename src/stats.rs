//! Per-owner statistics.
//!
//! Summarizes what an owner has indexed: chunk and token totals from
//! [`Store::chunk_stats`], plus a breakdown of documents by status. Used by
//! `trag stats <owner>` to check that processing is keeping up.

use anyhow::Result;
use sqlx::Row;

use tutor_rag_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

struct DocumentRow {
    title: String,
    status: String,
    chunk_count: i64,
    length_tokens: Option<i64>,
    updated_at: i64,
}

/// Query the database and print a summary for `owner_id`.
pub async fn run_stats(config: &Config, owner_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let stats = store.chunk_stats(owner_id).await?;

    let status_rows = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM documents WHERE owner_id = ? GROUP BY status ORDER BY status",
    )
    .bind(owner_id)
    .fetch_all(&pool)
    .await?;

    let doc_rows = sqlx::query(
        r#"
        SELECT
            d.title,
            d.status,
            d.length_tokens,
            d.updated_at,
            COUNT(c.id) AS chunk_count
        FROM documents d
        LEFT JOIN document_chunks c ON c.document_id = d.id
        WHERE d.owner_id = ?
        GROUP BY d.id
        ORDER BY d.updated_at DESC
        "#,
    )
    .bind(owner_id)
    .fetch_all(&pool)
    .await?;

    let documents: Vec<DocumentRow> = doc_rows
        .iter()
        .map(|row| DocumentRow {
            title: row.get("title"),
            status: row.get("status"),
            chunk_count: row.get("chunk_count"),
            length_tokens: row.get("length_tokens"),
            updated_at: row.get("updated_at"),
        })
        .collect();

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("tutor-rag stats for {}", owner_id);
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", documents.len());
    println!("  Embedded:    {}", stats.documents_with_embeddings);
    println!("  Chunks:      {}", stats.total_chunks);
    println!("  Tokens:      {}", stats.total_tokens);

    if !status_rows.is_empty() {
        println!();
        println!("  By status:");
        for row in &status_rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            println!("    {:<12} {}", status, n);
        }
    }

    if !documents.is_empty() {
        println!();
        println!(
            "  {:<32} {:<11} {:>7} {:>8}  UPDATED",
            "TITLE", "STATUS", "CHUNKS", "TOKENS"
        );
        for doc in &documents {
            println!(
                "  {:<32} {:<11} {:>7} {:>8}  {}",
                truncate(&doc.title, 32),
                doc.status,
                doc.chunk_count,
                doc.length_tokens
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                format_ts_relative(doc.updated_at)
            );
        }
    }

    println!();
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max - 1).collect();
        out.push('…');
        out
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Unix timestamp as a relative time ("3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
