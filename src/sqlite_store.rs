//! SQLite-backed [`Store`] implementation.
//!
//! Chunk vectors are stored as little-endian `f32` blobs beside the chunk
//! text. Vector matching loads the candidate rows that pass the SQL
//! filters and scores them with cosine similarity in Rust.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use tutor_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use tutor_rag_core::error::StoreError;
use tutor_rag_core::models::{
    Chunk, ChunkStats, Document, DocumentStatus, NewChunk, NewDocument, SimilarityResult,
    Visibility,
};
use tutor_rag_core::store::{rank_matches, validate_chunk_rows, Store, VectorQuery};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn persist_err(e: sqlx::Error) -> StoreError {
    StoreError::Persistence(e.to_string())
}

fn query_err(e: sqlx::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

const DOCUMENT_COLUMNS: &str = "id, owner_id, title, description, storage_path, mime_type, \
     file_size, status, length_tokens, visibility, created_at, updated_at";

fn document_from_row(row: &SqliteRow) -> Result<Document, StoreError> {
    let status: String = row.get("status");
    let visibility: String = row.get("visibility");
    Ok(Document {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        description: row.get("description"),
        storage_path: row.get("storage_path"),
        mime_type: row.get("mime_type"),
        file_size: row.get("file_size"),
        status: status.parse::<DocumentStatus>().map_err(StoreError::Query)?,
        length_tokens: row.get("length_tokens"),
        visibility: visibility.parse::<Visibility>().map_err(StoreError::Query)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_document(&self, doc: NewDocument) -> Result<Document, StoreError> {
        let doc = Document::from_new(doc, now());
        sqlx::query(
            r#"
            INSERT INTO documents (id, owner_id, title, description, storage_path, mime_type,
                                   file_size, status, length_tokens, visibility,
                                   created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.owner_id)
        .bind(&doc.title)
        .bind(&doc.description)
        .bind(&doc.storage_path)
        .bind(&doc.mime_type)
        .bind(doc.file_size)
        .bind(doc.status.as_str())
        .bind(doc.length_tokens)
        .bind(doc.visibility.as_str())
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await
        .map_err(persist_err)?;

        Ok(doc)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err)?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn set_status(&self, id: &str, status: DocumentStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(persist_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn commit_chunks(
        &self,
        document_id: &str,
        chunks: &[NewChunk],
        length_tokens: i64,
    ) -> Result<(), StoreError> {
        let dims = validate_chunk_rows(chunks)?;
        let ts = now();

        // Dropping `tx` on any early return rolls the whole batch back.
        let mut tx = self.pool.begin().await.map_err(persist_err)?;

        let updated = sqlx::query(
            "UPDATE documents SET status = ?, length_tokens = ?, updated_at = ? WHERE id = ?",
        )
        .bind(DocumentStatus::Ready.as_str())
        .bind(length_tokens)
        .bind(ts)
        .bind(document_id)
        .execute(&mut *tx)
        .await
        .map_err(persist_err)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(document_id.to_string()));
        }

        sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(persist_err)?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO document_chunks (id, document_id, chunk_index, text, tokens,
                                             embedding, dims, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.tokens)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(dims as i64)
            .bind(ts)
            .execute(&mut *tx)
            .await
            .map_err(persist_err)?;
        }

        tx.commit().await.map_err(persist_err)?;
        Ok(())
    }

    async fn fail_document(&self, document_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(persist_err)?;

        sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(persist_err)?;

        let updated = sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE id = ?")
            .bind(DocumentStatus::Error.as_str())
            .bind(now())
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(persist_err)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(document_id.to_string()));
        }

        tx.commit().await.map_err(persist_err)?;
        Ok(())
    }

    async fn chunk_count(&self, document_id: &str) -> Result<usize, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await
                .map_err(query_err)?;
        Ok(count as usize)
    }

    async fn list_chunks(&self, document_id: &str) -> Result<Vec<Chunk>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, chunk_index, text, tokens, embedding, created_at
            FROM document_chunks
            WHERE document_id = ?
            ORDER BY chunk_index ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let embedding = blob_to_vec(&blob).ok_or_else(|| {
                    StoreError::Query(format!(
                        "corrupt embedding blob for chunk {}",
                        row.get::<String, _>("id")
                    ))
                })?;
                Ok(Chunk {
                    id: row.get("id"),
                    document_id: row.get("document_id"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    tokens: row.get("tokens"),
                    embedding,
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn link_document(&self, scope_id: &str, document_id: &str) -> Result<(), StoreError> {
        if self.get_document(document_id).await?.is_none() {
            return Err(StoreError::NotFound(document_id.to_string()));
        }
        sqlx::query(
            "INSERT OR IGNORE INTO tutor_documents (tutor_id, document_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(scope_id)
        .bind(document_id)
        .bind(now())
        .execute(&self.pool)
        .await
        .map_err(persist_err)?;
        Ok(())
    }

    async fn unlink_document(&self, scope_id: &str, document_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tutor_documents WHERE tutor_id = ? AND document_id = ?")
            .bind(scope_id)
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(persist_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn linked_document_ids(&self, scope_id: &str) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar(
            "SELECT document_id FROM tutor_documents WHERE tutor_id = ? ORDER BY document_id",
        )
        .bind(scope_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)
    }

    async fn match_chunks(&self, query: &VectorQuery) -> Result<Vec<SimilarityResult>, StoreError> {
        let mut sql: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.text, c.tokens, c.embedding, c.created_at
            FROM document_chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.status = 'ready'
            "#,
        );
        if let Some(ids) = &query.document_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push(" AND c.document_id IN (");
            let mut separated = sql.separated(", ");
            for id in ids {
                separated.push_bind(id.clone());
            }
            separated.push_unseparated(")");
        }
        if let Some(owner) = &query.owner_id {
            sql.push(" AND (d.owner_id = ")
                .push_bind(owner.clone())
                .push(" OR d.visibility = 'public')");
        }

        let rows = sql
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;

        let mut matches = Vec::new();
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let Some(vector) = blob_to_vec(&blob) else {
                tracing::warn!(chunk_id = %row.get::<String, _>("id"), "skipping corrupt embedding blob");
                continue;
            };
            let similarity = cosine_similarity(&query.embedding, &vector).clamp(0.0, 1.0);
            if similarity < query.threshold {
                continue;
            }
            matches.push(SimilarityResult {
                chunk_id: row.get("id"),
                document_id: row.get("document_id"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                tokens: row.get("tokens"),
                similarity,
                created_at: row.get("created_at"),
            });
        }

        rank_matches(&mut matches, query.limit);
        Ok(matches)
    }

    async fn chunk_stats(&self, owner_id: &str) -> Result<ChunkStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(c.id) AS total_chunks,
                   COALESCE(SUM(c.tokens), 0) AS total_tokens,
                   COUNT(DISTINCT c.document_id) AS documents_with_embeddings
            FROM document_chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.owner_id = ?
            "#,
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(query_err)?;

        Ok(ChunkStats {
            total_chunks: row.get("total_chunks"),
            total_tokens: row.get("total_tokens"),
            documents_with_embeddings: row.get("documents_with_embeddings"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let config = crate::config::parse_config(&format!(
            "[db]\npath = \"{}\"\n",
            tmp.path().join("test.sqlite").display()
        ))
        .unwrap();
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn new_doc(owner: &str, visibility: Visibility) -> NewDocument {
        NewDocument {
            owner_id: owner.into(),
            title: "Cells".into(),
            description: Some("Intro unit".into()),
            storage_path: format!("{}/cells.txt", owner),
            mime_type: "text/plain".into(),
            file_size: 1024,
            visibility,
        }
    }

    fn rows(vectors: &[[f32; 2]]) -> Vec<NewChunk> {
        vectors
            .iter()
            .enumerate()
            .map(|(i, v)| NewChunk {
                chunk_index: i as i64,
                text: format!("passage {}", i),
                tokens: 4,
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
    async fn test_document_roundtrip() {
        let (_tmp, store) = store().await;
        let doc = store.create_document(new_doc("u1", Visibility::Public)).await.unwrap();
        let loaded = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded, doc);
        assert_eq!(loaded.status, DocumentStatus::Processing);
        assert!(store.get_document("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_replaces_and_marks_ready() {
        let (_tmp, store) = store().await;
        let doc = store.create_document(new_doc("u1", Visibility::Private)).await.unwrap();

        store
            .commit_chunks(&doc.id, &rows(&[[1.0, 0.0], [0.0, 1.0], [0.5, 0.5]]), 12)
            .await
            .unwrap();
        store
            .commit_chunks(&doc.id, &rows(&[[1.0, 0.0], [0.0, 1.0]]), 8)
            .await
            .unwrap();

        let loaded = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Ready);
        assert_eq!(loaded.length_tokens, Some(8));

        let chunks = store.list_chunks(&doc.id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[1].embedding, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_invalid_batch_leaves_previous_state() {
        let (_tmp, store) = store().await;
        let doc = store.create_document(new_doc("u1", Visibility::Private)).await.unwrap();
        let mut bad = rows(&[[1.0, 0.0], [0.0, 1.0]]);
        bad[1].embedding = vec![1.0];

        let err = store.commit_chunks(&doc.id, &bad, 8).await.unwrap_err();
        assert!(matches!(err, StoreError::Persistence(_)));
        assert_eq!(store.chunk_count(&doc.id).await.unwrap(), 0);
        let loaded = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Processing);
    }

    #[tokio::test]
    async fn test_commit_unknown_document_is_not_found() {
        let (_tmp, store) = store().await;
        let err = store
            .commit_chunks("nope", &rows(&[[1.0, 0.0]]), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fail_document_deletes_chunks() {
        let (_tmp, store) = store().await;
        let doc = store.create_document(new_doc("u1", Visibility::Private)).await.unwrap();
        store.commit_chunks(&doc.id, &rows(&[[1.0, 0.0]]), 4).await.unwrap();

        store.fail_document(&doc.id).await.unwrap();
        assert_eq!(store.chunk_count(&doc.id).await.unwrap(), 0);
        let loaded = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Error);
    }

    #[tokio::test]
    async fn test_match_applies_threshold_and_order() {
        let (_tmp, store) = store().await;
        let doc = store.create_document(new_doc("u1", Visibility::Private)).await.unwrap();
        store
            .commit_chunks(&doc.id, &rows(&[[0.0, 1.0], [1.0, 0.0], [0.8, 0.6]]), 12)
            .await
            .unwrap();

        let results = store.match_chunks(&query([1.0, 0.0], 0.5)).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_index, 1);
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(results[1].chunk_index, 2);
        assert!(results.iter().all(|r| r.similarity >= 0.5));
    }

    #[tokio::test]
    async fn test_match_filters_owner_and_allowlist() {
        let (_tmp, store) = store().await;
        let mine = store.create_document(new_doc("u1", Visibility::Private)).await.unwrap();
        let public = store.create_document(new_doc("u2", Visibility::Public)).await.unwrap();
        let private = store.create_document(new_doc("u2", Visibility::Private)).await.unwrap();
        for doc in [&mine, &public, &private] {
            store.commit_chunks(&doc.id, &rows(&[[1.0, 0.0]]), 4).await.unwrap();
        }

        let mut q = query([1.0, 0.0], 0.0);
        q.owner_id = Some("u1".into());
        let ids: Vec<String> = store
            .match_chunks(&q)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.document_id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&mine.id) && ids.contains(&public.id));

        let mut q = query([1.0, 0.0], 0.0);
        q.document_ids = Some(vec![private.id.clone()]);
        let results = store.match_chunks(&q).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, private.id);
    }

    #[tokio::test]
    async fn test_links_and_stats() {
        let (_tmp, store) = store().await;
        let a = store.create_document(new_doc("u1", Visibility::Private)).await.unwrap();
        let b = store.create_document(new_doc("u1", Visibility::Private)).await.unwrap();
        store.commit_chunks(&a.id, &rows(&[[1.0, 0.0], [0.0, 1.0]]), 8).await.unwrap();

        store.link_document("tutor-1", &a.id).await.unwrap();
        store.link_document("tutor-1", &a.id).await.unwrap();
        store.link_document("tutor-1", &b.id).await.unwrap();
        let mut linked = store.linked_document_ids("tutor-1").await.unwrap();
        linked.sort();
        let mut expected = vec![a.id.clone(), b.id.clone()];
        expected.sort();
        assert_eq!(linked, expected);
        assert!(store.linked_document_ids("tutor-2").await.unwrap().is_empty());
        assert!(matches!(
            store.link_document("tutor-1", "missing").await,
            Err(StoreError::NotFound(_))
        ));

        assert!(store.unlink_document("tutor-1", &a.id).await.unwrap());
        assert!(!store.unlink_document("tutor-1", &a.id).await.unwrap());
        assert_eq!(store.linked_document_ids("tutor-1").await.unwrap(), vec![b.id.clone()]);

        let stats = store.chunk_stats("u1").await.unwrap();
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.total_tokens, 8);
        assert_eq!(stats.documents_with_embeddings, 1);
        assert_eq!(store.chunk_stats("nobody").await.unwrap(), ChunkStats::default());
    }
}
