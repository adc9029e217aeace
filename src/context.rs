//! Wiring of configured services.
//!
//! [`AppContext`] builds each service once from a [`Config`] and hands
//! them out as `Arc<dyn Trait>`. The CLI and the HTTP server both work
//! through it; tests build one from in-memory parts with
//! [`AppContext::new`].

use std::sync::Arc;

use anyhow::Result;

use tutor_rag_core::embedding::EmbeddingProvider;
use tutor_rag_core::search::SimilaritySearch;
use tutor_rag_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::processor::Processor;
use crate::sqlite_store::SqliteStore;
use crate::storage::{create_storage, ObjectStorage};

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub storage: Arc<dyn ObjectStorage>,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

impl AppContext {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        storage: Arc<dyn ObjectStorage>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            storage,
            embedder,
        }
    }

    /// Connect to the database and build the configured storage backend
    /// and embedding provider.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
        let storage = create_storage(&config.storage)?;
        let embedder = create_provider(&config.embedding)?;
        Ok(Self::new(config.clone(), store, storage, embedder))
    }

    pub fn processor(&self) -> Processor {
        Processor::new(
            self.store.clone(),
            self.storage.clone(),
            self.embedder.clone(),
            self.config.chunking,
        )
    }

    pub fn search(&self) -> SimilaritySearch {
        SimilaritySearch::new(self.store.clone(), self.embedder.clone())
    }
}
