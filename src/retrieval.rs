//! Retrieval orchestrator: ingest, search, removal, stats and the memory
//! lifecycle on top of the embedding client and the vector store.
//!
//! Mutating operations never raise; they report through [`OperationResult`].
//! Searches propagate failures as [`RetrievalError`].
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use ignore::WalkBuilder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, EmbeddingProviderKind, VectorBackend};
use crate::db::models::{MemoryEntry, NewMemory, SearchResult};
use crate::db::remote::RemoteIndex;
use crate::db::sqlite::SqliteIndex;
use crate::db::store::VectorStore;
use crate::db::{Collection, MetadataFilter, StoreError, VectorIndex};
use crate::embedder::client::{BatchOptions, EmbeddingClient};
use crate::embedder::http::HttpEmbedder;
use crate::embedder::mock::MockEmbedder;
use crate::embedder::{EmbedderError, EmbeddingProvider};
use crate::indexer::chunker::{self, ChunkOptions};
use crate::indexer::extract::extract_text_async;
use crate::indexer::{self, IndexError};

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedderError),

    #[error("vector store failed: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Index(#[from] IndexError),

    #[error("{0} must not be empty")]
    EmptyInput(&'static str),

    #[error("memory {0} not found")]
    MemoryNotFound(String),
}

/// Outcome of a mutating operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl OperationResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            chunks: None,
            id: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            chunks: None,
            id: None,
        }
    }

    fn with_chunks(mut self, chunks: usize) -> Self {
        self.chunks = Some(chunks);
        self
    }

    fn with_id(mut self, id: String) -> Self {
        self.id = Some(id);
        self
    }
}

/// Per-file tally of a directory ingest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryReport {
    pub indexed: usize,
    /// Files whose extension is not allowed.
    pub skipped: usize,
    pub failed: usize,
    pub chunks: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub documents: u64,
    pub memory: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ClearScope {
    Files,
    Memory,
    All,
}

impl ClearScope {
    fn collections(self) -> &'static [Collection] {
        match self {
            Self::Files => &[Collection::Documents],
            Self::Memory => &[Collection::Memory],
            Self::All => &Collection::ALL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionReport {
    pub embedding: bool,
    pub model_dimensions: usize,
    pub stats: Stats,
}

/// Overrides for a single search. Unset fields fall back to the config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub threshold: Option<f32>,
    pub filter: MetadataFilter,
}

#[derive(Clone)]
pub struct RetrievalService {
    config: Config,
    embedder: EmbeddingClient,
    store: VectorStore,
}

impl RetrievalService {
    pub fn new(config: Config, embedder: EmbeddingClient, store: VectorStore) -> Self {
        Self {
            config,
            embedder,
            store,
        }
    }

    /// Build the provider and index named by `config`. The config is
    /// expected to have passed [`Config::validate`].
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let dimensions = config.embedding.dimensions;

        let provider: Arc<dyn EmbeddingProvider> = match config.embedding.provider {
            EmbeddingProviderKind::Http => Arc::new(
                HttpEmbedder::new(&config.embedding).context("failed to build embedding client")?,
            ),
            EmbeddingProviderKind::Mock => Arc::new(MockEmbedder::new(dimensions)),
        };

        let store_config = &config.vector_store;
        let index: Arc<dyn VectorIndex> = match store_config.backend {
            VectorBackend::Sqlite => Arc::new(
                SqliteIndex::open(&store_config.db_path, dimensions).with_context(|| {
                    format!("failed to open vector database: {}", store_config.db_path)
                })?,
            ),
            VectorBackend::Remote => Arc::new(
                RemoteIndex::new(
                    store_config.api_key.clone().unwrap_or_default(),
                    store_config.documents_url.clone().unwrap_or_default(),
                    store_config.memory_url.clone().unwrap_or_default(),
                )
                .context("failed to build vector store client")?,
            ),
        };

        info!(
            provider = provider.model_name(),
            dimensions,
            backend = ?store_config.backend,
            "retrieval service ready"
        );

        let embedder = EmbeddingClient::new(provider, BatchOptions::from(&config.embedding));
        let store = VectorStore::new(index, dimensions);
        Ok(Self::new(config, embedder, store))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    // ── Documents ────────────────────────────────────────────────────

    /// Validate, extract, chunk, embed and store one file.
    pub async fn ingest_document(&self, path: &Path) -> OperationResult {
        match self.try_ingest(path).await {
            Ok(count) => {
                info!(path = %path.display(), chunks = count, "ingested document");
                OperationResult::ok(format!(
                    "Successfully ingested {} ({count} chunks)",
                    path.display()
                ))
                .with_chunks(count)
            }
            Err(e) => {
                warn!(path = %path.display(), "ingest failed: {e}");
                OperationResult::failed(format!("Failed to ingest {}: {e}", path.display()))
            }
        }
    }

    async fn try_ingest(&self, path: &Path) -> Result<usize, RetrievalError> {
        let file = indexer::inspect_file(path, &self.config.ingest)?;
        let text = extract_text_async(path.to_path_buf(), file.file_type).await?;

        let chunks = chunker::chunk(&text, &file, ChunkOptions::from(&self.config.ingest));
        if chunks.is_empty() {
            return Err(IndexError::EmptyContent(file.source).into());
        }
        debug!(source = %file.source, chunks = chunks.len(), "chunked document");

        // Every chunk is embedded before anything is written.
        let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_documents(&contents).await?;

        // A re-ingest replaces the chunks from the previous run of this source.
        let filter = MetadataFilter::new().field("source", file.source.as_str());
        let previous: Vec<String> = self
            .store
            .list_by_filter(Collection::Documents, &filter)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();

        self.store.upsert_chunks(&chunks, vectors).await?;
        if !previous.is_empty() {
            self.store
                .delete_by_ids(Collection::Documents, &previous)
                .await?;
            debug!(source = %file.source, replaced = previous.len(), "replaced previous chunks");
        }
        Ok(chunks.len())
    }

    /// Ingest every allowed file under `dir`, honouring `.gitignore`.
    pub async fn ingest_directory(&self, dir: &Path) -> Result<DirectoryReport, RetrievalError> {
        if !dir.is_dir() {
            return Err(IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("not a directory: {}", dir.display()),
            ))
            .into());
        }

        let mut report = DirectoryReport::default();
        let walker = WalkBuilder::new(dir)
            .hidden(false)
            .filter_entry(|entry| entry.file_name() != OsStr::new(".git"))
            .build();

        for entry in walker.filter_map(Result::ok) {
            let path = entry.path();
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            if !self
                .config
                .is_extension_allowed(&indexer::extension_of(path))
            {
                report.skipped += 1;
                continue;
            }

            match self.try_ingest(path).await {
                Ok(count) => {
                    report.indexed += 1;
                    report.chunks += count;
                }
                Err(e) => {
                    warn!(path = %path.display(), "ingest failed: {e}");
                    report.failed += 1;
                    report.errors.push(format!("{}: {e}", path.display()));
                }
            }
        }

        info!(
            dir = %dir.display(),
            indexed = report.indexed,
            skipped = report.skipped,
            failed = report.failed,
            "directory ingest finished"
        );
        Ok(report)
    }

    pub async fn search_documents(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        self.search(Collection::Documents, query, options).await
    }

    /// Delete every chunk whose `source` equals `source`.
    pub async fn remove_document(&self, source: &str) -> OperationResult {
        let source = source.replace('\\', "/");
        let filter = MetadataFilter::new().field("source", source.as_str());
        match self
            .store
            .delete_by_filter(Collection::Documents, &filter)
            .await
        {
            Ok(0) => OperationResult::ok(format!("No chunks found for {source}")).with_chunks(0),
            Ok(n) => OperationResult::ok(format!("Removed {n} chunks of {source}")).with_chunks(n),
            Err(e) => OperationResult::failed(format!("Failed to remove {source}: {e}")),
        }
    }

    // ── Memory ───────────────────────────────────────────────────────

    /// Store a new memory under a freshly generated id.
    pub async fn add_memory(&self, input: NewMemory) -> OperationResult {
        match self.store_memory(input).await {
            Ok(id) => OperationResult::ok("Memory stored").with_id(id),
            Err(e) => OperationResult::failed(format!("Failed to add memory: {e}")),
        }
    }

    async fn store_memory(&self, input: NewMemory) -> Result<String, RetrievalError> {
        let entry = self.prepare_memory(input)?;
        let vector = self.embedder.embed_query(&entry.content).await?;
        self.store.upsert_memory(&entry, vector).await?;
        debug!(id = %entry.id, agent = %entry.agent_id, "stored memory");
        Ok(entry.id)
    }

    fn prepare_memory(&self, input: NewMemory) -> Result<MemoryEntry, RetrievalError> {
        if input.content.trim().is_empty() {
            return Err(RetrievalError::EmptyInput("content"));
        }
        if input.agent_id.trim().is_empty() {
            return Err(RetrievalError::EmptyInput("agent_id"));
        }
        Ok(MemoryEntry::new(Uuid::new_v4().to_string(), input))
    }

    /// Replace a memory: the new content is stored under a new id, then the
    /// old entry is deleted. The old entry survives any failure before that.
    pub async fn update_memory(&self, id: &str, input: NewMemory) -> OperationResult {
        let stored = async {
            if self.store.get(Collection::Memory, id).await?.is_none() {
                return Err(RetrievalError::MemoryNotFound(id.to_string()));
            }
            self.store_memory(input).await
        }
        .await;

        let new_id = match stored {
            Ok(new_id) => new_id,
            Err(e) => {
                return OperationResult::failed(format!("Failed to update memory {id}: {e}"));
            }
        };

        match self.store.delete_by_id(Collection::Memory, id).await {
            Ok(()) => {
                info!(old = %id, new = %new_id, "updated memory");
                OperationResult::ok(format!("Memory {id} replaced")).with_id(new_id)
            }
            Err(e) => {
                warn!(old = %id, new = %new_id, "old memory not deleted: {e}");
                OperationResult::failed(format!(
                    "Stored updated memory as {new_id} but failed to delete {id}: {e}"
                ))
                .with_id(new_id)
            }
        }
    }

    pub async fn remove_memory(&self, id: &str) -> OperationResult {
        match self.store.delete_by_id(Collection::Memory, id).await {
            Ok(()) => OperationResult::ok(format!("Memory {id} removed")),
            Err(e) => OperationResult::failed(format!("Failed to remove memory {id}: {e}")),
        }
    }

    /// Similarity search over memories, optionally restricted to one agent.
    pub async fn search_memory(
        &self,
        query: &str,
        agent_id: Option<&str>,
        mut options: SearchOptions,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        if let Some(agent) = agent_id.filter(|a| !a.is_empty()) {
            options.filter = options
                .filter
                .merge(MetadataFilter::new().field("agentId", agent));
        }
        self.search(Collection::Memory, query, options).await
    }

    /// Every memory stored by `agent_id`.
    pub async fn get_memory_by_agent(
        &self,
        agent_id: &str,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        if agent_id.trim().is_empty() {
            return Err(RetrievalError::EmptyInput("agent_id"));
        }
        let filter = MetadataFilter::new().field("agentId", agent_id);
        Ok(self.store.list_by_filter(Collection::Memory, &filter).await?)
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Vector counts per collection; any failure reports zeros for both.
    pub async fn stats(&self) -> Stats {
        let counts = async {
            let documents = self.store.count(Collection::Documents).await?;
            let memory = self.store.count(Collection::Memory).await?;
            Ok::<_, StoreError>((documents, memory))
        }
        .await;

        match counts {
            Ok((documents, memory)) => Stats {
                documents,
                memory,
                total: documents + memory,
            },
            Err(e) => {
                warn!("failed to read store stats: {e}");
                Stats::default()
            }
        }
    }

    pub async fn clear(&self, scope: ClearScope) -> OperationResult {
        for &collection in scope.collections() {
            if let Err(e) = self.store.clear(collection).await {
                warn!(collection = %collection, "clear failed: {e}");
                return OperationResult::failed(format!("Failed to clear {collection}: {e}"));
            }
            info!(collection = %collection, "cleared collection");
        }
        OperationResult::ok(match scope {
            ClearScope::Files => "Cleared all documents",
            ClearScope::Memory => "Cleared all memories",
            ClearScope::All => "Cleared all documents and memories",
        })
    }

    pub async fn check_connection(&self) -> ConnectionReport {
        ConnectionReport {
            embedding: self.embedder.test_connection().await,
            model_dimensions: self.embedder.dimensions(),
            stats: self.stats().await,
        }
    }

    async fn search(
        &self,
        collection: Collection,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<SearchResult>, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::EmptyInput("query"));
        }
        let limit = options.limit.unwrap_or(self.config.search.limit);
        let threshold = options.threshold.unwrap_or(self.config.search.threshold);

        let vector = self.embedder.embed_query(query).await?;
        let filter = (!options.filter.is_empty()).then_some(&options.filter);
        let results = self
            .store
            .search(collection, &vector, limit, threshold, filter)
            .await?;
        debug!(collection = %collection, found = results.len(), "search finished");
        Ok(results)
    }
}
