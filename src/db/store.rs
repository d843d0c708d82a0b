//! Collection-level operations on top of a [`VectorIndex`].
use std::sync::Arc;

use tracing::{debug, info};

use super::models::{DocumentChunk, MemoryEntry, SearchResult};
use super::{Collection, Metadata, MetadataFilter, StoreError, VectorIndex, VectorRecord};

/// Minimum similarity a match needs unless the caller says otherwise.
pub const DEFAULT_THRESHOLD: f32 = 0.7;

/// `top_k` used when enumerating every record behind a filter.
pub const ENUMERATE_TOP_K: usize = 10_000;

/// Owns the documents and memory collections of one index.
#[derive(Clone)]
pub struct VectorStore {
    index: Arc<dyn VectorIndex>,
    dimensions: usize,
}

impl VectorStore {
    pub fn new(index: Arc<dyn VectorIndex>, dimensions: usize) -> Self {
        Self { index, dimensions }
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<(), StoreError> {
        if vector.len() == self.dimensions {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            })
        }
    }

    /// Insert or overwrite a single record.
    pub async fn upsert(
        &self,
        collection: Collection,
        id: String,
        vector: Vec<f32>,
        metadata: Metadata,
    ) -> Result<(), StoreError> {
        self.check_dimensions(&vector)?;
        self.index
            .upsert(
                collection,
                vec![VectorRecord {
                    id,
                    values: vector,
                    metadata,
                }],
            )
            .await
    }

    /// Store every chunk of a document with its vector, in one upsert.
    pub async fn upsert_chunks(
        &self,
        chunks: &[DocumentChunk],
        vectors: Vec<Vec<f32>>,
    ) -> Result<(), StoreError> {
        if chunks.len() != vectors.len() {
            return Err(StoreError::RecordMismatch {
                records: chunks.len(),
                vectors: vectors.len(),
            });
        }
        for vector in &vectors {
            self.check_dimensions(vector)?;
        }

        let records = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, values)| VectorRecord {
                id: chunk.id.clone(),
                values,
                metadata: chunk.to_metadata(),
            })
            .collect();

        self.index.upsert(Collection::Documents, records).await?;
        debug!(count = chunks.len(), "stored document chunks");
        Ok(())
    }

    pub async fn upsert_memory(
        &self,
        entry: &MemoryEntry,
        vector: Vec<f32>,
    ) -> Result<(), StoreError> {
        self.upsert(
            Collection::Memory,
            entry.id.clone(),
            vector,
            entry.to_metadata(),
        )
        .await
    }

    /// Similarity search keeping only matches with `score >= threshold`.
    pub async fn search(
        &self,
        collection: Collection,
        vector: &[f32],
        top_k: usize,
        threshold: f32,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>, StoreError> {
        self.check_dimensions(vector)?;
        let matches = self.index.query(collection, vector, top_k, filter).await?;

        Ok(matches
            .into_iter()
            .filter_map(|m| {
                let score = m.score.unwrap_or(0.0);
                (score >= threshold).then(|| SearchResult::from_parts(m.id, m.metadata, score))
            })
            .take(top_k)
            .collect())
    }

    /// Every record matching `filter`, via a broad zero-vector query.
    ///
    /// Unscored matches get a score of 1.0.
    pub async fn list_by_filter(
        &self,
        collection: Collection,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let zero = vec![0.0; self.dimensions];
        let matches = self
            .index
            .query(collection, &zero, ENUMERATE_TOP_K, Some(filter))
            .await?;

        Ok(matches
            .into_iter()
            .map(|m| SearchResult::from_parts(m.id, m.metadata, m.score.unwrap_or(1.0)))
            .collect())
    }

    /// The record stored under `id`, scored 1.0.
    pub async fn get(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<SearchResult>, StoreError> {
        let found = self.index.fetch(collection, &[id.to_string()]).await?;
        Ok(found
            .into_iter()
            .find(|m| m.id == id)
            .map(|m| SearchResult::from_parts(m.id, m.metadata, 1.0)))
    }

    pub async fn delete_by_id(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        self.index.delete(collection, &[id.to_string()]).await
    }

    pub async fn delete_by_ids(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.index.delete(collection, ids).await
    }

    /// Enumerate the ids behind `filter` and delete them. Returns how many
    /// were deleted; zero matches is a successful no-op.
    pub async fn delete_by_filter(
        &self,
        collection: Collection,
        filter: &MetadataFilter,
    ) -> Result<usize, StoreError> {
        let ids: Vec<String> = self
            .list_by_filter(collection, filter)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();

        if ids.is_empty() {
            debug!(collection = %collection, "delete_by_filter matched nothing");
            return Ok(0);
        }

        self.index.delete(collection, &ids).await?;
        info!(collection = %collection, count = ids.len(), "deleted vectors by filter");
        Ok(ids.len())
    }

    pub async fn count(&self, collection: Collection) -> Result<u64, StoreError> {
        self.index.count(collection).await
    }

    pub async fn clear(&self, collection: Collection) -> Result<(), StoreError> {
        self.index.clear(collection).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewMemory;
    use crate::db::sqlite::SqliteIndex;
    use crate::indexer::FileType;
    use chrono::Utc;
    use serde_json::json;

    const DIMS: usize = 3;

    fn store() -> VectorStore {
        VectorStore::new(Arc::new(SqliteIndex::open_in_memory(DIMS).unwrap()), DIMS)
    }

    fn chunk(id: &str, source: &str, content: &str) -> DocumentChunk {
        DocumentChunk {
            id: id.to_string(),
            content: content.to_string(),
            source: source.to_string(),
            filename: source.rsplit('/').next().unwrap_or(source).to_string(),
            chunk_index: 0,
            total_chunks: 1,
            created_at: Utc::now(),
            file_type: FileType::Text,
            file_size: content.len() as u64,
        }
    }

    #[tokio::test]
    async fn test_search_applies_threshold_and_surfaces_content() {
        let store = store();
        store
            .upsert_chunks(
                &[
                    chunk("c1", "a.txt", "exact match"),
                    chunk("c2", "b.txt", "unrelated"),
                ],
                vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
            )
            .await
            .unwrap();

        let results = store
            .search(Collection::Documents, &[1.0, 0.0, 0.0], 10, 0.7, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "c1");
        assert_eq!(results[0].content, "exact match");
        assert_eq!(results[0].metadata["source"], json!("a.txt"));
        assert!(results[0].score >= 0.7);
    }

    #[tokio::test]
    async fn test_search_respects_top_k() {
        let store = store();
        let chunks: Vec<DocumentChunk> = (0..5)
            .map(|i| chunk(&format!("c{i}"), "a.txt", "same"))
            .collect();
        let vectors = vec![vec![1.0, 0.0, 0.0]; 5];
        store.upsert_chunks(&chunks, vectors).await.unwrap();

        let results = store
            .search(Collection::Documents, &[1.0, 0.0, 0.0], 2, 0.0, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_rejects_mismatched_dimensions_before_storage() {
        let store = store();
        let err = store
            .upsert_chunks(&[chunk("c1", "a.txt", "x")], vec![vec![1.0, 0.0]])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));

        let err = store
            .upsert_chunks(&[chunk("c1", "a.txt", "x")], vec![])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::RecordMismatch {
                records: 1,
                vectors: 0
            }
        ));
        assert_eq!(store.count(Collection::Documents).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_by_filter_only_touches_matching_source() {
        let store = store();
        store
            .upsert_chunks(
                &[
                    chunk("a0", "docs/a.txt", "a zero"),
                    chunk("a1", "docs/a.txt", "a one"),
                    chunk("b0", "docs/a.txt.bak", "b zero"),
                ],
                vec![vec![1.0, 0.0, 0.0], vec![0.9, 0.1, 0.0], vec![1.0, 0.0, 0.0]],
            )
            .await
            .unwrap();

        let filter = MetadataFilter::new().field("source", "docs/a.txt");
        let deleted = store
            .delete_by_filter(Collection::Documents, &filter)
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let remaining = store
            .search(Collection::Documents, &[1.0, 0.0, 0.0], 10, 0.5, None)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "b0");
    }

    #[tokio::test]
    async fn test_delete_by_filter_without_matches_is_noop() {
        let store = store();
        let filter = MetadataFilter::new().field("source", "nowhere.txt");
        let deleted = store
            .delete_by_filter(Collection::Documents, &filter)
            .await
            .unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let store = store();
        store
            .upsert_chunks(&[chunk("c1", "a.txt", "hello")], vec![vec![1.0, 0.0, 0.0]])
            .await
            .unwrap();

        let found = store.get(Collection::Documents, "c1").await.unwrap().unwrap();
        assert_eq!(found.content, "hello");
        assert!(store.get(Collection::Documents, "nope").await.unwrap().is_none());
        assert!(store.get(Collection::Memory, "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_filter_defaults_score() {
        let store = store();
        let entry = MemoryEntry::new(
            "m1".to_string(),
            NewMemory {
                content: "prefers dark mode".to_string(),
                agent_id: "agent-1".to_string(),
                session_id: "s".to_string(),
                ..NewMemory::default()
            },
        );
        store
            .upsert_memory(&entry, vec![0.0, 0.0, 1.0])
            .await
            .unwrap();

        let filter = MetadataFilter::new().field("agentId", "agent-1");
        let results = store
            .list_by_filter(Collection::Memory, &filter)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "m1");
        assert_eq!(results[0].content, "prefers dark mode");
        assert!((results[0].score - 1.0).abs() < f32::EPSILON);
    }
}
