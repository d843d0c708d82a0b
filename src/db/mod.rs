//! Vector index abstraction and its backends.
//!
//! [`VectorIndex`] is the capability surface every backend implements:
//! upsert, filtered similarity query, fetch and delete by id, count and
//! clear, each scoped to one of two named collections. [`store::VectorStore`]
//! layers threshold filtering and delete-by-filter on top.
use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod models;
pub mod remote;
pub mod sqlite;
pub mod store;

/// Arbitrary JSON metadata stored alongside each vector.
pub type Metadata = serde_json::Map<String, Value>;

/// Errors from a vector index backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("request to vector index failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("vector index returned {status}: {reason}")]
    Upstream { status: u16, reason: String },

    #[error("metadata serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid response from vector index: {0}")]
    InvalidResponse(String),

    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{records} records but {vectors} vectors")]
    RecordMismatch { records: usize, vectors: usize },
}

/// The two independent logical collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Documents,
    Memory,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Documents, Collection::Memory];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Documents => "documents",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A vector with its id and metadata, ready to upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Metadata,
}

/// A scored match returned by [`VectorIndex::query`].
///
/// `score` is `None` when the backend did not rank the match (for example a
/// zero query vector against the local index).
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub id: String,
    pub score: Option<f32>,
    pub metadata: Metadata,
}

/// Exact-match metadata filter: every key must equal its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    fields: BTreeMap<String, Value>,
}

impl MetadataFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key == value`.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Add every condition of `other`, overriding keys already present.
    #[must_use]
    pub fn merge(mut self, other: MetadataFilter) -> Self {
        self.fields.extend(other.fields);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    #[must_use]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.fields
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

/// Capability interface over a vector index holding both collections.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite records by id.
    async fn upsert(
        &self,
        collection: Collection,
        records: Vec<VectorRecord>,
    ) -> Result<(), StoreError>;

    /// Nearest neighbours by cosine similarity, best first.
    async fn query(
        &self,
        collection: Collection,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Match>, StoreError>;

    /// Records stored under `ids`, unscored. Unknown ids are omitted.
    async fn fetch(&self, collection: Collection, ids: &[String]) -> Result<Vec<Match>, StoreError>;

    /// Delete records by id. Unknown ids are ignored.
    async fn delete(&self, collection: Collection, ids: &[String]) -> Result<(), StoreError>;

    /// Total number of stored vectors.
    async fn count(&self, collection: Collection) -> Result<u64, StoreError>;

    /// Remove every record of a collection.
    async fn clear(&self, collection: Collection) -> Result<(), StoreError>;
}
