use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::Metadata;
use crate::indexer::FileType;

/// A contiguous slice of a source document's extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChunk {
    pub id: String,
    pub content: String,
    pub source: String,
    pub filename: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub created_at: DateTime<Utc>,
    pub file_type: FileType,
    pub file_size: u64,
}

impl DocumentChunk {
    /// Metadata stored next to the vector. `content` is included so search
    /// results can be rendered without another lookup.
    #[must_use]
    pub fn to_metadata(&self) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert("content".into(), json!(self.content));
        meta.insert("source".into(), json!(self.source));
        meta.insert("filename".into(), json!(self.filename));
        meta.insert("chunkIndex".into(), json!(self.chunk_index));
        meta.insert("totalChunks".into(), json!(self.total_chunks));
        meta.insert("createdAt".into(), json!(self.created_at.to_rfc3339()));
        meta.insert("fileType".into(), json!(self.file_type.as_str()));
        meta.insert("fileSize".into(), json!(self.file_size));
        meta
    }
}

fn default_category() -> String {
    "general".to_string()
}

fn default_importance() -> i64 {
    5
}

/// An agent-authored note. Immutable once stored; updates are delete + re-add.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    pub agent_id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_category")]
    pub category: String,
    /// Intended range 1–10; not enforced.
    #[serde(default = "default_importance")]
    pub importance: i64,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Caller-supplied fields for a new memory entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewMemory {
    pub content: String,
    pub agent_id: String,
    pub session_id: String,
    pub category: Option<String>,
    pub importance: Option<i64>,
    pub tags: Vec<String>,
}

impl MemoryEntry {
    #[must_use]
    pub fn new(id: String, input: NewMemory) -> Self {
        Self {
            id,
            content: input.content,
            agent_id: input.agent_id,
            session_id: input.session_id,
            created_at: Utc::now(),
            category: input.category.unwrap_or_else(default_category),
            importance: input.importance.unwrap_or_else(default_importance),
            tags: input.tags,
        }
    }

    #[must_use]
    pub fn to_metadata(&self) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert("content".into(), json!(self.content));
        meta.insert("agentId".into(), json!(self.agent_id));
        meta.insert("sessionId".into(), json!(self.session_id));
        meta.insert("createdAt".into(), json!(self.created_at.to_rfc3339()));
        meta.insert("category".into(), json!(self.category));
        meta.insert("importance".into(), json!(self.importance));
        meta.insert("tags".into(), json!(self.tags));
        meta
    }
}

/// A ranked match. Order is the index's descending-score order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    pub score: f32,
}

impl SearchResult {
    /// Build a result from stored metadata, surfacing its `content` field.
    #[must_use]
    pub fn from_parts(id: String, metadata: Metadata, score: f32) -> Self {
        let content = metadata
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            id,
            content,
            metadata,
            score,
        }
    }
}
