//! Local vector index using SQLite and sqlite-vec.
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use sqlite_vec::sqlite3_vec_init;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info};

use super::{Collection, Match, Metadata, MetadataFilter, StoreError, VectorIndex, VectorRecord};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    item_id TEXT NOT NULL,
    metadata TEXT NOT NULL,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(collection, item_id)
);

CREATE INDEX IF NOT EXISTS idx_items_collection ON items(collection);
"#;

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Helper to serialize a float32 vector into bytes for vec0 virtual table
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Both collections in one database: `items` holds ids and JSON metadata,
/// `vec_items` the embeddings keyed by the same rowid.
pub struct SqliteIndex {
    conn: TokioMutex<Connection>,
    dimensions: usize,
}

impl SqliteIndex {
    /// Open (or create) the index at `path` for vectors of `dimensions` floats.
    pub fn open<P: AsRef<Path>>(path: P, dimensions: usize) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!("Initializing vector database: {}", path.display());

        init_sqlite_vec();
        let conn = Connection::open(path)?;
        Self::init(conn, dimensions)
    }

    /// Open an in-memory index (useful for testing).
    pub fn open_in_memory(dimensions: usize) -> Result<Self, StoreError> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::init(conn, dimensions)
    }

    fn init(conn: Connection, dimensions: usize) -> Result<Self, StoreError> {
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        debug!("sqlite-vec version: {}", vec_version);

        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_items USING vec0(embedding FLOAT[{dimensions}]);"
        ))?;

        Ok(Self {
            conn: TokioMutex::new(conn),
            dimensions,
        })
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
}

/// SQLite JSON path for a top-level metadata key.
fn json_path(key: &str) -> String {
    format!("$.\"{}\"", key.replace('"', ""))
}

/// Convert a filter value into what `json_extract` yields for it.
fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn is_zero_vector(vector: &[f32]) -> bool {
    vector.iter().all(|v| *v == 0.0)
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(
        &self,
        collection: Collection,
        records: Vec<VectorRecord>,
    ) -> Result<(), StoreError> {
        for record in &records {
            self.check_dimensions(&record.values)?;
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        for record in &records {
            let metadata = serde_json::to_string(&record.metadata)?;
            let rowid: i64 = tx.query_row(
                r#"
                INSERT INTO items (collection, item_id, metadata)
                VALUES (?, ?, ?)
                ON CONFLICT(collection, item_id) DO UPDATE SET
                    metadata = excluded.metadata,
                    updated_at = CURRENT_TIMESTAMP
                RETURNING id
                "#,
                params![collection.name(), record.id, metadata],
                |row| row.get(0),
            )?;

            // vec0 has no upsert; replace the row instead
            tx.execute("DELETE FROM vec_items WHERE rowid = ?", params![rowid])?;
            tx.execute(
                "INSERT INTO vec_items (rowid, embedding) VALUES (?, ?)",
                params![rowid, serialize_vector(&record.values)],
            )?;
        }

        tx.commit()?;
        debug!(collection = %collection, count = records.len(), "upserted vectors");
        Ok(())
    }

    async fn query(
        &self,
        collection: Collection,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Match>, StoreError> {
        self.check_dimensions(vector)?;
        let ranked = !is_zero_vector(vector);

        let mut query = if ranked {
            String::from(
                r#"
                SELECT i.item_id, i.metadata, vec_distance_cosine(v.embedding, ?) AS distance
                FROM vec_items v
                JOIN items i ON v.rowid = i.id
                WHERE i.collection = ?
                "#,
            )
        } else {
            String::from(
                r#"
                SELECT i.item_id, i.metadata, NULL AS distance
                FROM items i
                WHERE i.collection = ?
                "#,
            )
        };

        let mut params: Vec<SqlValue> = Vec::new();
        if ranked {
            params.push(SqlValue::Blob(serialize_vector(vector)));
        }
        params.push(SqlValue::Text(collection.name().to_string()));

        if let Some(filter) = filter {
            for (key, value) in filter.iter() {
                query.push_str(" AND json_extract(i.metadata, ?) IS ?");
                params.push(SqlValue::Text(json_path(key)));
                params.push(to_sql_value(value));
            }
        }

        if ranked {
            // Zero-magnitude rows have no cosine distance and must not take slots.
            query.push_str(" ORDER BY distance IS NULL, distance ASC LIMIT ?");
        } else {
            query.push_str(" ORDER BY i.id ASC LIMIT ?");
        }
        params.push(SqlValue::Integer(i64::try_from(top_k).unwrap_or(i64::MAX)));

        let rows: Vec<(String, String, Option<f64>)> = {
            let conn = self.conn.lock().await;
            let param_refs: Vec<&dyn rusqlite::ToSql> =
                params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
            let mut stmt = conn.prepare(&query)?;
            let mapped = stmt.query_map(param_refs.as_slice(), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            let rows = mapped.collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        rows.into_iter()
            .map(|(id, metadata, distance)| {
                let metadata: Metadata = serde_json::from_str(&metadata)?;
                Ok(Match {
                    id,
                    score: distance.map(|d| (1.0 - d) as f32),
                    metadata,
                })
            })
            .collect()
    }

    async fn fetch(&self, collection: Collection, ids: &[String]) -> Result<Vec<Match>, StoreError> {
        let rows: Vec<(String, String)> = {
            let conn = self.conn.lock().await;
            let mut stmt = conn
                .prepare("SELECT item_id, metadata FROM items WHERE collection = ? AND item_id = ?")?;
            let mut rows = Vec::new();
            for id in ids {
                let row = stmt
                    .query_row(params![collection.name(), id], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })
                    .optional()?;
                rows.extend(row);
            }
            rows
        };

        rows.into_iter()
            .map(|(id, metadata)| {
                Ok(Match {
                    id,
                    score: None,
                    metadata: serde_json::from_str(&metadata)?,
                })
            })
            .collect()
    }

    async fn delete(&self, collection: Collection, ids: &[String]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for id in ids {
            // Virtual table cascade deletion workaround
            tx.execute(
                "DELETE FROM vec_items WHERE rowid IN (SELECT id FROM items WHERE collection = ? AND item_id = ?)",
                params![collection.name(), id],
            )?;
            tx.execute(
                "DELETE FROM items WHERE collection = ? AND item_id = ?",
                params![collection.name(), id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn count(&self, collection: Collection) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE collection = ?",
            params![collection.name()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn clear(&self, collection: Collection) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM vec_items WHERE rowid IN (SELECT id FROM items WHERE collection = ?)",
            params![collection.name()],
        )?;
        tx.execute(
            "DELETE FROM items WHERE collection = ?",
            params![collection.name()],
        )?;
        tx.commit()?;
        info!(collection = %collection, "cleared collection");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DIMS: usize = 4;

    fn record(id: &str, values: [f32; DIMS], source: &str) -> VectorRecord {
        let mut metadata = Metadata::new();
        metadata.insert("content".into(), json!(format!("content of {id}")));
        metadata.insert("source".into(), json!(source));
        VectorRecord {
            id: id.to_string(),
            values: values.to_vec(),
            metadata,
        }
    }

    #[test]
    fn test_serialize_vector() {
        let vec = vec![1.0, 2.0, -3.5];
        let bytes = serialize_vector(&vec);
        assert_eq!(bytes.len(), 12);

        // 1.0f32 in hex: 0x3f800000 -> little endian: 00 00 80 3f
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        // -3.5f32 in hex: 0xc0600000 -> little endian: 00 00 60 c0
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x60, 0xc0]);
    }

    #[test]
    fn test_json_path_quotes_key() {
        assert_eq!(json_path("agentId"), "$.\"agentId\"");
        assert_eq!(json_path("we\"ird"), "$.\"weird\"");
    }

    #[tokio::test]
    async fn test_upsert_query_ranks_by_similarity() {
        let index = SqliteIndex::open_in_memory(DIMS).unwrap();
        index
            .upsert(
                Collection::Documents,
                vec![
                    record("near", [1.0, 0.0, 0.0, 0.0], "a.txt"),
                    record("far", [0.0, 1.0, 0.0, 0.0], "b.txt"),
                ],
            )
            .await
            .unwrap();

        let matches = index
            .query(Collection::Documents, &[1.0, 0.1, 0.0, 0.0], 10, None)
            .await
            .unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "near");
        assert!(matches[0].score.unwrap() > 0.99);
        assert!(matches[1].score.unwrap() < 0.2);
        assert_eq!(matches[0].metadata["source"], json!("a.txt"));
    }

    #[tokio::test]
    async fn test_zero_magnitude_rows_rank_last() {
        let index = SqliteIndex::open_in_memory(DIMS).unwrap();
        index
            .upsert(
                Collection::Memory,
                vec![
                    record("zero", [0.0, 0.0, 0.0, 0.0], "z"),
                    record("good", [1.0, 0.0, 0.0, 0.0], "g"),
                ],
            )
            .await
            .unwrap();

        let matches = index
            .query(Collection::Memory, &[1.0, 0.0, 0.0, 0.0], 1, None)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "good");
        assert!(matches[0].score.unwrap() > 0.99);

        let all = index
            .query(Collection::Memory, &[1.0, 0.0, 0.0, 0.0], 10, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].id, "zero");
        assert!(all[1].score.is_none_or(f32::is_nan));
    }

    #[tokio::test]
    async fn test_fetch_known_ids_only() {
        let index = SqliteIndex::open_in_memory(DIMS).unwrap();
        index
            .upsert(Collection::Memory, vec![record("m1", [1.0, 0.0, 0.0, 0.0], "x")])
            .await
            .unwrap();

        let found = index
            .fetch(Collection::Memory, &["m1".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "m1");
        assert_eq!(found[0].metadata["source"], json!("x"));

        let other = index
            .fetch(Collection::Documents, &["m1".to_string()])
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() {
        let index = SqliteIndex::open_in_memory(DIMS).unwrap();
        index
            .upsert(Collection::Memory, vec![record("m1", [1.0, 0.0, 0.0, 0.0], "x")])
            .await
            .unwrap();
        index
            .upsert(Collection::Memory, vec![record("m1", [0.0, 0.0, 1.0, 0.0], "y")])
            .await
            .unwrap();

        assert_eq!(index.count(Collection::Memory).await.unwrap(), 1);
        let matches = index
            .query(Collection::Memory, &[0.0, 0.0, 1.0, 0.0], 5, None)
            .await
            .unwrap();
        assert_eq!(matches[0].metadata["source"], json!("y"));
        assert!(matches[0].score.unwrap() > 0.99);
    }

    #[tokio::test]
    async fn test_collections_are_independent() {
        let index = SqliteIndex::open_in_memory(DIMS).unwrap();
        index
            .upsert(Collection::Documents, vec![record("same", [1.0, 0.0, 0.0, 0.0], "d")])
            .await
            .unwrap();
        index
            .upsert(Collection::Memory, vec![record("same", [1.0, 0.0, 0.0, 0.0], "m")])
            .await
            .unwrap();

        index.clear(Collection::Documents).await.unwrap();
        assert_eq!(index.count(Collection::Documents).await.unwrap(), 0);
        assert_eq!(index.count(Collection::Memory).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_filter_and_zero_vector_enumeration() {
        let index = SqliteIndex::open_in_memory(DIMS).unwrap();
        index
            .upsert(
                Collection::Documents,
                vec![
                    record("a0", [1.0, 0.0, 0.0, 0.0], "docs/a.txt"),
                    record("a1", [0.0, 1.0, 0.0, 0.0], "docs/a.txt"),
                    record("b0", [0.0, 0.0, 1.0, 0.0], "docs/b.txt"),
                ],
            )
            .await
            .unwrap();

        let filter = MetadataFilter::new().field("source", "docs/a.txt");
        let matches = index
            .query(Collection::Documents, &[0.0; DIMS], 10_000, Some(&filter))
            .await
            .unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a0", "a1"]);
        assert!(matches.iter().all(|m| m.score.is_none()));
    }

    #[tokio::test]
    async fn test_numeric_filter() {
        let index = SqliteIndex::open_in_memory(DIMS).unwrap();
        let mut high = record("high", [1.0, 0.0, 0.0, 0.0], "s");
        high.metadata.insert("importance".into(), json!(9));
        let mut low = record("low", [1.0, 0.0, 0.0, 0.0], "s");
        low.metadata.insert("importance".into(), json!(2));
        index.upsert(Collection::Memory, vec![high, low]).await.unwrap();

        let filter = MetadataFilter::new().field("importance", 9);
        let matches = index
            .query(Collection::Memory, &[1.0, 0.0, 0.0, 0.0], 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "high");
    }

    #[tokio::test]
    async fn test_delete_by_id() {
        let index = SqliteIndex::open_in_memory(DIMS).unwrap();
        index
            .upsert(
                Collection::Documents,
                vec![
                    record("keep", [1.0, 0.0, 0.0, 0.0], "k"),
                    record("drop", [0.0, 1.0, 0.0, 0.0], "d"),
                ],
            )
            .await
            .unwrap();

        index
            .delete(
                Collection::Documents,
                &["drop".to_string(), "missing".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(index.count(Collection::Documents).await.unwrap(), 1);
        let matches = index
            .query(Collection::Documents, &[0.0, 1.0, 0.0, 0.0], 10, None)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "keep");
    }

    #[tokio::test]
    async fn test_rejects_wrong_dimensions() {
        let index = SqliteIndex::open_in_memory(DIMS).unwrap();
        let bad = VectorRecord {
            id: "bad".to_string(),
            values: vec![1.0, 2.0],
            metadata: Metadata::new(),
        };
        let err = index.upsert(Collection::Documents, vec![bad]).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch {
                expected: 4,
                actual: 2
            }
        ));
        assert_eq!(index.count(Collection::Documents).await.unwrap(), 0);
    }
}
