//! Remote vector index over HTTP.
//!
//! Speaks the Pinecone-style data-plane API: one index host per collection,
//! `Api-Key` header, JSON bodies for upsert/query/delete/stats.
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::{Collection, Match, Metadata, MetadataFilter, StoreError, VectorIndex, VectorRecord};

/// Records per upsert request.
const UPSERT_BATCH: usize = 100;

pub struct RemoteIndex {
    client: reqwest::Client,
    api_key: String,
    documents_url: String,
    memory_url: String,
}

#[derive(Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a Metadata,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<UpsertVector<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: std::collections::HashMap<String, FetchedVector>,
}

#[derive(Deserialize)]
struct FetchedVector {
    id: String,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    #[serde(default)]
    total_vector_count: u64,
}

impl RemoteIndex {
    pub fn new(
        api_key: impl Into<String>,
        documents_url: impl Into<String>,
        memory_url: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            documents_url: normalize_base_url(&documents_url.into()),
            memory_url: normalize_base_url(&memory_url.into()),
        })
    }

    fn endpoint(&self, collection: Collection, path: &str) -> String {
        let base = match collection {
            Collection::Documents => &self.documents_url,
            Collection::Memory => &self.memory_url,
        };
        format!("{base}/{path}")
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        collection: Collection,
        path: &str,
        body: &B,
    ) -> Result<R, StoreError> {
        let request = self.client.post(self.endpoint(collection, path)).json(body);
        self.send(request).await
    }

    async fn send<R: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<R, StoreError> {
        let resp = request.header("Api-Key", &self.api_key).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let reason = resp.text().await.unwrap_or_default();
            return Err(StoreError::Upstream {
                status: status.as_u16(),
                reason,
            });
        }

        resp.json::<R>()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// `{"key": {"$eq": value}, ...}`; multiple keys are AND-ed by the service.
fn filter_to_json(filter: &MetadataFilter) -> Value {
    let conditions: serde_json::Map<String, Value> = filter
        .iter()
        .map(|(key, value)| (key.clone(), json!({ "$eq": value })))
        .collect();
    Value::Object(conditions)
}

#[async_trait]
impl VectorIndex for RemoteIndex {
    async fn upsert(
        &self,
        collection: Collection,
        records: Vec<VectorRecord>,
    ) -> Result<(), StoreError> {
        for batch in records.chunks(UPSERT_BATCH) {
            let request = UpsertRequest {
                vectors: batch
                    .iter()
                    .map(|r| UpsertVector {
                        id: &r.id,
                        values: &r.values,
                        metadata: &r.metadata,
                    })
                    .collect(),
            };
            let _: Value = self.post(collection, "vectors/upsert", &request).await?;
            debug!(collection = %collection, count = batch.len(), "upserted vectors");
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: Collection,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Match>, StoreError> {
        let request = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            filter: filter.filter(|f| !f.is_empty()).map(filter_to_json),
        };
        let response: QueryResponse = self.post(collection, "query", &request).await?;

        Ok(response
            .matches
            .into_iter()
            .map(|m| Match {
                id: m.id,
                score: m.score,
                metadata: m.metadata.unwrap_or_default(),
            })
            .collect())
    }

    async fn fetch(&self, collection: Collection, ids: &[String]) -> Result<Vec<Match>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query: Vec<(&str, &str)> = ids.iter().map(|id| ("ids", id.as_str())).collect();
        let request = self
            .client
            .get(self.endpoint(collection, "vectors/fetch"))
            .query(&query);
        let response: FetchResponse = self.send(request).await?;

        Ok(response
            .vectors
            .into_values()
            .map(|v| Match {
                id: v.id,
                score: None,
                metadata: v.metadata.unwrap_or_default(),
            })
            .collect())
    }

    async fn delete(&self, collection: Collection, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let _: Value = self
            .post(collection, "vectors/delete", &json!({ "ids": ids }))
            .await?;
        Ok(())
    }

    async fn count(&self, collection: Collection) -> Result<u64, StoreError> {
        let stats: StatsResponse = self
            .post(collection, "describe_index_stats", &json!({}))
            .await?;
        Ok(stats.total_vector_count)
    }

    async fn clear(&self, collection: Collection) -> Result<(), StoreError> {
        let _: Value = self
            .post(collection, "vectors/delete", &json!({ "deleteAll": true }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> RemoteIndex {
        RemoteIndex::new(
            "pc-key",
            "https://docs-abc.svc.example.io/",
            "https://memory-abc.svc.example.io",
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_per_collection() {
        let index = index();
        assert_eq!(
            index.endpoint(Collection::Documents, "query"),
            "https://docs-abc.svc.example.io/query"
        );
        assert_eq!(
            index.endpoint(Collection::Memory, "vectors/upsert"),
            "https://memory-abc.svc.example.io/vectors/upsert"
        );
    }

    #[test]
    fn test_filter_to_json() {
        let filter = MetadataFilter::new()
            .field("agentId", "agent-1")
            .field("importance", 7);
        assert_eq!(
            filter_to_json(&filter),
            json!({
                "agentId": { "$eq": "agent-1" },
                "importance": { "$eq": 7 }
            })
        );
    }

    #[test]
    fn test_query_request_shape() {
        let filter = MetadataFilter::new().field("source", "a.txt");
        let request = QueryRequest {
            vector: &[0.5, 0.5],
            top_k: 3,
            include_metadata: true,
            filter: Some(filter_to_json(&filter)),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "vector": [0.5, 0.5],
                "topK": 3,
                "includeMetadata": true,
                "filter": { "source": { "$eq": "a.txt" } }
            })
        );
    }

    #[test]
    fn test_parse_query_response() {
        let body = json!({
            "matches": [
                { "id": "c1", "score": 0.91, "metadata": { "content": "hello" } },
                { "id": "c2" }
            ],
            "namespace": ""
        });
        let parsed: QueryResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.matches.len(), 2);
        assert!((parsed.matches[0].score.unwrap() - 0.91).abs() < 1e-6);
        assert!(parsed.matches[1].score.is_none());
        assert!(parsed.matches[1].metadata.is_none());
    }

    #[test]
    fn test_parse_fetch_response() {
        let body = json!({
            "vectors": {
                "m1": { "id": "m1", "values": [0.1, 0.2], "metadata": { "agentId": "a" } }
            },
            "namespace": ""
        });
        let parsed: FetchResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.vectors.len(), 1);
        assert_eq!(parsed.vectors["m1"].id, "m1");
        assert_eq!(
            parsed.vectors["m1"].metadata.as_ref().unwrap()["agentId"],
            json!("a")
        );

        let empty: FetchResponse = serde_json::from_value(json!({ "vectors": {} })).unwrap();
        assert!(empty.vectors.is_empty());
    }

    #[test]
    fn test_parse_stats_response() {
        let body = json!({ "dimension": 384, "totalVectorCount": 42, "namespaces": {} });
        let parsed: StatsResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.total_vector_count, 42);
    }
}
