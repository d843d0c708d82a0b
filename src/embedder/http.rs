//! HTTP embedding provider for feature-extraction inference endpoints.
//!
//! Posts `{"inputs": [...], "options": {...}}` with a bearer token and expects
//! a JSON array holding one vector per input.
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{EmbedderError, EmbeddingProvider};
use crate::config::EmbeddingConfig;

pub struct HttpEmbedder {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    wait_for_model: bool,
    use_cache: bool,
}

#[derive(Serialize)]
struct FeatureRequest<'a> {
    inputs: &'a [String],
    options: RequestOptions,
}

#[derive(Serialize)]
struct RequestOptions {
    wait_for_model: bool,
    use_cache: bool,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            wait_for_model: config.wait_for_model,
            use_cache: config.use_cache,
        })
    }
}

/// Map a failed HTTP status to its typed error.
fn classify_status(status: reqwest::StatusCode, body: &str) -> EmbedderError {
    match status.as_u16() {
        401 | 403 => EmbedderError::Auth,
        429 => EmbedderError::RateLimited,
        503 => EmbedderError::ModelLoading,
        code => {
            let body = body.trim();
            let reason = if body.is_empty() {
                status.canonical_reason().unwrap_or("unknown").to_string()
            } else {
                body.to_string()
            };
            EmbedderError::Upstream {
                status: code,
                reason,
            }
        }
    }
}

/// Keep the elements that are numeric vectors of exactly `dimensions`
/// entries; anything else is dropped with a warning.
fn parse_embeddings(value: Value, dimensions: usize) -> Result<Vec<Vec<f32>>, EmbedderError> {
    let Value::Array(items) = value else {
        return Err(EmbedderError::InvalidResponse(
            "expected a JSON array of vectors".to_string(),
        ));
    };

    let mut vectors = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let parsed: Option<Vec<f32>> = item.as_array().and_then(|values| {
            values
                .iter()
                .map(|v| v.as_f64().map(|f| f as f32))
                .collect()
        });

        match parsed {
            Some(vector) if vector.len() == dimensions => vectors.push(vector),
            Some(vector) => warn!(
                index = i,
                got = vector.len(),
                expected = dimensions,
                "dropping embedding with wrong dimensions"
            ),
            None => warn!(index = i, "dropping malformed embedding"),
        }
    }

    Ok(vectors)
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = FeatureRequest {
            inputs: texts,
            options: RequestOptions {
                wait_for_model: self.wait_for_model,
                use_cache: self.use_cache,
            },
        };

        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let value: Value = resp
            .json()
            .await
            .map_err(|e| EmbedderError::InvalidResponse(e.to_string()))?;
        let vectors = parse_embeddings(value, self.dimensions)?;
        debug!(
            requested = texts.len(),
            returned = vectors.len(),
            "embedding request completed"
        );
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use serde_json::json;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            EmbedderError::Auth
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            EmbedderError::RateLimited
        ));
        assert!(matches!(
            classify_status(
                StatusCode::SERVICE_UNAVAILABLE,
                r#"{"error":"Model is currently loading","estimated_time":20.0}"#
            ),
            EmbedderError::ModelLoading
        ));
    }

    #[test]
    fn test_classify_generic_failure_echoes_reason() {
        match classify_status(StatusCode::BAD_REQUEST, " input too long ") {
            EmbedderError::Upstream { status, reason } => {
                assert_eq!(status, 400);
                assert_eq!(reason, "input too long");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        match classify_status(StatusCode::INTERNAL_SERVER_ERROR, "") {
            EmbedderError::Upstream { status, reason } => {
                assert_eq!(status, 500);
                assert_eq!(reason, "Internal Server Error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_embeddings_valid() {
        let value = json!([[0.1, 0.2, 0.3], [1, 2, 3]]);
        let vectors = parse_embeddings(value, 3).unwrap();
        assert_eq!(vectors, vec![vec![0.1, 0.2, 0.3], vec![1.0, 2.0, 3.0]]);
    }

    #[test]
    fn test_parse_embeddings_drops_invalid_entries() {
        let value = json!([[0.1, 0.2, 0.3], [0.1, 0.2], "oops", [0.1, "x", 0.3], [0.4, 0.5, 0.6]]);
        let vectors = parse_embeddings(value, 3).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], vec![0.4, 0.5, 0.6]);
    }

    #[test]
    fn test_parse_embeddings_requires_array() {
        let err = parse_embeddings(json!({"error": "bad"}), 3).unwrap_err();
        assert!(matches!(err, EmbedderError::InvalidResponse(_)));
    }

    #[test]
    fn test_request_body_shape() {
        let inputs = vec!["hello".to_string()];
        let request = FeatureRequest {
            inputs: &inputs,
            options: RequestOptions {
                wait_for_model: true,
                use_cache: true,
            },
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"inputs": ["hello"], "options": {"wait_for_model": true, "use_cache": true}})
        );
    }

    #[tokio::test]
    async fn test_empty_input_skips_request() {
        let config = EmbeddingConfig {
            api_url: "http://127.0.0.1:9/unreachable".to_string(),
            api_key: Some("hf_test".to_string()),
            ..EmbeddingConfig::default()
        };
        let embedder = HttpEmbedder::new(&config).unwrap();
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
    }
}
