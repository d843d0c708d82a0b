//! Batching, retry and shape validation around an [`EmbeddingProvider`].
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{EmbedderError, EmbeddingProvider};
use crate::config::EmbeddingConfig;

/// Text sent by [`EmbeddingClient::test_connection`].
const CONNECTION_TEST_TEXT: &str = "connection test";

/// Pacing for [`EmbeddingClient::embed_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub batch_size: usize,
    pub max_retries: u32,
    /// Pause between successful batches while more remain.
    pub batch_delay: Duration,
    /// Failed attempt `n` (1-based) waits `retry_base * 2^n`.
    pub retry_base: Duration,
}

impl From<&EmbeddingConfig> for BatchOptions {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            batch_delay: Duration::from_millis(config.batch_delay_ms),
            retry_base: Duration::from_millis(config.retry_base_ms),
        }
    }
}

#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    options: BatchOptions,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, options: BatchOptions) -> Self {
        Self { provider, options }
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    #[must_use]
    pub fn options(&self) -> BatchOptions {
        self.options
    }

    /// One provider call for all `texts`, order preserved.
    ///
    /// The provider may drop invalid vectors, so the result can be shorter
    /// than the input; use [`Self::embed_batch`] when counts must line up.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.provider.embed(texts).await
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        match (vectors.pop(), vectors.is_empty()) {
            (Some(vector), true) => Ok(vector),
            (popped, _) => Err(EmbedderError::CountMismatch {
                expected: 1,
                actual: vectors.len() + usize::from(popped.is_some()),
            }),
        }
    }

    /// [`Self::embed_batch`] with the configured batch size and retry ceiling.
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        self.embed_batch(texts, self.options.batch_size, self.options.max_retries)
            .await
    }

    /// Embed `texts` in sequential groups of `batch_size`.
    ///
    /// Each group is retried up to `max_retries` attempts with exponential
    /// backoff; once a group exhausts its attempts the whole call fails. A
    /// group that comes back with the wrong number of vectors fails at once.
    pub async fn embed_batch(
        &self,
        texts: &[String],
        batch_size: usize,
        max_retries: u32,
    ) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch_size = batch_size.max(1);
        let total_batches = texts.len().div_ceil(batch_size);
        let mut vectors = Vec::with_capacity(texts.len());

        for (n, batch) in texts.chunks(batch_size).enumerate() {
            let embedded = self.embed_with_retry(batch, n + 1, max_retries).await?;
            if embedded.len() != batch.len() {
                return Err(EmbedderError::CountMismatch {
                    expected: batch.len(),
                    actual: embedded.len(),
                });
            }
            vectors.extend(embedded);
            debug!(batch = n + 1, total_batches, "embedded batch");

            if n + 1 < total_batches && !self.options.batch_delay.is_zero() {
                tokio::time::sleep(self.options.batch_delay).await;
            }
        }

        Ok(vectors)
    }

    async fn embed_with_retry(
        &self,
        batch: &[String],
        batch_number: usize,
        max_retries: u32,
    ) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let attempts = max_retries.max(1);
        let mut attempt = 1;

        loop {
            match self.provider.embed(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(EmbedderError::Auth) => return Err(EmbedderError::Auth),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    let delay = self.options.retry_base * 2u32.saturating_pow(attempt);
                    warn!(
                        batch = batch_number,
                        attempt,
                        max_retries = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying embedding batch"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Embed a short test string and check the vector's length. Never fails.
    pub async fn test_connection(&self) -> bool {
        match self.embed(&[CONNECTION_TEST_TEXT.to_string()]).await {
            Ok(vectors) => {
                let ok = vectors.len() == 1 && vectors[0].len() == self.dimensions();
                if ok {
                    info!(model = self.provider.model_name(), "embedding provider reachable");
                } else {
                    warn!(
                        returned = vectors.len(),
                        "test embedding returned an unexpected shape"
                    );
                }
                ok
            }
            Err(e) => {
                warn!("embedding connection test failed: {e}");
                false
            }
        }
    }
}
