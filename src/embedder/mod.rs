//! Embedding provider trait, shared error type and vector math.
//!
//! Providers turn a batch of texts into fixed-dimension vectors; the
//! [`client::EmbeddingClient`] adds batching, retries and shape checks.
pub mod client;
pub mod http;
pub mod mock;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("authentication failed: invalid embedding API key")]
    Auth,

    #[error("rate limit exceeded: back off before retrying")]
    RateLimited,

    #[error("model is warming up: retry shortly")]
    ModelLoading,

    #[error("embedding provider error {status}: {reason}")]
    Upstream { status: u16, reason: String },

    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("vector dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
}

/// Capability interface for an embedding backend.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed every text in one request. Implementations may drop malformed
    /// vectors, so the output can be shorter than the input.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Cosine similarity of two equally long vectors.
///
/// Returns 0 when either vector has zero magnitude.
pub fn similarity(a: &[f32], b: &[f32]) -> Result<f32, EmbedderError> {
    if a.len() != b.len() {
        return Err(EmbedderError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}
