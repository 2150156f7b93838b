//! Embedding generation
//!
//! - `Embedder` is the batch contract used by both pipelines
//! - `HttpEmbedder` talks to an embedding server over HTTP
//! - `HashEmbedder` is a deterministic offline embedder

mod hash;
mod http_backend;

pub use hash::*;
pub use http_backend::*;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Scale a vector to unit length (zero vectors are returned unchanged)
pub fn normalize_embedding(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|v| v / norm).collect()
}

/// Trait for embedding providers.
///
/// `embed` must return exactly one vector per input, in input order, or an
/// error. Vector length is not checked here; callers compare it against the
/// configured dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Expected embedding dimension
    fn dimension(&self) -> usize;

    /// Model name recorded on vector records
    fn model_name(&self) -> &str;

    /// Provider label recorded on vector records
    fn provider(&self) -> &str;
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.trim().to_lowercase().as_str() {
        "http" | "https" => Ok(Arc::new(HttpEmbedder::new(config)?)),
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dimension))),
        other => Err(Error::Config(format!(
            "Unsupported embedding provider '{}'; expected 'http' or 'hash'",
            other
        ))),
    }
}

/// Fail unless the backend returned one vector per input
pub(crate) fn check_count(expected: usize, embeddings: &[Vec<f32>]) -> Result<()> {
    if embeddings.len() != expected {
        return Err(Error::Embedding(format!(
            "Embedding count mismatch: sent {} inputs, got {} vectors",
            expected,
            embeddings.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let v = normalize_embedding(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(normalize_embedding(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_create_embedder_by_provider() {
        let mut config = EmbeddingConfig::default();
        config.provider = "hash".to_string();
        config.dimension = 16;
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.provider(), "hash");
        assert_eq!(embedder.dimension(), 16);

        config.provider = "fastembed".to_string();
        assert!(matches!(create_embedder(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_check_count() {
        assert!(check_count(2, &[vec![1.0], vec![2.0]]).is_ok());
        assert!(check_count(3, &[vec![1.0]]).is_err());
    }
}
