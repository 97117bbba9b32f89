//! Text-to-vector embedding pipeline.
//!
//! Provides the [`EmbeddingProvider`] trait with two backends: an
//! OpenAI-compatible HTTP provider ([`openai`]) and a local ONNX provider
//! running all-MiniLM-L6-v2 ([`local`]). Callers go through
//! [`EmbeddingService`], which adds truncation, caching, and dimension checks.

pub mod cache;
pub mod local;
pub mod openai;
pub mod service;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::{FaqError, FaqResult};

pub use service::EmbeddingService;

/// Dimensions produced by all-MiniLM-L6-v2.
pub const LOCAL_EMBEDDING_DIM: usize = 384;

/// Dimensions produced by `text-embedding-3-small`.
pub const OPENAI_EMBEDDING_DIM: usize = 1536;

/// A backend that turns text into fixed-length vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> FaqResult<Vec<f32>>;

    /// Embed several texts, preserving order. Backends with native batching override this.
    async fn embed_batch(&self, texts: &[String]) -> FaqResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Number of dimensions this provider produces.
    fn dimensions(&self) -> usize;

    /// Model identifier, recorded in `schema_meta` at bootstrap.
    fn model(&self) -> &str;
}

/// Model name the configured provider will report, without constructing it.
pub fn configured_model(config: &EmbeddingConfig) -> &str {
    match config.provider.as_str() {
        "local" => local::LOCAL_MODEL_NAME,
        _ => &config.model,
    }
}

/// Create an embedding provider from config.
///
/// The provider's dimension must equal `config.dimensions`; a mismatch is a
/// configuration error and fails here rather than on the first insert.
pub fn create_provider(config: &EmbeddingConfig) -> FaqResult<Box<dyn EmbeddingProvider>> {
    let provider: Box<dyn EmbeddingProvider> = match config.provider.as_str() {
        "openai" => Box::new(openai::OpenAiEmbeddingProvider::from_env(config)?),
        "local" => Box::new(local::LocalEmbeddingProvider::new(config)?),
        other => {
            return Err(FaqError::InvalidArgument(format!(
                "unknown embedding provider: {other}. Supported: openai, local"
            )))
        }
    };

    if provider.dimensions() != config.dimensions {
        return Err(FaqError::DimensionMismatch {
            expected: config.dimensions,
            actual: provider.dimensions(),
        });
    }

    tracing::info!(
        provider = %config.provider,
        model = provider.model(),
        dimensions = provider.dimensions(),
        "embedding provider ready"
    );
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_rejected() {
        let config = EmbeddingConfig {
            provider: "word2vec".into(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            create_provider(&config),
            Err(FaqError::InvalidArgument(_))
        ));
    }

    #[test]
    fn configured_model_follows_provider() {
        let mut config = EmbeddingConfig::default();
        assert_eq!(configured_model(&config), "text-embedding-3-small");
        config.provider = "local".into();
        assert_eq!(configured_model(&config), local::LOCAL_MODEL_NAME);
    }
}
