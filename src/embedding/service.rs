//! Shared embedding service: truncation, caching, dimension checks.

use std::sync::{Arc, Mutex};

use super::cache::LruCache;
use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::{FaqError, FaqResult};
use crate::knowledge::ensure_dimensions;

/// Approximate UTF-8 bytes per model token used for truncation.
const BYTES_PER_TOKEN: usize = 4;

/// Cut `text` to roughly `max_tokens` tokens on a char boundary.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    let limit = max_tokens.saturating_mul(BYTES_PER_TOKEN);
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Explicitly constructed, shared embedding service. Clone the `Arc` to share it.
///
/// Vectors are cached by exact input text. Truncation applies only to what
/// the provider sees; stored content is never truncated.
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<Vec<f32>>>,
    max_tokens: usize,
    dimensions: usize,
}

impl EmbeddingService {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        dimensions: usize,
        max_tokens: usize,
        cache_capacity: usize,
    ) -> Self {
        Self {
            provider,
            cache: Mutex::new(LruCache::new(cache_capacity)),
            max_tokens,
            dimensions,
        }
    }

    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self::new(
            provider,
            config.dimensions,
            config.max_tokens,
            config.cache_capacity,
        )
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    fn lock_cache(&self) -> FaqResult<std::sync::MutexGuard<'_, LruCache<Vec<f32>>>> {
        self.cache
            .lock()
            .map_err(|e| FaqError::Internal(format!("embedding cache lock poisoned: {e}")))
    }

    /// Embedding for `text`, served from the cache when present.
    ///
    /// Misses are not coalesced: concurrent first calls for the same text
    /// each reach the provider, and the last result stays cached.
    pub async fn compute(&self, text: &str) -> FaqResult<Vec<f32>> {
        let cached = self.lock_cache()?.get(text);
        if let Some(hit) = cached {
            tracing::trace!("embedding cache hit");
            return Ok(hit);
        }
        let vector = self.embed_one(text).await?;
        self.lock_cache()?.insert(text.to_string(), vector.clone());
        Ok(vector)
    }

    /// Embedding for `text` straight from the provider. The cache entry is
    /// replaced with the fresh vector.
    pub async fn compute_fresh(&self, text: &str) -> FaqResult<Vec<f32>> {
        let vector = self.embed_one(text).await?;
        self.lock_cache()?.insert(text.to_string(), vector.clone());
        Ok(vector)
    }

    /// Embeddings for several texts in one provider round trip. Not cached.
    pub async fn compute_batch(&self, texts: &[String]) -> FaqResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        for text in texts {
            require_text(text)?;
        }
        let truncated: Vec<String> = texts
            .iter()
            .map(|t| truncate_to_tokens(t, self.max_tokens).to_string())
            .collect();

        let vectors = self.provider.embed_batch(&truncated).await?;
        if vectors.len() != texts.len() {
            return Err(FaqError::EmbeddingComputation(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        for vector in &vectors {
            ensure_dimensions(vector, self.dimensions)?;
        }
        tracing::debug!(count = texts.len(), "batch embeddings computed");
        Ok(vectors)
    }

    pub fn clear_cache(&self) -> FaqResult<()> {
        self.lock_cache()?.clear();
        tracing::info!("embedding cache cleared");
        Ok(())
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    async fn embed_one(&self, text: &str) -> FaqResult<Vec<f32>> {
        require_text(text)?;
        let input = truncate_to_tokens(text, self.max_tokens);
        if input.len() < text.len() {
            tracing::debug!(
                original_bytes = text.len(),
                truncated_bytes = input.len(),
                "input truncated before embedding"
            );
        }
        let vector = self.provider.embed(input).await?;
        ensure_dimensions(&vector, self.dimensions)?;
        Ok(vector)
    }
}

fn require_text(text: &str) -> FaqResult<()> {
    if text.trim().is_empty() {
        return Err(FaqError::InvalidArgument(
            "cannot embed empty text".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider producing `[len, 1, 0, ...]` and counting calls.
    struct Counting {
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
        dims: usize,
    }

    impl Counting {
        fn new(dims: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                dims,
            })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for Counting {
        async fn embed(&self, text: &str) -> FaqResult<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(text.to_string());
            let mut v = vec![0.0; self.dims];
            v[0] = text.len() as f32;
            v[1] = 1.0;
            Ok(v)
        }

        fn dimensions(&self) -> usize {
            self.dims
        }

        fn model(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn second_compute_is_served_from_cache() {
        let provider = Counting::new(4);
        let service = EmbeddingService::new(provider.clone(), 4, 2000, 16);

        let first = service.compute("How do I reset my password?").await.unwrap();
        let second = service.compute("How do I reset my password?").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.cache_len(), 1);
    }

    #[tokio::test]
    async fn differently_cased_text_is_a_miss() {
        let provider = Counting::new(4);
        let service = EmbeddingService::new(provider.clone(), 4, 2000, 16);
        service.compute("VPN").await.unwrap();
        service.compute("vpn").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn compute_fresh_bypasses_cache() {
        let provider = Counting::new(4);
        let service = EmbeddingService::new(provider.clone(), 4, 2000, 16);
        service.compute("q").await.unwrap();
        service.compute_fresh("q").await.unwrap();
        service.compute("q").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn long_input_is_truncated_for_the_provider_only() {
        let provider = Counting::new(4);
        let service = EmbeddingService::new(provider.clone(), 4, 2, 16);
        let text = "abcdefghijklmnop";
        service.compute(text).await.unwrap();
        assert_eq!(provider.seen.lock().unwrap()[0], "abcdefgh");
        // cache is keyed by the full text
        service.compute(text).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let provider = Counting::new(3);
        let service = EmbeddingService::new(provider, 4, 2000, 16);
        let err = service.compute("q").await.unwrap_err();
        assert!(matches!(
            err,
            FaqError::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        ));
        assert_eq!(service.cache_len(), 0);
    }

    #[tokio::test]
    async fn batch_is_not_cached() {
        let provider = Counting::new(4);
        let service = EmbeddingService::new(provider.clone(), 4, 2000, 16);
        let texts = vec!["a".to_string(), "bb".to_string()];
        let vectors = service.compute_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1][0], 2.0);
        assert_eq!(service.cache_len(), 0);
    }

    #[tokio::test]
    async fn empty_text_is_invalid() {
        let service = EmbeddingService::new(Counting::new(4), 4, 2000, 16);
        assert!(matches!(
            service.compute("   ").await,
            Err(FaqError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn clear_cache_forces_recompute() {
        let provider = Counting::new(4);
        let service = EmbeddingService::new(provider.clone(), 4, 2000, 16);
        service.compute("q").await.unwrap();
        service.clear_cache().unwrap();
        assert_eq!(service.cache_len(), 0);
        service.compute("q").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 'é' is two bytes; a 4-byte cut lands mid-character
        assert_eq!(truncate_to_tokens("aaaé", 1), "aaa");
        assert_eq!(truncate_to_tokens("short", 10), "short");
    }
}
