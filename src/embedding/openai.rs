//! OpenAI-compatible `/embeddings` provider.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::{FaqError, FaqResult};

const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Embedding provider backed by an OpenAI-compatible HTTP API.
#[derive(Clone)]
pub struct OpenAiEmbeddingProvider {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
    /// Only the `text-embedding-3` family accepts a `dimensions` parameter.
    send_dimensions: bool,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingProvider {
    /// Build a provider, reading the API key from `OPENAI_API_KEY`.
    pub fn from_env(config: &EmbeddingConfig) -> FaqResult<Self> {
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| {
            FaqError::EmbeddingComputation(format!("{API_KEY_ENV} environment variable is not set"))
        })?;
        Self::new(&config.api_base, &api_key, &config.model, config.dimensions)
    }

    pub fn new(base_url: &str, api_key: &str, model: &str, dimensions: usize) -> FaqResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| FaqError::EmbeddingComputation(format!("invalid API key header: {e}")))?;
        headers.insert(AUTHORIZATION, auth);

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| FaqError::EmbeddingComputation(format!("failed to build HTTP client: {e}")))?;

        let send_dimensions = model.starts_with("text-embedding-3");
        let dimensions = match model {
            "text-embedding-ada-002" => super::OPENAI_EMBEDDING_DIM,
            _ => dimensions,
        };

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimensions,
            send_dimensions,
        })
    }

    async fn request(&self, input: &[String]) -> FaqResult<Vec<Vec<f32>>> {
        let body = EmbeddingsRequest {
            model: &self.model,
            input,
            dimensions: self.send_dimensions.then_some(self.dimensions),
        };

        let response = self
            .http_client
            .post(format!("{}/embeddings", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| FaqError::EmbeddingComputation(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %text, "embedding request rejected");
            return Err(FaqError::EmbeddingComputation(format!(
                "embedding API returned {status}"
            )));
        }

        let mut parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| FaqError::EmbeddingComputation(format!("malformed response: {e}")))?;

        if parsed.data.len() != input.len() {
            return Err(FaqError::EmbeddingComputation(format!(
                "expected {} embeddings, got {}",
                input.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> FaqResult<Vec<f32>> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| FaqError::EmbeddingComputation("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> FaqResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.request(texts).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v3_models_request_configured_dimensions() {
        let provider =
            OpenAiEmbeddingProvider::new("https://example.invalid/v1/", "k", "text-embedding-3-small", 512)
                .unwrap();
        assert!(provider.send_dimensions);
        assert_eq!(provider.dimensions(), 512);
        assert_eq!(provider.base_url, "https://example.invalid/v1");
    }

    #[test]
    fn ada_has_fixed_dimensions() {
        let provider =
            OpenAiEmbeddingProvider::new("https://example.invalid/v1", "k", "text-embedding-ada-002", 384)
                .unwrap();
        assert!(!provider.send_dimensions);
        assert_eq!(provider.dimensions(), crate::embedding::OPENAI_EMBEDDING_DIM);
    }

    #[test]
    fn request_body_omits_dimensions_when_unsupported() {
        let input = vec!["hello".to_string()];
        let body = EmbeddingsRequest {
            model: "text-embedding-ada-002",
            input: &input,
            dimensions: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("dimensions").is_none());
        assert_eq!(json["input"][0], "hello");
    }
}
