//! Local ONNX Runtime embedding provider.
//!
//! Runs all-MiniLM-L6-v2 through `ort`: tokenize, infer, mean-pool over the
//! attention mask, L2-normalize. Inference is CPU-bound, so every call is
//! moved onto the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{EmbeddingProvider, LOCAL_EMBEDDING_DIM};
use crate::config::EmbeddingConfig;
use crate::error::{FaqError, FaqResult};

/// Maximum sequence length for all-MiniLM-L6-v2 (trained at 256).
const MAX_SEQ_LEN: usize = 256;

pub const LOCAL_MODEL_NAME: &str = "all-MiniLM-L6-v2";

struct Inner {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

// Safety: Tokenizer is Send+Sync and the Session is only reached through the Mutex.
unsafe impl Send for Inner {}
unsafe impl Sync for Inner {}

/// Local ONNX-based embedding provider using all-MiniLM-L6-v2.
#[derive(Clone)]
pub struct LocalEmbeddingProvider {
    inner: Arc<Inner>,
}

/// Paths of the model files inside the configured cache directory.
pub fn model_files(config: &EmbeddingConfig) -> (PathBuf, PathBuf) {
    let cache_dir = crate::config::expand_tilde(&config.cache_dir);
    (cache_dir.join("model.onnx"), cache_dir.join("tokenizer.json"))
}

fn model_error(e: impl std::fmt::Display) -> FaqError {
    FaqError::EmbeddingComputation(e.to_string())
}

fn require_file(path: &Path, what: &str) -> FaqResult<()> {
    if !path.exists() {
        return Err(FaqError::EmbeddingComputation(format!(
            "{what} not found at {}. Run `faq model download` first.",
            path.display()
        )));
    }
    Ok(())
}

impl LocalEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> FaqResult<Self> {
        let (model_path, tokenizer_path) = model_files(config);
        require_file(&model_path, "ONNX model")?;
        require_file(&tokenizer_path, "tokenizer")?;

        let session = Session::builder()
            .map_err(model_error)?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(model_error)?
            .with_intra_threads(4)
            .map_err(model_error)?
            .commit_from_file(&model_path)
            .map_err(|e| model_error(format!("failed to load ONNX model: {e}")))?;

        tracing::info!(model = %model_path.display(), "ONNX model loaded");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| model_error(format!("failed to load tokenizer: {e}")))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| model_error(format!("failed to set truncation: {e}")))?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        Ok(Self {
            inner: Arc::new(Inner {
                session: Mutex::new(session),
                tokenizer,
            }),
        })
    }

    async fn run_blocking(&self, texts: Vec<String>) -> FaqResult<Vec<Vec<f32>>> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.embed_sync(&texts))
            .await
            .map_err(|e| FaqError::Internal(format!("embedding task failed: {e}")))?
    }
}

impl Inner {
    fn embed_sync(&self, texts: &[String]) -> FaqResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| model_error(format!("tokenization failed: {e}")))?;

        let batch_size = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        let mut input_ids = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask = Vec::with_capacity(batch_size * seq_len);
        for encoding in &encodings {
            input_ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        let shape = vec![batch_size as i64, seq_len as i64];
        let ids_tensor =
            Tensor::from_array((shape.clone(), input_ids.into_boxed_slice())).map_err(model_error)?;
        let mask_tensor = Tensor::from_array((shape.clone(), attention_mask.clone().into_boxed_slice()))
            .map_err(model_error)?;
        // single-segment input
        let type_tensor =
            Tensor::from_array((shape, vec![0i64; batch_size * seq_len].into_boxed_slice()))
                .map_err(model_error)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| model_error(format!("session lock poisoned: {e}")))?;

        let outputs = session
            .run(ort::inputs! {
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor,
                "token_type_ids" => type_tensor,
            })
            .map_err(model_error)?;

        // Output name varies by export.
        let token_embeddings = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);

        let (out_shape, data) = token_embeddings
            .try_extract_tensor::<f32>()
            .map_err(|e| model_error(format!("failed to extract token embeddings: {e}")))?;

        let dims: &[i64] = &out_shape;
        if dims.len() != 3 || dims[2] != LOCAL_EMBEDDING_DIM as i64 {
            return Err(FaqError::DimensionMismatch {
                expected: LOCAL_EMBEDDING_DIM,
                actual: dims.last().copied().unwrap_or(0) as usize,
            });
        }
        let hidden = dims[2] as usize;
        let out_seq = dims[1] as usize;

        let mut results = Vec::with_capacity(batch_size);
        for b in 0..batch_size {
            let mut pooled = vec![0.0f32; hidden];
            let mut count = 0.0f32;
            for s in 0..out_seq {
                let mask = attention_mask[b * seq_len + s] as f32;
                if mask > 0.0 {
                    let offset = (b * out_seq + s) * hidden;
                    for (d, value) in pooled.iter_mut().enumerate() {
                        *value += data[offset + d] * mask;
                    }
                    count += mask;
                }
            }
            if count > 0.0 {
                pooled.iter_mut().for_each(|v| *v /= count);
            }
            results.push(l2_normalize(&pooled));
        }

        Ok(results)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed(&self, text: &str) -> FaqResult<Vec<f32>> {
        self.run_blocking(vec![text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| model_error("model returned no embedding"))
    }

    async fn embed_batch(&self, texts: &[String]) -> FaqResult<Vec<Vec<f32>>> {
        self.run_blocking(texts.to_vec()).await
    }

    fn dimensions(&self) -> usize {
        LOCAL_EMBEDDING_DIM
    }

    fn model(&self) -> &str {
        LOCAL_MODEL_NAME
    }
}

/// L2-normalize a vector. A zero vector is returned unchanged.
fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}
