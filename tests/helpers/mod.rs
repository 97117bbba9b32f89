#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use faq_assistant::app::App;
use faq_assistant::config::FaqConfig;
use faq_assistant::embedding::EmbeddingProvider;
use faq_assistant::error::{FaqError, FaqResult};
use faq_assistant::responder::Responder;
use tempfile::TempDir;

pub const DIMS: usize = 8;

/// Unit vector along axis `axis`.
pub fn axis(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    v[axis % DIMS] = 1.0;
    v
}

/// Unit vector whose cosine similarity with `axis(0)` is `similarity`.
pub fn at_similarity(similarity: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    v[0] = similarity;
    v[1] = (1.0 - similarity * similarity).sqrt();
    v
}

/// Embedding provider with preset vectors. Texts without a preset map onto
/// the last axis, which tests keep free of stored entries.
#[derive(Default)]
pub struct MockEmbedder {
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, text: &str, vector: Vec<f32>) {
        self.vectors.lock().unwrap().insert(text.to_string(), vector);
    }

    pub fn fail_on(&self, text: &str) {
        self.failing.lock().unwrap().insert(text.to_string());
    }

    /// Number of texts embedded so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> FaqResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(text) {
            return Err(FaqError::EmbeddingComputation(format!("refusing to embed {text:?}")));
        }
        let preset = self.vectors.lock().unwrap().get(text).cloned();
        Ok(preset.unwrap_or_else(|| axis(DIMS - 1)))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn model(&self) -> &str {
        "mock-embedding"
    }
}

/// Responder that echoes the question and counts calls.
#[derive(Default)]
pub struct MockResponder {
    calls: AtomicUsize,
    fail: bool,
    delay: Option<Duration>,
}

impl MockResponder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    /// Answers only after sleeping for `delay`.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Responder for MockResponder {
    async fn respond(&self, question: &str) -> FaqResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(FaqError::Generation("upstream returned 500 (key sk-test)".into()));
        }
        Ok(format!("generated answer to: {question}"))
    }
}

/// Config pointing at a fresh database inside `dir`.
pub fn test_config(dir: &TempDir) -> FaqConfig {
    let mut config = FaqConfig::default();
    config.storage.db_path = dir.path().join("knowledge.db").to_string_lossy().into_owned();
    config.storage.pool_size = 1;
    config.storage.max_overflow = 3;
    config.storage.pool_timeout_secs = 5;
    config.embedding.model = "mock-embedding".into();
    config.embedding.dimensions = DIMS;
    config.embedding.cache_capacity = 100;
    config.writeback.workers = 1;
    config.writeback.poll_interval_ms = 20;
    config.bootstrap.max_retries = 3;
    config.bootstrap.retry_delay_secs = 0;
    config.bootstrap.seed_file = None;
    config
}

pub struct TestApp {
    pub app: App,
    pub embedder: Arc<MockEmbedder>,
    pub responder: Arc<MockResponder>,
    pub dir: TempDir,
}

pub async fn build_app_with(
    dir: TempDir,
    config: FaqConfig,
    embedder: Arc<MockEmbedder>,
    responder: Arc<MockResponder>,
) -> TestApp {
    let app = App::build(config, embedder.clone(), responder.clone())
        .await
        .unwrap();
    TestApp {
        app,
        embedder,
        responder,
        dir,
    }
}

pub async fn build_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    build_app_with(dir, config, MockEmbedder::new(), MockResponder::new()).await
}

/// Store one entry through the add pipeline.
pub async fn add_entry(t: &TestApp, question: &str, answer: &str, vector: Vec<f32>) {
    t.embedder.set(question, vector);
    let collection = t.app.config.matching.default_collection.clone();
    let report = t
        .app
        .pipeline
        .add_entries(&[faq_assistant::knowledge::types::TaskItem::new(
            question, answer, collection,
        )])
        .await;
    assert_eq!(report.inserted, 1, "{report:?}");
}
