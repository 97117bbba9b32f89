//! Wiring: bootstrap the store, construct the shared services, hand out
//! the router and the write-back workers.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::FaqConfig;
use crate::db::bootstrap::{self, BootstrapReport, RetryPolicy, VectorSpec};
use crate::embedding::{self, EmbeddingProvider, EmbeddingService};
use crate::error::{FaqError, FaqResult};
use crate::knowledge::KnowledgeStore;
use crate::responder::{self, Responder};
use crate::router::{Router, RouterSettings};
use crate::seed;
use crate::writeback::queue::WritebackQueue;
use crate::writeback::worker::{self, DrainReport, WorkerPool};
use crate::writeback::{PipelineReport, WritebackPipeline};

/// Bootstrap the database described by `config` and return a store handle.
///
/// Runs on the blocking pool since bootstrap sleeps between retries.
pub async fn bootstrap_store(
    config: &FaqConfig,
    model: &str,
) -> FaqResult<(KnowledgeStore, BootstrapReport)> {
    let path = config.resolved_db_path();
    let storage = config.storage.clone();
    let policy = RetryPolicy::from(&config.bootstrap);
    let dimensions = config.embedding.dimensions;
    let model = model.to_string();

    let (pool, report) = tokio::task::spawn_blocking(move || {
        let spec = VectorSpec {
            dimensions,
            model: &model,
        };
        bootstrap::bootstrap(&path, &storage, &spec, &policy)
    })
    .await
    .map_err(|e| FaqError::Internal(format!("bootstrap task failed: {e}")))??;

    Ok((KnowledgeStore::new(pool, dimensions), report))
}

/// Fully assembled assistant.
pub struct App {
    pub config: Arc<FaqConfig>,
    pub store: KnowledgeStore,
    pub embeddings: Arc<EmbeddingService>,
    pub queue: WritebackQueue,
    pub pipeline: Arc<WritebackPipeline>,
    pub router: Arc<Router>,
    pub bootstrap: BootstrapReport,
}

impl App {
    /// Build with the providers named in `config`.
    pub async fn from_config(config: FaqConfig) -> FaqResult<Self> {
        let provider: Arc<dyn EmbeddingProvider> =
            Arc::from(embedding::create_provider(&config.embedding)?);
        let responder: Arc<dyn Responder> =
            Arc::from(responder::create_responder(&config.generation)?);
        Self::build(config, provider, responder).await
    }

    /// Build with explicit providers. Bootstrap completes before this returns.
    pub async fn build(
        config: FaqConfig,
        provider: Arc<dyn EmbeddingProvider>,
        responder: Arc<dyn Responder>,
    ) -> FaqResult<Self> {
        if provider.dimensions() != config.embedding.dimensions {
            return Err(FaqError::DimensionMismatch {
                expected: config.embedding.dimensions,
                actual: provider.dimensions(),
            });
        }

        let (store, report) = bootstrap_store(&config, provider.model()).await?;

        let embeddings = Arc::new(EmbeddingService::from_config(provider, &config.embedding));
        let queue = WritebackQueue::new(store.clone());
        let pipeline = Arc::new(WritebackPipeline::new(
            store.clone(),
            Arc::clone(&embeddings),
            config.writeback.batch_size,
        ));
        let router = Arc::new(Router::new(
            Arc::clone(&embeddings),
            store.clone(),
            responder,
            queue.clone(),
            RouterSettings::from(&config),
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            embeddings,
            queue,
            pipeline,
            router,
            bootstrap: report,
        })
    }

    /// Load the configured seed file, if any, into the default collection.
    pub async fn seed(&self) -> FaqResult<Option<PipelineReport>> {
        let Some(seed_file) = self.config.bootstrap.seed_file.as_deref() else {
            return Ok(None);
        };
        let path = crate::config::expand_tilde(seed_file);
        let records = seed::load_faq_file(&path, self.config.bootstrap.seed_limit)?;
        let report = seed::seed_knowledge_base(
            &self.pipeline,
            &records,
            &self.config.matching.default_collection,
        )
        .await;
        Ok(Some(report))
    }

    pub async fn start_workers(&self, cancel: CancellationToken) -> FaqResult<WorkerPool> {
        WorkerPool::start(
            self.queue.clone(),
            Arc::clone(&self.pipeline),
            self.config.writeback.workers,
            self.config.writeback.poll_interval(),
            cancel,
        )
        .await
    }

    /// Recover interrupted tasks and process everything pending inline.
    pub async fn drain(&self) -> FaqResult<DrainReport> {
        self.queue.recover().await?;
        worker::drain(&self.queue, &self.pipeline).await
    }
}
