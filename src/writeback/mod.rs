//! Asynchronous write-back of question/answer pairs.
//!
//! The router enqueues [`TaskKind::Add`] and [`TaskKind::Update`] tasks on a
//! durable [`queue::WritebackQueue`]; [`worker`] tasks claim them and run
//! them through [`WritebackPipeline`], which chunks the items, embeds them,
//! and writes each chunk in one transaction. A failing chunk is rolled back
//! as a unit; later chunks still run and the task is reported as failed.

pub mod queue;
pub mod worker;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::embedding::EmbeddingService;
use crate::error::{FaqError, FaqResult};
use crate::knowledge::store::{self, InsertOutcome};
use crate::knowledge::types::TaskItem;
use crate::knowledge::KnowledgeStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Insert entries that do not exist yet.
    Add,
    /// Refresh answer and embedding of existing entries, inserting missing ones.
    Update,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
        }
    }

    pub fn parse(s: &str) -> FaqResult<Self> {
        match s {
            "add" => Ok(Self::Add),
            "update" => Ok(Self::Update),
            other => Err(FaqError::Queue(format!("unknown task kind: {other}"))),
        }
    }
}

/// A claimed task.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: i64,
    pub kind: TaskKind,
    pub items: Vec<TaskItem>,
    pub attempts: u32,
}

/// What one pipeline run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed_chunks: usize,
    /// One message per failed chunk.
    pub errors: Vec<String>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.failed_chunks == 0
    }

    fn absorb(&mut self, chunk: PipelineReport) {
        self.inserted += chunk.inserted;
        self.updated += chunk.updated;
        self.skipped += chunk.skipped;
    }
}

/// Embeds and persists batches of task items.
pub struct WritebackPipeline {
    store: KnowledgeStore,
    embeddings: Arc<EmbeddingService>,
    batch_size: usize,
}

impl WritebackPipeline {
    pub fn new(store: KnowledgeStore, embeddings: Arc<EmbeddingService>, batch_size: usize) -> Self {
        Self {
            store,
            embeddings,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn run(&self, kind: TaskKind, items: &[TaskItem]) -> PipelineReport {
        let mut report = PipelineReport::default();

        for (index, chunk) in items.chunks(self.batch_size).enumerate() {
            let result = match kind {
                TaskKind::Add => self.add_chunk(chunk).await,
                TaskKind::Update => self.update_chunk(chunk).await,
            };
            match result {
                Ok(done) => report.absorb(done),
                Err(err) => {
                    tracing::error!(
                        kind = kind.as_str(),
                        chunk = index,
                        size = chunk.len(),
                        error = %err,
                        "write-back chunk aborted"
                    );
                    report.failed_chunks += 1;
                    report.errors.push(format!("chunk {index}: {err}"));
                }
            }
        }

        tracing::info!(
            kind = kind.as_str(),
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            failed_chunks = report.failed_chunks,
            "write-back finished"
        );
        report
    }

    pub async fn add_entries(&self, items: &[TaskItem]) -> PipelineReport {
        self.run(TaskKind::Add, items).await
    }

    pub async fn update_entries(&self, items: &[TaskItem]) -> PipelineReport {
        self.run(TaskKind::Update, items).await
    }

    /// Dedup-before-insert: only pairs missing from the store get embedded.
    async fn add_chunk(&self, chunk: &[TaskItem]) -> FaqResult<PipelineReport> {
        for item in chunk {
            item.validate()?;
        }

        let candidates = chunk.to_vec();
        let (missing, skipped) = self
            .store
            .run(move |conn| {
                let mut seen = HashSet::new();
                let mut missing = Vec::new();
                let mut skipped = 0usize;
                for item in candidates {
                    let key = (item.content.clone(), item.collection.clone());
                    if !seen.insert(key) || store::entry_exists(conn, &item.content, &item.collection)? {
                        tracing::warn!(
                            content = %item.content,
                            collection = %item.collection,
                            "entry already exists; skipping"
                        );
                        skipped += 1;
                    } else {
                        missing.push(item);
                    }
                }
                Ok((missing, skipped))
            })
            .await?;

        if missing.is_empty() {
            return Ok(PipelineReport {
                skipped,
                ..Default::default()
            });
        }

        let texts: Vec<String> = missing.iter().map(|i| i.content.clone()).collect();
        let vectors = self.embeddings.compute_batch(&texts).await?;

        let (inserted, raced) = self
            .store
            .run(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0usize;
                let mut raced = 0usize;
                for (item, vector) in missing.iter().zip(&vectors) {
                    match store::insert_if_absent(&tx, &item.content, &item.answer, &item.collection, vector)? {
                        InsertOutcome::Inserted(_) => inserted += 1,
                        InsertOutcome::Skipped => raced += 1,
                    }
                }
                tx.commit()?;
                Ok((inserted, raced))
            })
            .await?;

        Ok(PipelineReport {
            inserted,
            skipped: skipped + raced,
            ..Default::default()
        })
    }

    /// Recomputes each embedding from the provider, bypassing the cache.
    async fn update_chunk(&self, chunk: &[TaskItem]) -> FaqResult<PipelineReport> {
        for item in chunk {
            item.validate()?;
        }

        let mut vectors = Vec::with_capacity(chunk.len());
        for item in chunk {
            vectors.push(self.embeddings.compute_fresh(&item.content).await?);
        }

        let items = chunk.to_vec();
        self.store
            .run(move |conn| {
                let tx = conn.transaction()?;
                let mut report = PipelineReport::default();
                for (item, vector) in items.iter().zip(&vectors) {
                    match store::get_entry(&tx, &item.content, &item.collection)? {
                        Some(existing) => {
                            store::update_entry(&tx, existing.id, &item.answer, vector)?;
                            report.updated += 1;
                        }
                        None => {
                            tracing::info!(
                                content = %item.content,
                                collection = %item.collection,
                                "entry missing on update; adding it"
                            );
                            store::insert_entry(&tx, &item.content, &item.answer, &item.collection, vector)?;
                            report.inserted += 1;
                        }
                    }
                }
                tx.commit()?;
                Ok(report)
            })
            .await
    }
}
