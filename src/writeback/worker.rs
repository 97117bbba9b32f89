//! Consumer side of the write-back queue.
//!
//! A fixed number of tokio tasks claim and process tasks until the
//! cancellation token fires. [`drain`] runs the same loop inline until the
//! queue is empty.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::queue::WritebackQueue;
use super::WritebackPipeline;
use crate::error::{FaqError, FaqResult};

/// What happened to one claimed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    Done,
    Failed,
    /// The queue had nothing pending.
    Idle,
}

/// Claim one task and run it to completion.
pub async fn process_next(
    queue: &WritebackQueue,
    pipeline: &WritebackPipeline,
) -> FaqResult<Processed> {
    let Some(task) = queue.claim().await? else {
        return Ok(Processed::Idle);
    };

    tracing::debug!(
        task_id = task.id,
        kind = task.kind.as_str(),
        items = task.items.len(),
        attempt = task.attempts,
        "processing write-back task"
    );

    let report = pipeline.run(task.kind, &task.items).await;
    if report.is_success() {
        queue.complete(task.id).await?;
        Ok(Processed::Done)
    } else {
        queue.fail(task.id, report.errors.join("; ")).await?;
        Ok(Processed::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub done: usize,
    pub failed: usize,
}

/// Process pending tasks in the caller's task until none remain.
///
/// A task whose payload cannot be decoded is already marked failed by the
/// claim; it is counted and the drain moves on. Storage errors abort.
pub async fn drain(queue: &WritebackQueue, pipeline: &WritebackPipeline) -> FaqResult<DrainReport> {
    let mut report = DrainReport::default();
    loop {
        match process_next(queue, pipeline).await {
            Ok(Processed::Done) => report.done += 1,
            Ok(Processed::Failed) => report.failed += 1,
            Ok(Processed::Idle) => break,
            Err(e @ FaqError::Queue(_)) => {
                tracing::error!(error = %e, "skipping undecodable write-back task");
                report.failed += 1;
            }
            Err(e) => return Err(e),
        }
    }
    tracing::info!(done = report.done, failed = report.failed, "queue drained");
    Ok(report)
}

/// Running worker tasks. Dropping this without [`WorkerPool::shutdown`]
/// leaves the tasks running until the token is cancelled elsewhere.
pub struct WorkerPool {
    tasks: JoinSet<()>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Recover interrupted tasks, then start `workers` consumers.
    pub async fn start(
        queue: WritebackQueue,
        pipeline: Arc<WritebackPipeline>,
        workers: usize,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> FaqResult<Self> {
        queue.recover().await?;

        let mut tasks = JoinSet::new();
        for worker_id in 0..workers.max(1) {
            tasks.spawn(worker_loop(
                worker_id,
                queue.clone(),
                Arc::clone(&pipeline),
                poll_interval,
                cancel.clone(),
            ));
        }
        tracing::info!(workers = workers.max(1), "write-back workers started");
        Ok(Self { tasks, cancel })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel all workers and wait for them. A task mid-run finishes first.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "write-back worker panicked");
            }
        }
        tracing::info!("write-back workers stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: WritebackQueue,
    pipeline: Arc<WritebackPipeline>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    tracing::debug!(worker_id, "worker started");
    while !cancel.is_cancelled() {
        match process_next(&queue, &pipeline).await {
            Ok(Processed::Done | Processed::Failed) => continue,
            Ok(Processed::Idle) => {}
            Err(e) => tracing::error!(worker_id, error = %e, "write-back worker error"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = queue.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
    tracing::debug!(worker_id, "worker stopped");
}
