//! Durable task queue stored in the `writeback_tasks` table.
//!
//! Rows move `pending → running → done | failed`. Claiming is a single
//! `UPDATE ... RETURNING`, so two workers never get the same row. Rows left
//! `running` by a crashed process go back to `pending` on startup.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Notify;

use super::{Task, TaskKind};
use crate::error::{FaqError, FaqResult};
use crate::knowledge::types::TaskItem;
use crate::knowledge::KnowledgeStore;

/// Row counts per status.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub done: i64,
    pub failed: i64,
}

/// Insert a pending task. Returns its id.
pub fn enqueue_task(conn: &Connection, kind: TaskKind, items: &[TaskItem]) -> FaqResult<i64> {
    let payload = serde_json::to_string(items)
        .map_err(|e| FaqError::Queue(format!("failed to encode task payload: {e}")))?;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO writeback_tasks (kind, payload, status, attempts, enqueued_at, updated_at)
         VALUES (?1, ?2, 'pending', 0, ?3, ?3)",
        params![kind.as_str(), payload, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Atomically move the oldest pending task to `running` and return it.
pub fn claim_next(conn: &Connection) -> FaqResult<Option<Task>> {
    let now = chrono::Utc::now().to_rfc3339();
    let row: Option<(i64, String, String, u32)> = conn
        .query_row(
            "UPDATE writeback_tasks
             SET status = 'running', attempts = attempts + 1, updated_at = ?1
             WHERE id = (SELECT id FROM writeback_tasks WHERE status = 'pending' ORDER BY id LIMIT 1)
             RETURNING id, kind, payload, attempts",
            params![now],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    let Some((id, kind, payload, attempts)) = row else {
        return Ok(None);
    };

    let decoded = TaskKind::parse(&kind).and_then(|kind| {
        serde_json::from_str::<Vec<TaskItem>>(&payload)
            .map(|items| (kind, items))
            .map_err(|e| FaqError::Queue(format!("failed to decode payload: {e}")))
    });

    match decoded {
        Ok((kind, items)) => Ok(Some(Task {
            id,
            kind,
            items,
            attempts,
        })),
        Err(err) => {
            // an undecodable row can never succeed
            mark_failed(conn, id, &err.to_string())?;
            Err(err)
        }
    }
}

pub fn mark_done(conn: &Connection, id: i64) -> FaqResult<()> {
    set_status(conn, id, "done", None)
}

pub fn mark_failed(conn: &Connection, id: i64, error: &str) -> FaqResult<()> {
    set_status(conn, id, "failed", Some(error))
}

fn set_status(conn: &Connection, id: i64, status: &str, error: Option<&str>) -> FaqResult<()> {
    let changed = conn.execute(
        "UPDATE writeback_tasks SET status = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4",
        params![status, error, chrono::Utc::now().to_rfc3339(), id],
    )?;
    if changed == 0 {
        return Err(FaqError::NotFound(format!("task {id}")));
    }
    Ok(())
}

/// Reset tasks interrupted mid-run back to `pending`. Returns how many.
pub fn recover_interrupted(conn: &Connection) -> FaqResult<usize> {
    Ok(conn.execute(
        "UPDATE writeback_tasks SET status = 'pending', updated_at = ?1 WHERE status = 'running'",
        params![chrono::Utc::now().to_rfc3339()],
    )?)
}

/// Put every failed task back in the queue. Returns how many.
pub fn requeue_failed(conn: &Connection) -> FaqResult<usize> {
    Ok(conn.execute(
        "UPDATE writeback_tasks SET status = 'pending', last_error = NULL, updated_at = ?1
         WHERE status = 'failed'",
        params![chrono::Utc::now().to_rfc3339()],
    )?)
}

/// Delete finished tasks. Returns how many.
pub fn purge_done(conn: &Connection) -> FaqResult<usize> {
    Ok(conn.execute("DELETE FROM writeback_tasks WHERE status = 'done'", [])?)
}

pub fn queue_stats(conn: &Connection) -> FaqResult<QueueStats> {
    let mut stats = QueueStats::default();
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM writeback_tasks GROUP BY status")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (status, count) = row?;
        match status.as_str() {
            "pending" => stats.pending = count,
            "running" => stats.running = count,
            "done" => stats.done = count,
            "failed" => stats.failed = count,
            _ => {}
        }
    }
    Ok(stats)
}

/// Producer side of the queue: persists tasks and wakes idle workers.
#[derive(Clone)]
pub struct WritebackQueue {
    store: KnowledgeStore,
    notify: Arc<Notify>,
}

impl WritebackQueue {
    pub fn new(store: KnowledgeStore) -> Self {
        Self {
            store,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    /// Persist a task and return immediately with its id.
    pub async fn enqueue(&self, kind: TaskKind, items: Vec<TaskItem>) -> FaqResult<i64> {
        if items.is_empty() {
            return Err(FaqError::InvalidArgument("task has no items".into()));
        }
        for item in &items {
            item.validate()?;
        }
        let count = items.len();
        let id = self
            .store
            .run(move |conn| enqueue_task(conn, kind, &items))
            .await?;
        self.notify.notify_one();
        tracing::debug!(task_id = id, kind = kind.as_str(), items = count, "write-back task enqueued");
        Ok(id)
    }

    pub async fn claim(&self) -> FaqResult<Option<Task>> {
        self.store.run(|conn| claim_next(conn)).await
    }

    pub async fn complete(&self, id: i64) -> FaqResult<()> {
        self.store.run(move |conn| mark_done(conn, id)).await
    }

    pub async fn fail(&self, id: i64, error: String) -> FaqResult<()> {
        self.store.run(move |conn| mark_failed(conn, id, &error)).await
    }

    pub async fn recover(&self) -> FaqResult<usize> {
        let recovered = self.store.run(|conn| recover_interrupted(conn)).await?;
        if recovered > 0 {
            tracing::warn!(recovered, "requeued tasks interrupted by a previous shutdown");
            self.notify.notify_one();
        }
        Ok(recovered)
    }

    pub async fn requeue_failed(&self) -> FaqResult<usize> {
        let requeued = self.store.run(|conn| requeue_failed(conn)).await?;
        if requeued > 0 {
            self.notify.notify_one();
        }
        Ok(requeued)
    }

    pub async fn stats(&self) -> FaqResult<QueueStats> {
        self.store.run(|conn| queue_stats(conn)).await
    }

    /// Resolves when a task has been enqueued since the last wake-up.
    pub async fn notified(&self) {
        self.notify.notified().await
    }
}
