//! In-memory task registry.
//!
//! The registry maps task ids to records. Each record lives in its own lock
//! cell; the map lock is only held to look up, insert or remove a cell, so
//! readers and writers of different tasks never contend.
//!
//! Mutation goes through the [`TaskWriter`] returned by
//! [`TaskRegistry::create`]. There is exactly one writer per task and its
//! terminal transitions consume it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crowd_models::{AnalysisSummary, TaskId, TaskRecord, TaskStatus};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// Failure cause recorded when a writer is dropped without a terminal write.
pub const ABORTED_CAUSE: &str = "Video processing aborted";

type RecordCell = Arc<RwLock<TaskRecord>>;

/// Per-status task totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.processing + self.completed + self.error
    }
}

/// Shared handle to the task registry. Cloning is cheap.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<TaskId, RecordCell>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record` and hand back the task's unique writer.
    ///
    /// The record is visible to [`read`](Self::read) as soon as this returns.
    pub async fn create(&self, record: TaskRecord) -> WorkerResult<TaskWriter> {
        let task_id = record.task_id.clone();
        let cell = Arc::new(RwLock::new(record));

        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task_id) {
            return Err(WorkerError::TaskExists(task_id.to_string()));
        }
        tasks.insert(task_id.clone(), Arc::clone(&cell));

        Ok(TaskWriter {
            task_id,
            cell,
            finished: false,
        })
    }

    /// Snapshot of the current record.
    pub async fn read(&self, task_id: &TaskId) -> WorkerResult<TaskRecord> {
        let cell = self.cell(task_id).await?;
        let record = cell.read().await;
        Ok(record.clone())
    }

    /// Apply `f` to the record under its exclusive lock.
    ///
    /// Runners mutate through their [`TaskWriter`]; calling this on a task
    /// that still has a live runner breaks the single-writer rule.
    pub async fn mutate<F, R>(&self, task_id: &TaskId, f: F) -> WorkerResult<R>
    where
        F: FnOnce(&mut TaskRecord) -> R,
    {
        let cell = self.cell(task_id).await?;
        let mut record = cell.write().await;
        Ok(f(&mut record))
    }

    /// Drop a task from the registry, returning its last state.
    pub async fn remove(&self, task_id: &TaskId) -> Option<TaskRecord> {
        let cell = self.tasks.write().await.remove(task_id)?;
        let record = cell.read().await;
        Some(record.clone())
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    pub async fn status_counts(&self) -> StatusCounts {
        let cells: Vec<RecordCell> = self.tasks.read().await.values().cloned().collect();

        let mut counts = StatusCounts::default();
        for cell in cells {
            match cell.read().await.status {
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    /// Remove terminal tasks that finished more than `ttl` ago.
    ///
    /// Tasks still processing are never evicted. Returns the number removed.
    pub async fn evict_terminal_older_than(&self, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
            return 0;
        };

        let cells: Vec<(TaskId, RecordCell)> = self
            .tasks
            .read()
            .await
            .iter()
            .map(|(id, cell)| (id.clone(), Arc::clone(cell)))
            .collect();

        let mut expired = Vec::new();
        for (task_id, cell) in cells {
            if cell.read().await.finished_before(cutoff) {
                expired.push(task_id);
            }
        }

        if expired.is_empty() {
            return 0;
        }

        // Terminal records never change again, so the check above still holds.
        let mut tasks = self.tasks.write().await;
        expired
            .iter()
            .filter(|task_id| tasks.remove(*task_id).is_some())
            .count()
    }

    async fn cell(&self, task_id: &TaskId) -> WorkerResult<RecordCell> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| WorkerError::TaskNotFound(task_id.to_string()))
    }
}

/// The single mutation handle for one task.
///
/// Not clonable; `complete` and `fail` consume it, so a task gets exactly one
/// terminal write. Dropping it before either (a panicking runner, a cancelled
/// future) fails the task with [`ABORTED_CAUSE`].
pub struct TaskWriter {
    task_id: TaskId,
    cell: RecordCell,
    finished: bool,
}

impl TaskWriter {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Apply `f` to the record under its exclusive lock.
    pub async fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut TaskRecord) -> R,
    {
        let mut record = self.cell.write().await;
        f(&mut record)
    }

    pub async fn snapshot(&self) -> TaskRecord {
        self.cell.read().await.clone()
    }

    /// Mark the task completed with its final aggregation.
    pub async fn complete(mut self, summary: AnalysisSummary) -> bool {
        let applied = self.cell.write().await.complete(summary);
        self.finished = true;
        applied
    }

    /// Mark the task failed, keeping partial results.
    pub async fn fail(mut self, cause: impl Into<String>) -> bool {
        let applied = self.cell.write().await.fail(cause);
        self.finished = true;
        applied
    }
}

impl Drop for TaskWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        warn!(task_id = %self.task_id, "Task writer dropped without a terminal write");
        metrics::record_task_failed("aborted");

        // The unwinding runner normally holds no guard; fall back to a task if it does.
        match self.cell.try_write() {
            Ok(mut record) => {
                record.fail(ABORTED_CAUSE);
            }
            Err(_) => {
                let cell = Arc::clone(&self.cell);
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        cell.write().await.fail(ABORTED_CAUSE);
                    });
                }
            }
        }
    }
}

impl std::fmt::Debug for TaskWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWriter")
            .field("task_id", &self.task_id)
            .finish()
    }
}
